//! Compiled-contract artifact loading.
//!
//! An artifact lives at `<artifacts-root>/<name>/<name>.json` and carries an
//! `abi` array plus bytecode under one of several field names, depending on
//! the toolchain that produced it. Both the flat layout (hex string at the
//! top level) and the nested Hardhat/Truffle layout (`{"object": "0x.."}`)
//! are accepted, with or without a `0x` prefix.

use alloy::json_abi::JsonAbi;
use serde_json::Value;
use std::path::Path;

use crate::error::Error;

/// Field names tried, in order, for the deploy bytecode.
const BYTECODE_FIELDS: [&str; 3] = ["bytecode", "unlinked_binary", "code"];
/// Field names tried, in order, for the deployed (runtime) bytecode.
const DEPLOYED_BYTECODE_FIELDS: [&str; 2] = ["deployedBytecode", "deployed_bytecode"];

/// A parsed compiled-contract bundle.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Artifact name (directory and file stem).
    pub name: String,
    /// Contract ABI.
    pub abi: JsonAbi,
    /// Creation bytecode.
    pub bytecode: Vec<u8>,
    /// Runtime bytecode, when the artifact carries it.
    pub deployed_bytecode: Option<Vec<u8>>,
}

/// Load and parse `<root>/<name>/<name>.json`.
///
/// # Errors
/// [`Error::InvalidContract`] when the file is missing, the ABI is absent,
/// or no bytecode field parses as hex.
pub fn load(root: &Path, name: &str) -> Result<Artifact, Error> {
    let path = root.join(name).join(format!("{name}.json"));
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidContract(format!("cannot read {}: {e}", path.display()))
    })?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidContract(format!("{name}: malformed JSON: {e}")))?;
    parse(name, &value)
}

/// Parse an artifact out of an already-loaded JSON document.
pub fn parse(name: &str, value: &Value) -> Result<Artifact, Error> {
    let abi_value = value
        .get("abi")
        .ok_or_else(|| Error::InvalidContract(format!("{name}: missing abi")))?;
    if !abi_value.is_array() {
        return Err(Error::InvalidContract(format!("{name}: abi is not an array")));
    }
    let abi: JsonAbi = serde_json::from_value(abi_value.clone())
        .map_err(|e| Error::InvalidContract(format!("{name}: bad abi: {e}")))?;

    let bytecode = BYTECODE_FIELDS
        .iter()
        .find_map(|field| value.get(*field).and_then(hex_field))
        .ok_or_else(|| Error::InvalidContract(format!("{name}: missing bytecode")))?
        .map_err(|e| Error::InvalidContract(format!("{name}: {e}")))?;
    if bytecode.is_empty() {
        return Err(Error::InvalidContract(format!("{name}: empty bytecode")));
    }

    let deployed_bytecode = DEPLOYED_BYTECODE_FIELDS
        .iter()
        .find_map(|field| value.get(*field).and_then(hex_field))
        .transpose()
        .map_err(|e| Error::InvalidContract(format!("{name}: {e}")))?;

    Ok(Artifact {
        name: name.to_string(),
        abi,
        bytecode,
        deployed_bytecode,
    })
}

/// Pull hex bytes out of a flat string field or a nested `{"object": ..}`.
fn hex_field(value: &Value) -> Option<Result<Vec<u8>, String>> {
    let text = match value {
        Value::String(text) => text.as_str(),
        Value::Object(map) => map.get("object")?.as_str()?,
        _ => return None,
    };
    let stripped = text.strip_prefix("0x").unwrap_or(text);
    if stripped.is_empty() {
        return None;
    }
    Some(alloy::hex::decode(stripped).map_err(|e| format!("bad bytecode hex: {e}")))
}
