//! Address derivation and EIP-55 checksum handling.

use alloy::primitives::{keccak256, Address};
use std::str::FromStr;

use crate::error::Error;

/// Derive the EVM address for an uncompressed secp256k1 public key.
///
/// The address is the last 20 bytes of `keccak256(X ‖ Y)`, returned in
/// mixed-case checksum form with a `0x` prefix.
///
/// # Errors
/// Returns [`Error::InvalidKey`] unless the input is a 65-byte uncompressed
/// SEC1 point (`0x04 ‖ X ‖ Y`).
pub fn derive_address(public_key: &[u8]) -> Result<String, Error> {
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(Error::InvalidKey(format!(
            "expected a 65-byte uncompressed secp256k1 point, got {} bytes",
            public_key.len()
        )));
    }
    let hash = keccak256(&public_key[1..]);
    let address = Address::from_slice(&hash[12..]);
    Ok(address.to_checksum(None))
}

/// Parse and validate an address string.
///
/// Accepts all-lowercase and all-uppercase hex unconditionally; mixed-case
/// input must carry a valid EIP-55 checksum.
///
/// # Errors
/// Returns [`Error::InvalidAddress`] on malformed hex or a checksum mismatch.
pub fn parse_address(input: &str) -> Result<Address, Error> {
    let address = Address::from_str(input)
        .map_err(|_| Error::InvalidAddress(input.to_string()))?;
    let hex_part = input.strip_prefix("0x").unwrap_or(input);
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && address.to_checksum(None) != normalize_prefix(input) {
        return Err(Error::InvalidAddress(format!("bad checksum: {input}")));
    }
    Ok(address)
}

/// Checksum-encode an address.
pub fn checksum(address: Address) -> String {
    address.to_checksum(None)
}

fn normalize_prefix(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("0X") {
        format!("0x{stripped}")
    } else if input.starts_with("0x") {
        input.to_string()
    } else {
        format!("0x{input}")
    }
}
