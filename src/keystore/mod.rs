//! Encrypted keystore: key lifecycle and sign-without-reveal.
//!
//! Key material is generated by [`generator`], sealed by the
//! [`Encryptor`](encryptor::Encryptor), and persisted by [`store`]. Private
//! bytes are decrypted only inside [`Keystore::sign`] and held in a zeroizing
//! buffer for the duration of the call.

pub mod encryptor;
pub mod generator;
mod store;

use chrono::{DateTime, Utc};
use ed25519_dalek::Signer as _;
use hmac::{Hmac, Mac};
use k256::ecdsa::signature::hazmat::PrehashSigner as _;
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::types::{Page, Tags};
use encryptor::Encryptor;
use store::{KeyRow, KeyStore};

/// Supported key families.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFamily {
    /// ECDSA over one of the supported curves.
    #[serde(rename = "ecdsa")]
    Ecdsa,
    /// RSA with PKCS#1 v1.5 signatures.
    #[serde(rename = "rsa")]
    Rsa,
    /// Ed25519.
    #[serde(rename = "ed25519")]
    Ed25519,
    /// Symmetric HMAC-SHA-256 secret.
    #[serde(rename = "symmetric")]
    Symmetric,
}

impl Display for KeyFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyFamily::Ecdsa => write!(f, "ecdsa"),
            KeyFamily::Rsa => write!(f, "rsa"),
            KeyFamily::Ed25519 => write!(f, "ed25519"),
            KeyFamily::Symmetric => write!(f, "symmetric"),
        }
    }
}

impl FromStr for KeyFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa" => Ok(KeyFamily::Ecdsa),
            "rsa" => Ok(KeyFamily::Rsa),
            "ed25519" => Ok(KeyFamily::Ed25519),
            "symmetric" => Ok(KeyFamily::Symmetric),
            other => Err(Error::InvalidInput(format!("unknown key family {other}"))),
        }
    }
}

/// Curves supported for ECDSA keys.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    /// NIST P-256.
    #[serde(rename = "p256")]
    P256,
    /// secp256k1, used by all EVM chains.
    #[serde(rename = "secp256k1")]
    Secp256k1,
}

impl Display for Curve {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Curve::P256 => write!(f, "p256"),
            Curve::Secp256k1 => write!(f, "secp256k1"),
        }
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p256" => Ok(Curve::P256),
            "secp256k1" => Ok(Curve::Secp256k1),
            other => Err(Error::InvalidInput(format!("unknown curve {other}"))),
        }
    }
}

/// Whether the bytes handed to [`Keystore::sign`] are a message or a digest.
///
/// Ed25519 and symmetric keys always consume the raw bytes and ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Arbitrary message bytes; hashed by the keystore where required.
    #[serde(rename = "raw")]
    Raw,
    /// A precomputed digest, signed as-is.
    #[serde(rename = "digest")]
    Digest,
}

/// Public view of a stored key. Never carries private material.
#[derive(Debug, Clone, Serialize)]
pub struct Key {
    /// Key id (UUIDv4).
    pub id: String,
    /// Unique human-chosen name.
    pub name: String,
    /// Key family.
    pub family: KeyFamily,
    /// Curve, present for ECDSA keys.
    pub curve: Option<Curve>,
    /// Encoded public key bytes; `None` for symmetric keys.
    pub public_key: Option<Vec<u8>>,
    /// Free-form labels.
    pub tags: Tags,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Key {
    fn from_row(row: &KeyRow) -> Result<Self, Error> {
        Ok(Key {
            id: row.id.clone(),
            name: row.name.clone(),
            family: row.family()?,
            curve: row.curve()?,
            public_key: row.public_bytes.clone(),
            tags: row.tags(),
            created_at: row.created_at,
        })
    }
}

/// The keystore service.
///
/// All concurrent operations are serialized only by the database; clones
/// share the same pool.
#[derive(Debug, Clone)]
pub struct Keystore {
    store: KeyStore,
    encryptor: Encryptor,
}

impl Keystore {
    /// Build a keystore over an open pool and a configured master key.
    pub fn new(pool: SqlitePool, encryptor: Encryptor) -> Self {
        Self {
            store: KeyStore::new(pool),
            encryptor,
        }
    }

    /// Generate and persist a new key.
    ///
    /// # Errors
    /// [`Error::KeyAlreadyExists`] when `name` is taken;
    /// [`Error::InvalidInput`] on family/curve mismatches.
    pub async fn create(
        &self,
        name: &str,
        family: KeyFamily,
        curve: Option<Curve>,
        tags: Tags,
    ) -> Result<Key, Error> {
        let generated = generator::generate(family, curve)?;
        self.persist(name, family, curve, &generated.private, generated.public, tags)
            .await
    }

    /// Import externally produced key material.
    ///
    /// The public half is re-derived from the private bytes and must match
    /// the caller-supplied value when one is given.
    pub async fn import(
        &self,
        name: &str,
        family: KeyFamily,
        curve: Option<Curve>,
        private: &[u8],
        public: Option<Vec<u8>>,
        tags: Tags,
    ) -> Result<Key, Error> {
        let derived = generator::public_from_private(family, curve, private)?;
        if let (Some(supplied), Some(derived)) = (&public, &derived) {
            if supplied != derived {
                return Err(Error::InvalidKey(
                    "public key does not match private key".to_string(),
                ));
            }
        }
        self.persist(name, family, curve, private, derived, tags)
            .await
    }

    async fn persist(
        &self,
        name: &str,
        family: KeyFamily,
        curve: Option<Curve>,
        private: &[u8],
        public: Option<Vec<u8>>,
        tags: Tags,
    ) -> Result<Key, Error> {
        if name.is_empty() {
            return Err(Error::InvalidInput("key name must not be empty".to_string()));
        }
        let encrypted_private = self.encryptor.encrypt(private)?;
        let row = KeyRow {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            family: family.to_string(),
            curve: curve.map(|c| c.to_string()),
            encrypted_private,
            public_bytes: public,
            tags: serde_json::to_string(&tags).expect("tags serialize"),
            created_at: Utc::now(),
        };
        self.store.insert(&row).await?;
        Key::from_row(&row)
    }

    /// Fetch a key's public view.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] when `id` is unknown.
    pub async fn get_public_key(&self, id: &str) -> Result<Key, Error> {
        let row = self.store.get(id).await?;
        Key::from_row(&row)
    }

    /// Page through keys (public views only).
    pub async fn list(&self, limit: u32, token: Option<&str>) -> Result<Page<Key>, Error> {
        let page = self.store.list(limit, token).await?;
        let items = page
            .items
            .iter()
            .map(Key::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            next_token: page.next_token,
        })
    }

    /// Rename or relabel a key. Family, curve, and key bytes are immutable.
    pub async fn update(&self, id: &str, name: &str, tags: Tags) -> Result<Key, Error> {
        if name.is_empty() {
            return Err(Error::InvalidInput("key name must not be empty".to_string()));
        }
        self.store.update_meta(id, name, &tags).await?;
        self.get_public_key(id).await
    }

    /// Delete a key permanently.
    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        self.store.delete(id).await
    }

    /// Sign `data` with the key `id`, dispatching on the key family.
    ///
    /// - ECDSA: `Raw` data is hashed with SHA-256 first; the signature is DER
    ///   `SEQUENCE { INTEGER r, INTEGER s }`.
    /// - RSA: PKCS#1 v1.5 over SHA-256; `Digest` input must be exactly 32 bytes.
    /// - Ed25519: always consumes raw data; `data_kind` is ignored.
    /// - Symmetric: HMAC-SHA-256 over raw data; `data_kind` is ignored.
    ///
    /// # Errors
    /// [`Error::KeyNotFound`] for unknown ids, [`Error::Signing`] for
    /// malformed inputs or primitive failures.
    pub async fn sign(&self, id: &str, data: &[u8], data_kind: DataKind) -> Result<Vec<u8>, Error> {
        let row = self.store.get(id).await?;
        let family = row.family()?;
        let curve = row.curve()?;
        let private = Zeroizing::new(self.encryptor.decrypt(&row.encrypted_private)?);

        match family {
            KeyFamily::Ecdsa => {
                let digest = ecdsa_digest(data, data_kind);
                match curve {
                    Some(Curve::P256) => {
                        let secret = p256::SecretKey::from_sec1_der(&private)
                            .map_err(|e| Error::Signing(format!("P-256 private key: {e}")))?;
                        let signing = p256::ecdsa::SigningKey::from(&secret);
                        let signature: p256::ecdsa::Signature = signing
                            .sign_prehash(&digest)
                            .map_err(|e| Error::Signing(e.to_string()))?;
                        Ok(signature.to_der().as_bytes().to_vec())
                    }
                    Some(Curve::Secp256k1) => {
                        let secret = k256::SecretKey::from_slice(&private)
                            .map_err(|e| Error::Signing(format!("secp256k1 private key: {e}")))?;
                        let signing = k256::ecdsa::SigningKey::from(&secret);
                        let signature: k256::ecdsa::Signature = signing
                            .sign_prehash(&digest)
                            .map_err(|e| Error::Signing(e.to_string()))?;
                        Ok(signature.to_der().as_bytes().to_vec())
                    }
                    None => Err(Error::Signing("ECDSA key without a curve".to_string())),
                }
            }
            KeyFamily::Rsa => {
                let digest: Vec<u8> = match data_kind {
                    DataKind::Raw => Sha256::digest(data).to_vec(),
                    DataKind::Digest => {
                        if data.len() != 32 {
                            return Err(Error::Signing(format!(
                                "RSA digest input must be 32 bytes, got {}",
                                data.len()
                            )));
                        }
                        data.to_vec()
                    }
                };
                let secret =
                    <rsa::RsaPrivateKey as rsa::pkcs1::DecodeRsaPrivateKey>::from_pkcs1_der(
                        &private,
                    )
                    .map_err(|e| Error::Signing(format!("RSA private key: {e}")))?;
                secret
                    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| Error::Signing(e.to_string()))
            }
            KeyFamily::Ed25519 => {
                let signing =
                    <ed25519_dalek::SigningKey as ed25519_dalek::pkcs8::DecodePrivateKey>::from_pkcs8_der(
                        &private,
                    )
                    .map_err(|e| Error::Signing(format!("Ed25519 private key: {e}")))?;
                Ok(signing.sign(data).to_bytes().to_vec())
            }
            KeyFamily::Symmetric => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&private)
                    .map_err(|e| Error::Signing(e.to_string()))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

/// SHA-256 for raw inputs; digests pass through untouched.
fn ecdsa_digest(data: &[u8], data_kind: DataKind) -> Vec<u8> {
    match data_kind {
        DataKind::Raw => Sha256::digest(data).to_vec(),
        DataKind::Digest => data.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing;
    use ed25519_dalek::Verifier as _;
    use k256::ecdsa::signature::hazmat::PrehashVerifier as _;

    async fn keystore() -> Keystore {
        let pool = testing::pool().await;
        let encryptor = Encryptor::new(&[0x11u8; 32]).expect("master key");
        Keystore::new(pool, encryptor)
    }

    #[tokio::test]
    async fn ecdsa_secp256k1_sign_verify_round_trip() {
        let keystore = keystore().await;
        let key = keystore
            .create("ops-secp", KeyFamily::Ecdsa, Some(Curve::Secp256k1), Tags::new())
            .await
            .expect("create");
        let message = b"transfer 5 wei";
        let der = keystore
            .sign(&key.id, message, DataKind::Raw)
            .await
            .expect("sign");

        let signature = k256::ecdsa::Signature::from_der(&der).expect("DER parses to (r, s)");
        let verifying = k256::ecdsa::VerifyingKey::from_sec1_bytes(
            key.public_key.as_deref().expect("public half"),
        )
        .expect("public key");
        let digest = Sha256::digest(message);
        verifying
            .verify_prehash(&digest, &signature)
            .expect("verifies");
    }

    #[tokio::test]
    async fn ecdsa_raw_and_digest_inputs_agree() {
        let keystore = keystore().await;
        let key = keystore
            .create("ops-p256", KeyFamily::Ecdsa, Some(Curve::P256), Tags::new())
            .await
            .expect("create");
        let message = b"same bytes";
        let digest = Sha256::digest(message);

        let raw_sig = keystore
            .sign(&key.id, message, DataKind::Raw)
            .await
            .expect("raw sign");
        let digest_sig = keystore
            .sign(&key.id, &digest, DataKind::Digest)
            .await
            .expect("digest sign");

        let verifying = p256::ecdsa::VerifyingKey::from_sec1_bytes(
            key.public_key.as_deref().expect("public half"),
        )
        .expect("public key");
        for der in [raw_sig, digest_sig] {
            let signature = p256::ecdsa::Signature::from_der(&der).expect("DER");
            verifying.verify_prehash(&digest, &signature).expect("verifies");
        }
    }

    #[tokio::test]
    async fn rsa_sign_verify_and_digest_length_check() {
        let keystore = keystore().await;
        let key = keystore
            .create("ops-rsa", KeyFamily::Rsa, None, Tags::new())
            .await
            .expect("create");
        let message = b"audit log line";
        let signature = keystore
            .sign(&key.id, message, DataKind::Raw)
            .await
            .expect("sign");

        let public = <rsa::RsaPublicKey as rsa::pkcs1::DecodeRsaPublicKey>::from_pkcs1_der(
            key.public_key.as_deref().expect("public half"),
        )
        .expect("public key");
        let digest = Sha256::digest(message);
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .expect("verifies");

        let err = keystore
            .sign(&key.id, b"short", DataKind::Digest)
            .await
            .expect_err("31-byte digest rejected");
        assert!(matches!(err, Error::Signing(_)));
    }

    #[tokio::test]
    async fn ed25519_ignores_data_kind() {
        let keystore = keystore().await;
        let key = keystore
            .create("ops-ed", KeyFamily::Ed25519, None, Tags::new())
            .await
            .expect("create");
        let message = b"attestation payload";
        let raw = keystore
            .sign(&key.id, message, DataKind::Raw)
            .await
            .expect("sign");
        let digest_kind = keystore
            .sign(&key.id, message, DataKind::Digest)
            .await
            .expect("sign");
        // Ed25519 hashes internally, so both kinds sign the same bytes.
        assert_eq!(raw, digest_kind);

        let public_bytes: [u8; 32] = key
            .public_key
            .as_deref()
            .expect("public half")
            .try_into()
            .expect("32 bytes");
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&public_bytes).expect("public");
        let signature = ed25519_dalek::Signature::from_slice(&raw).expect("signature");
        verifying.verify(message, &signature).expect("verifies");
    }

    #[tokio::test]
    async fn symmetric_hmac_is_deterministic_and_secret() {
        let keystore = keystore().await;
        let key = keystore
            .create("ops-hmac", KeyFamily::Symmetric, None, Tags::new())
            .await
            .expect("create");
        assert!(key.public_key.is_none());

        let a = keystore
            .sign(&key.id, b"webhook body", DataKind::Raw)
            .await
            .expect("sign");
        let b = keystore
            .sign(&key.id, b"webhook body", DataKind::Digest)
            .await
            .expect("sign");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn names_are_unique() {
        let keystore = keystore().await;
        keystore
            .create("dup", KeyFamily::Symmetric, None, Tags::new())
            .await
            .expect("first");
        let err = keystore
            .create("dup", KeyFamily::Ed25519, None, Tags::new())
            .await
            .expect_err("duplicate name");
        assert!(matches!(err, Error::KeyAlreadyExists(name) if name == "dup"));
    }

    #[tokio::test]
    async fn import_rejects_mismatched_public_key() {
        let keystore = keystore().await;
        let honest = generator::generate(KeyFamily::Ecdsa, Some(Curve::Secp256k1)).expect("gen");
        let other = generator::generate(KeyFamily::Ecdsa, Some(Curve::Secp256k1)).expect("gen");
        let err = keystore
            .import(
                "imported",
                KeyFamily::Ecdsa,
                Some(Curve::Secp256k1),
                &honest.private,
                other.public,
                Tags::new(),
            )
            .await
            .expect_err("mismatch");
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[tokio::test]
    async fn list_pages_with_continuation_tokens() {
        let keystore = keystore().await;
        for index in 0..5 {
            keystore
                .create(&format!("key-{index}"), KeyFamily::Symmetric, None, Tags::new())
                .await
                .expect("create");
        }

        let first = keystore.list(2, None).await.expect("first page");
        assert_eq!(first.items.len(), 2);
        let token = first.next_token.expect("more pages");

        let mut seen: Vec<String> = first.items.into_iter().map(|k| k.name).collect();
        let mut token = Some(token);
        while let Some(current) = token {
            let page = keystore.list(2, Some(&current)).await.expect("page");
            seen.extend(page.items.into_iter().map(|k| k.name));
            token = page.next_token;
        }
        seen.sort();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], "key-0");
        assert_eq!(seen[4], "key-4");
    }

    #[tokio::test]
    async fn update_changes_only_name_and_tags() {
        let keystore = keystore().await;
        let key = keystore
            .create("before", KeyFamily::Ed25519, None, Tags::new())
            .await
            .expect("create");

        let mut tags = Tags::new();
        tags.insert("env".to_string(), "prod".to_string());
        let updated = keystore
            .update(&key.id, "after", tags.clone())
            .await
            .expect("update");
        assert_eq!(updated.name, "after");
        assert_eq!(updated.tags, tags);
        assert_eq!(updated.family, KeyFamily::Ed25519);
        assert_eq!(updated.public_key, key.public_key);
    }

    #[tokio::test]
    async fn delete_then_sign_is_key_not_found() {
        let keystore = keystore().await;
        let key = keystore
            .create("short-lived", KeyFamily::Symmetric, None, Tags::new())
            .await
            .expect("create");
        keystore.delete(&key.id).await.expect("delete");
        let err = keystore
            .sign(&key.id, b"data", DataKind::Raw)
            .await
            .expect_err("gone");
        assert!(matches!(err, Error::KeyNotFound(_)));
        let err = keystore.delete(&key.id).await.expect_err("already gone");
        assert!(matches!(err, Error::KeyNotFound(_)));
    }
}
