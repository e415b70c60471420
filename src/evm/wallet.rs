//! Transaction building and EIP-155 signing backed by the keystore.

use alloy::consensus::{SignableTransaction, TxLegacy};
use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::eips::eip2718::Encodable2718;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use k256::ecdsa::{RecoveryId, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::Chain;
use crate::error::Error;
use crate::evm::tx::{Transaction, TransactionOptions, TransactionStatus, TransactionType};
use crate::evm::{address, erc20};
use crate::keystore::{Curve, DataKind, KeyFamily, Keystore};

/// Gas limit applied to token transfers when the caller does not set one.
const TOKEN_TRANSFER_GAS_LIMIT: u64 = 65_000;
/// Floor for the contract-call gas default.
const CONTRACT_CALL_GAS_FLOOR: u64 = 100_000;

/// A signed, broadcast-ready transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// RLP-serialized signed transaction, as `eth_sendRawTransaction` wants it.
    pub raw: Vec<u8>,
    /// Transaction hash.
    pub hash: B256,
    /// 65-byte `r ‖ s ‖ recovery_id` signature.
    pub signature: [u8; 65],
    /// EIP-155 `v` value (`chain_id × 2 + 35 + recovery_id`).
    pub v: u64,
}

/// A chain-bound wallet over one keystore key.
///
/// All supported chains share this implementation; the [`Chain`] carries the
/// per-network parameters.
#[derive(Debug, Clone)]
pub struct EvmWallet {
    keystore: Arc<Keystore>,
    chain: Chain,
    key_id: String,
}

impl EvmWallet {
    /// Bind a wallet to a chain and a keystore key.
    pub fn new(keystore: Arc<Keystore>, chain: Chain, key_id: impl Into<String>) -> Self {
        Self {
            keystore,
            chain,
            key_id: key_id.into(),
        }
    }

    /// The chain this wallet operates on.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Id of the backing keystore key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Fetch the wallet's uncompressed secp256k1 public key.
    async fn public_key(&self) -> Result<Vec<u8>, Error> {
        let key = self.keystore.get_public_key(&self.key_id).await?;
        if key.family != KeyFamily::Ecdsa || key.curve != Some(Curve::Secp256k1) {
            return Err(Error::InvalidKey(format!(
                "wallet key must be ECDSA/secp256k1, found {}",
                key.family
            )));
        }
        key.public_key
            .ok_or_else(|| Error::InvalidKey("key has no public half".to_string()))
    }

    /// Derive the wallet's checksum-encoded address.
    pub async fn derive_address(&self) -> Result<String, Error> {
        let public = self.public_key().await?;
        address::derive_address(&public)
    }

    /// Build a native-currency transfer (or contract creation when `to` is
    /// the zero address).
    ///
    /// # Errors
    /// [`Error::InvalidAddress`] on malformed `to`; [`Error::InvalidAmount`]
    /// when a transfer carries no value.
    pub fn create_native_transaction(
        &self,
        to: &str,
        amount: U256,
        options: TransactionOptions,
    ) -> Result<Transaction, Error> {
        let recipient = address::parse_address(to)?;
        let creation = recipient == Address::ZERO;
        if !creation && amount.is_zero() {
            return Err(Error::InvalidAmount(
                "native transfer amount must be positive".to_string(),
            ));
        }
        Ok(self.base_transaction(
            if creation { None } else { Some(recipient) },
            amount,
            Vec::new(),
            if creation {
                TransactionType::Deployment
            } else {
                TransactionType::Native
            },
            None,
            options,
            self.chain.default_gas_limit,
        ))
    }

    /// Build an ERC-20 `transfer` of `amount` base units of `token` to `to`.
    pub fn create_token_transaction(
        &self,
        token: &str,
        to: &str,
        amount: U256,
        options: TransactionOptions,
    ) -> Result<Transaction, Error> {
        let token = address::parse_address(token)?;
        let recipient = address::parse_address(to)?;
        if token == Address::ZERO || recipient == Address::ZERO {
            return Err(Error::InvalidAddress(
                "token and recipient must be non-zero".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(Error::InvalidAmount(
                "token transfer amount must be positive".to_string(),
            ));
        }
        Ok(self.base_transaction(
            Some(token),
            U256::ZERO,
            erc20::encode_transfer(recipient, amount),
            TransactionType::Erc20Transfer,
            Some(token),
            options,
            TOKEN_TRANSFER_GAS_LIMIT,
        ))
    }

    /// Build a call of `method` on `contract`, ABI-encoding `args`.
    ///
    /// # Errors
    /// [`Error::MethodNotFound`] when the ABI has no such method;
    /// [`Error::InvalidInput`] when the arguments do not match its inputs.
    pub fn create_contract_call_transaction(
        &self,
        contract: &str,
        value: U256,
        abi: &JsonAbi,
        method: &str,
        args: &[DynSolValue],
        options: TransactionOptions,
    ) -> Result<Transaction, Error> {
        let contract = address::parse_address(contract)?;
        let function = abi
            .function(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))?;
        let data = function
            .abi_encode_input(args)
            .map_err(|e| Error::InvalidInput(format!("arguments for {method}: {e}")))?;
        let gas_default = (self.chain.default_gas_limit * 2).max(CONTRACT_CALL_GAS_FLOOR);
        Ok(self.base_transaction(
            Some(contract),
            value,
            data,
            TransactionType::ContractCall,
            None,
            options,
            gas_default,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn base_transaction(
        &self,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
        tx_type: TransactionType,
        token_address: Option<Address>,
        options: TransactionOptions,
        default_gas_limit: u64,
    ) -> Transaction {
        Transaction {
            hash: None,
            chain_type: self.chain.chain_type,
            // Zero means "this wallet"; signing recomputes and checks it.
            from: Address::ZERO,
            to,
            value,
            data,
            nonce: options.nonce.unwrap_or(0),
            gas_price: options.gas_price.unwrap_or(self.chain.default_gas_price),
            gas_limit: options.gas_limit.unwrap_or(default_gas_limit),
            gas_used: 0,
            block_number: None,
            status: TransactionStatus::Pending,
            tx_type,
            token_address,
            metadata: HashMap::new(),
        }
    }

    /// Sign `tx` for this wallet's chain and return the broadcast-ready bytes.
    ///
    /// The sender is recomputed from the wallet's public key and must match
    /// `tx.from` unless `tx.from` is unset (zero). The returned signature is
    /// low-S normalized and carries the recovery id found by trial recovery.
    ///
    /// # Errors
    /// [`Error::InvalidAddress`] on a sender mismatch,
    /// [`Error::SignatureRecovery`] when neither recovery id reproduces the
    /// wallet's public key.
    pub async fn sign_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, Error> {
        let public = self.public_key().await?;
        let derived = address::parse_address(&address::derive_address(&public)?)?;
        if tx.from != Address::ZERO && tx.from != derived {
            return Err(Error::InvalidAddress(format!(
                "transaction sender {} is not this wallet ({})",
                tx.from, derived
            )));
        }

        let envelope = TxLegacy {
            chain_id: Some(self.chain.chain_id),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: match tx.to {
                Some(recipient) => TxKind::Call(recipient),
                None => TxKind::Create,
            },
            value: tx.value,
            input: Bytes::from(tx.data.clone()),
        };
        let digest = envelope.signature_hash();

        let der = self
            .keystore
            .sign(&self.key_id, digest.as_slice(), DataKind::Digest)
            .await?;
        let parsed = k256::ecdsa::Signature::from_der(&der)
            .map_err(|e| Error::Signing(format!("signature is not DER (r, s): {e}")))?;
        // Reject the malleable (r, N - s) twin.
        let parsed = parsed.normalize_s().unwrap_or(parsed);

        let verifying = VerifyingKey::from_sec1_bytes(&public)
            .map_err(|e| Error::InvalidKey(format!("stored public key: {e}")))?;
        let recovery_id = (0u8..=1)
            .find(|candidate| {
                RecoveryId::from_byte(*candidate)
                    .and_then(|rec| {
                        VerifyingKey::recover_from_prehash(digest.as_slice(), &parsed, rec).ok()
                    })
                    .is_some_and(|recovered| recovered == verifying)
            })
            .ok_or_else(|| {
                Error::SignatureRecovery(
                    "no recovery id reproduces the wallet public key".to_string(),
                )
            })?;

        let (r_bytes, s_bytes) = parsed.split_bytes();
        let mut signature = [0u8; 65];
        signature[..32].copy_from_slice(&r_bytes);
        signature[32..64].copy_from_slice(&s_bytes);
        signature[64] = recovery_id;

        let signed = envelope.into_signed(Signature::new(
            U256::from_be_slice(&r_bytes),
            U256::from_be_slice(&s_bytes),
            recovery_id == 1,
        ));
        let raw = signed.encoded_2718();
        Ok(SignedTransaction {
            raw,
            hash: *signed.hash(),
            signature,
            v: self.chain.chain_id * 2 + 35 + u64::from(recovery_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainType;
    use crate::keystore::encryptor::Encryptor;
    use crate::store::testing;
    use crate::types::Tags;

    /// Test-vector private key whose address is
    /// 0x9b2055d370f73ec7d8a03e965129118dc8f5bf83.
    const VECTOR_PRIVATE_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const VECTOR_ADDRESS: &str = "0x9b2055d370f73ec7d8a03e965129118dc8f5bf83";

    /// Half of the secp256k1 group order, for low-S assertions.
    const SECP256K1_ORDER_HALF: [u8; 32] = [
        0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, 0x5D, 0x57, 0x6E, 0x73, 0x57, 0xA4, 0x50, 0x1D, 0xDF, 0xE9, 0x2F, 0x46, 0x68, 0x1B,
        0x20, 0xA0,
    ];

    fn ethereum() -> Chain {
        Chain {
            chain_type: ChainType::Ethereum,
            chain_id: 1,
            name: "ethereum".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: "http://localhost:8545".parse().expect("url"),
            explorer_url: "https://api.etherscan.io/api".parse().expect("url"),
            explorer_api_key: None,
            default_gas_price: 20_000_000_000,
            default_gas_limit: 21_000,
        }
    }

    async fn vector_wallet() -> EvmWallet {
        let pool = testing::pool().await;
        let keystore = Arc::new(Keystore::new(
            pool,
            Encryptor::new(&[0x22u8; 32]).expect("master key"),
        ));
        let private = alloy::hex::decode(VECTOR_PRIVATE_KEY).expect("hex");
        let key = keystore
            .import(
                "vector",
                KeyFamily::Ecdsa,
                Some(Curve::Secp256k1),
                &private,
                None,
                Tags::new(),
            )
            .await
            .expect("import");
        EvmWallet::new(keystore, ethereum(), key.id)
    }

    #[tokio::test]
    async fn derives_the_known_vector_address() {
        let wallet = vector_wallet().await;
        let derived = wallet.derive_address().await.expect("derive");
        assert_eq!(derived.to_lowercase(), VECTOR_ADDRESS);
    }

    #[tokio::test]
    async fn signed_transaction_is_eip155_with_low_s() {
        let wallet = vector_wallet().await;
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        let tx = wallet
            .create_native_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                one_eth,
                TransactionOptions {
                    gas_price: Some(20_000_000_000),
                    gas_limit: Some(21_000),
                    nonce: Some(0),
                },
            )
            .expect("build");

        let signed = wallet.sign_transaction(&tx).await.expect("sign");
        assert!(signed.v == 37 || signed.v == 38);
        assert!(!signed.raw.is_empty());

        let s = U256::from_be_slice(&signed.signature[32..64]);
        assert!(s <= U256::from_be_slice(&SECP256K1_ORDER_HALF));

        // The reported hash is the keccak of the broadcast bytes.
        assert_eq!(signed.hash, alloy::primitives::keccak256(&signed.raw));
    }

    #[tokio::test]
    async fn exactly_one_recovery_id_matches() {
        let wallet = vector_wallet().await;
        let tx = wallet
            .create_native_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::from(5u64),
                TransactionOptions::default(),
            )
            .expect("build");
        let signed = wallet.sign_transaction(&tx).await.expect("sign");

        // Rebuild the digest and count matching recovery ids.
        let envelope = TxLegacy {
            chain_id: Some(1),
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: TxKind::Call(tx.to.expect("recipient")),
            value: tx.value,
            input: Bytes::from(tx.data.clone()),
        };
        let digest = envelope.signature_hash();
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signed.signature[..64]);
        let parsed = k256::ecdsa::Signature::from_slice(&compact).expect("compact sig");
        let expected = VerifyingKey::from_sec1_bytes(
            &k256::SecretKey::from_slice(&alloy::hex::decode(VECTOR_PRIVATE_KEY).expect("hex"))
                .expect("scalar")
                .public_key()
                .to_sec1_bytes(),
        )
        .expect("verifying key");

        let matches = (0u8..=1)
            .filter(|v| {
                RecoveryId::from_byte(*v)
                    .and_then(|rec| {
                        VerifyingKey::recover_from_prehash(digest.as_slice(), &parsed, rec).ok()
                    })
                    .is_some_and(|recovered| recovered == expected)
            })
            .count();
        assert_eq!(matches, 1);
    }

    #[tokio::test]
    async fn sender_mismatch_is_rejected() {
        let wallet = vector_wallet().await;
        let mut tx = wallet
            .create_native_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::from(1u64),
                TransactionOptions::default(),
            )
            .expect("build");
        tx.from = address::parse_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .expect("address");
        let err = wallet.sign_transaction(&tx).await.expect_err("mismatch");
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn native_transaction_validation_and_defaults() {
        let wallet = vector_wallet().await;

        let err = wallet
            .create_native_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::ZERO,
                TransactionOptions::default(),
            )
            .expect_err("zero amount");
        assert!(matches!(err, Error::InvalidAmount(_)));

        let err = wallet
            .create_native_transaction("nonsense", U256::from(1u64), TransactionOptions::default())
            .expect_err("bad address");
        assert!(matches!(err, Error::InvalidAddress(_)));

        // Zero address means contract creation; zero amount is fine there.
        let creation = wallet
            .create_native_transaction(
                "0x0000000000000000000000000000000000000000",
                U256::ZERO,
                TransactionOptions::default(),
            )
            .expect("creation");
        assert_eq!(creation.tx_type, TransactionType::Deployment);
        assert_eq!(creation.to, None);

        let transfer = wallet
            .create_native_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::from(7u64),
                TransactionOptions::default(),
            )
            .expect("transfer");
        assert_eq!(transfer.gas_price, 20_000_000_000);
        assert_eq!(transfer.gas_limit, 21_000);
        assert_eq!(transfer.tx_type, TransactionType::Native);
    }

    #[tokio::test]
    async fn token_transaction_shape() {
        let wallet = vector_wallet().await;
        let token = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
        let tx = wallet
            .create_token_transaction(
                token,
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::from(1_000_000u64),
                TransactionOptions::default(),
            )
            .expect("build");
        assert_eq!(tx.tx_type, TransactionType::Erc20Transfer);
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.gas_limit, TOKEN_TRANSFER_GAS_LIMIT);
        assert_eq!(tx.to, Some(address::parse_address(token).expect("token")));
        assert_eq!(tx.token_address, tx.to);
        assert_eq!(&tx.data[..4], &erc20::TRANSFER_SELECTOR);
    }

    #[tokio::test]
    async fn contract_call_transaction_encodes_per_abi() {
        let wallet = vector_wallet().await;
        let abi: JsonAbi = serde_json::from_str(
            r#"[{
                "type": "function",
                "name": "setValue",
                "inputs": [{ "name": "value", "type": "uint256" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            }]"#,
        )
        .expect("abi");

        let tx = wallet
            .create_contract_call_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::ZERO,
                &abi,
                "setValue",
                &[DynSolValue::Uint(U256::from(5u64), 256)],
                TransactionOptions::default(),
            )
            .expect("build");
        assert_eq!(tx.tx_type, TransactionType::ContractCall);
        // Selector of setValue(uint256).
        let selector = &alloy::primitives::keccak256(b"setValue(uint256)")[..4];
        assert_eq!(&tx.data[..4], selector);
        // 2 × 21000 is below the floor.
        assert_eq!(tx.gas_limit, CONTRACT_CALL_GAS_FLOOR);

        let err = wallet
            .create_contract_call_transaction(
                "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
                U256::ZERO,
                &abi,
                "missing",
                &[],
                TransactionOptions::default(),
            )
            .expect_err("unknown method");
        assert!(matches!(err, Error::MethodNotFound(_)));
    }
}
