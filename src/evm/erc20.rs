//! ERC-20 calldata and log handling.

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    /// Minimal ERC-20 surface the service needs.
    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
        function transferFrom(address from, address to, uint256 value) external returns (bool);
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// Selector of `transfer(address,uint256)`: `0xa9059cbb`.
pub const TRANSFER_SELECTOR: [u8; 4] = IERC20::transferCall::SELECTOR;
/// Selector of `transferFrom(address,address,uint256)`.
pub const TRANSFER_FROM_SELECTOR: [u8; 4] = IERC20::transferFromCall::SELECTOR;
/// Topic0 of the `Transfer(address,address,uint256)` event.
pub const TRANSFER_EVENT_TOPIC: B256 = IERC20::Transfer::SIGNATURE_HASH;

/// Encode a `transfer(address,uint256)` call: 4-byte selector, then the
/// 32-byte left-padded recipient and 32-byte big-endian amount.
pub fn encode_transfer(to: Address, amount: U256) -> Vec<u8> {
    IERC20::transferCall { to, value: amount }.abi_encode()
}

/// Decode `transfer` calldata into `(recipient, amount)`.
pub fn decode_transfer(data: &[u8]) -> Option<(Address, U256)> {
    if data.len() < 4 || data[..4] != TRANSFER_SELECTOR {
        return None;
    }
    IERC20::transferCall::abi_decode(data)
        .ok()
        .map(|call| (call.to, call.value))
}

/// Decode `transferFrom` calldata into `(from, to, amount)`.
pub fn decode_transfer_from(data: &[u8]) -> Option<(Address, Address, U256)> {
    if data.len() < 4 || data[..4] != TRANSFER_FROM_SELECTOR {
        return None;
    }
    IERC20::transferFromCall::abi_decode(data)
        .ok()
        .map(|call| (call.from, call.to, call.value))
}

/// Decode a `Transfer` event from raw log topics and data.
///
/// Returns `(from, to, amount)` when the log is an ERC-20 `Transfer`.
pub fn decode_transfer_log(topics: &[B256], data: &[u8]) -> Option<(Address, Address, U256)> {
    if topics.len() != 3 || topics[0] != TRANSFER_EVENT_TOPIC || data.len() < 32 {
        return None;
    }
    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);
    let amount = U256::from_be_slice(&data[..32]);
    Some((from, to, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn transfer_encoding_matches_the_abi_layout() {
        let recipient = address!("0x742d35Cc6634C0532925a3b844Bc454e4438f44e");
        let data = encode_transfer(recipient, U256::from(1_000_000u64));

        assert_eq!(&data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        // Bytes 4..36: recipient, left-padded to 32 bytes.
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], recipient.as_slice());
        // Bytes 36..68: amount, big-endian. 1_000_000 = 0x0f4240.
        assert_eq!(&data[36..65], &[0u8; 29]);
        assert_eq!(&data[65..68], &[0x0f, 0x42, 0x40]);
    }

    #[test]
    fn transfer_calldata_round_trips() {
        let recipient = address!("0x742d35Cc6634C0532925a3b844Bc454e4438f44e");
        let amount = U256::from(123_456_789u64);
        let data = encode_transfer(recipient, amount);
        assert_eq!(decode_transfer(&data), Some((recipient, amount)));
        assert_eq!(decode_transfer(&data[..10]), None);
        assert_eq!(decode_transfer(b"\x00\x01\x02\x03"), None);
    }

    #[test]
    fn transfer_log_decodes_from_topics_and_data() {
        let from = address!("0x1000000000000000000000000000000000000001");
        let to = address!("0x2000000000000000000000000000000000000002");
        let amount = U256::from(30u64);
        let topics = vec![
            TRANSFER_EVENT_TOPIC,
            from.into_word(),
            to.into_word(),
        ];
        let data = amount.to_be_bytes::<32>();
        assert_eq!(
            decode_transfer_log(&topics, &data),
            Some((from, to, amount))
        );
        // Wrong topic0 is not a Transfer.
        let other = vec![B256::ZERO, from.into_word(), to.into_word()];
        assert_eq!(decode_transfer_log(&other, &data), None);
    }
}
