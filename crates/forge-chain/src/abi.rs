//! Minimal Solidity ABI codec for the funding contract.
//!
//! Only the shapes the contract uses are supported: `uint256`, `address`,
//! `bool` and `string`. Amounts are carried as `u128` wei; a 256-bit word
//! whose upper half is non-zero is rejected on decode.

use crate::client::OnChainProject;
use crate::{ChainError, Result};
use forge_types::{Address, Wei};
use sha3::{Digest, Keccak256};

pub const CREATE_PROJECT: &str = "createProject(string,uint256,uint256)";
pub const DONATE: &str = "donate(string,string)";
pub const WITHDRAW_FUNDS: &str = "withdrawFunds(string)";
pub const GET_PROJECT: &str = "getProject(string)";

pub const EVENT_PROJECT_CREATED: &str = "ProjectCreated(string,address,uint256,uint256)";
pub const EVENT_DONATION_RECEIVED: &str = "DonationReceived(string,address,uint256,string)";
pub const EVENT_FUNDS_WITHDRAWN: &str = "FundsWithdrawn(string,address,uint256)";

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    Address(Address),
    Bool(bool),
    String(String),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_))
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 4-byte function selector of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of an event with the given canonical signature
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Selector followed by the ABI-encoded arguments
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode_tokens(args));
    out
}

pub fn encode_tokens(args: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();
    let head_len = args.len() * WORD;

    for token in args {
        if token.is_dynamic() {
            head.extend(uint_word((head_len + tail.len()) as u128));
            if let Token::String(s) = token {
                tail.extend(encode_bytes(s.as_bytes()));
            }
        } else {
            head.extend(static_word(token));
        }
    }

    head.extend(tail);
    head
}

fn static_word(token: &Token) -> [u8; WORD] {
    match token {
        Token::Uint(v) => uint_word(*v),
        Token::Bool(b) => uint_word(*b as u128),
        Token::Address(a) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(a.as_bytes());
            word
        }
        Token::String(_) => unreachable!("dynamic tokens are encoded in the tail"),
    }
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = uint_word(data.len() as u128).to_vec();
    out.extend_from_slice(data);
    let padding = (WORD - data.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// Parameter shapes understood by [`decode_tokens`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Uint,
    Address,
    Bool,
    String,
}

/// Split calldata into its selector and argument payload
pub fn split_selector(data: &[u8]) -> Result<([u8; 4], &[u8])> {
    if data.len() < 4 {
        return Err(ChainError::Abi("calldata shorter than a selector".to_string()));
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    Ok((sel, &data[4..]))
}

/// Decode a flat argument list laid out as by [`encode_tokens`]
pub fn decode_tokens(data: &[u8], kinds: &[ParamKind]) -> Result<Vec<Token>> {
    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| {
            let word = word_at(data, index)?;
            Ok(match kind {
                ParamKind::Uint => Token::Uint(decode_uint(word)?),
                ParamKind::Bool => Token::Bool(decode_bool(word)?),
                ParamKind::Address => Token::Address(decode_address(word)?),
                ParamKind::String => {
                    let offset = usize::try_from(decode_uint(word)?)
                        .map_err(|_| ChainError::Abi("string offset too large".to_string()))?;
                    Token::String(decode_string_at(data, offset)?)
                }
            })
        })
        .collect()
}

fn decode_string_at(data: &[u8], offset: usize) -> Result<String> {
    let len_word = data
        .get(offset..offset + WORD)
        .ok_or_else(|| ChainError::Abi("string length out of bounds".to_string()))?;
    let len = usize::try_from(decode_uint(len_word)?)
        .map_err(|_| ChainError::Abi("string length too large".to_string()))?;
    let start = offset + WORD;
    let bytes = data
        .get(start..start + len)
        .ok_or_else(|| ChainError::Abi("string body out of bounds".to_string()))?;
    String::from_utf8(bytes.to_vec()).map_err(|e| ChainError::Abi(format!("invalid utf-8: {}", e)))
}

fn word_at(data: &[u8], index: usize) -> Result<&[u8]> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .ok_or_else(|| ChainError::Abi(format!("return data too short for word {}", index)))
}

pub fn decode_uint(word: &[u8]) -> Result<u128> {
    if word.len() != WORD {
        return Err(ChainError::Abi("uint word must be 32 bytes".to_string()));
    }
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ChainError::Abi("uint256 value exceeds u128".to_string()));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(bytes))
}

fn decode_u64(word: &[u8]) -> Result<u64> {
    u64::try_from(decode_uint(word)?)
        .map_err(|_| ChainError::Abi("value exceeds u64".to_string()))
}

fn decode_bool(word: &[u8]) -> Result<bool> {
    match decode_uint(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ChainError::Abi(format!("invalid bool word {}", other))),
    }
}

fn decode_address(word: &[u8]) -> Result<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ChainError::Abi("dirty address word".to_string()));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::from_bytes(bytes))
}

/// Decode the `getProject` return tuple
/// `(address creator, uint256 target, uint256 raised, uint256 deadline, bool active, bool withdrawn)`.
///
/// A zero creator means the contract has no such project.
pub fn decode_project(data: &[u8]) -> Result<Option<OnChainProject>> {
    if data.is_empty() {
        return Err(ChainError::Abi("empty return data".to_string()));
    }
    let creator = decode_address(word_at(data, 0)?)?;
    if creator.is_zero() {
        return Ok(None);
    }
    Ok(Some(OnChainProject {
        creator,
        target_amount: Wei::from_wei(decode_uint(word_at(data, 1)?)?),
        raised_amount: Wei::from_wei(decode_uint(word_at(data, 2)?)?),
        deadline: decode_u64(word_at(data, 3)?)?,
        is_active: decode_bool(word_at(data, 4)?)?,
        funds_withdrawn: decode_bool(word_at(data, 5)?)?,
    }))
}

/// Encode a `getProject` return tuple; used by tests and the simulated chain.
pub fn encode_project(project: &OnChainProject) -> Vec<u8> {
    encode_tokens(&[
        Token::Address(project.creator),
        Token::Uint(project.target_amount.as_wei()),
        Token::Uint(project.raised_amount.as_wei()),
        Token::Uint(project.deadline as u128),
        Token::Bool(project.is_active),
        Token::Bool(project.funds_withdrawn),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        // Well-known ERC-20 selector as a sanity check of the keccak wiring
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(
            hex::encode(event_topic("Transfer(address,address,uint256)")),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_string_argument_layout() {
        let data = encode_call(WITHDRAW_FUNDS, &[Token::String("proj-1".to_string())]);
        assert_eq!(data.len(), 4 + 3 * WORD);
        // offset of the string tail
        assert_eq!(decode_uint(&data[4..36]).unwrap(), 32);
        // length
        assert_eq!(decode_uint(&data[36..68]).unwrap(), 6);
        assert_eq!(&data[68..74], b"proj-1");
        assert!(data[74..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_mixed_arguments_offsets() {
        let encoded = encode_tokens(&[
            Token::String("abc".to_string()),
            Token::Uint(7),
            Token::String("x".repeat(40)),
        ]);
        // head: 3 words, first tail: 2 words, second tail: 1 + 2 words
        assert_eq!(encoded.len(), WORD * (3 + 2 + 3));
        assert_eq!(decode_uint(&encoded[0..32]).unwrap(), 96);
        assert_eq!(decode_uint(&encoded[32..64]).unwrap(), 7);
        assert_eq!(decode_uint(&encoded[64..96]).unwrap(), 160);

        let decoded = decode_tokens(
            &encoded,
            &[ParamKind::String, ParamKind::Uint, ParamKind::String],
        )
        .unwrap();
        assert_eq!(decoded[2], Token::String("x".repeat(40)));
    }

    #[test]
    fn test_truncated_calldata_rejected() {
        let data = encode_call(DONATE, &[
            Token::String("proj-1".to_string()),
            Token::String("good luck".to_string()),
        ]);
        let (sel, args) = split_selector(&data).unwrap();
        assert_eq!(sel, selector(DONATE));
        assert!(decode_tokens(&args[..70], &[ParamKind::String, ParamKind::String]).is_err());
        assert!(split_selector(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_project_decode() {
        let project = OnChainProject {
            creator: Address::from_bytes([0xab; 20]),
            target_amount: Wei::from_eth(20),
            raised_amount: Wei::parse_eth("10.5").unwrap(),
            deadline: 1_900_000_000,
            is_active: true,
            funds_withdrawn: false,
        };
        let decoded = decode_project(&encode_project(&project)).unwrap();
        assert_eq!(decoded, Some(project));

        let missing = vec![0u8; 6 * WORD];
        assert_eq!(decode_project(&missing).unwrap(), None);
        assert!(decode_project(&[]).is_err());
    }

    #[test]
    fn test_oversized_uint_rejected() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(decode_uint(&word).is_err());
    }
}
