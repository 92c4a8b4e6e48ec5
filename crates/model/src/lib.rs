//! Types shared between the parties that sign swap intents off-channel and
//! the engine that settles them: orders, spend permits, signatures and the
//! EIP-712 plumbing that ties them to one deployment.

pub mod h160_hexadecimal;
pub mod order;
pub mod permit;
pub mod signature;
pub mod time;
pub mod u256_decimal;

use {
    hex::{FromHex, FromHexError},
    lazy_static::lazy_static,
    primitive_types::H160,
    std::fmt,
    web3::{
        ethabi::{encode, Token},
        signing,
    },
};

/// Scopes every signature to one deployment: a signature produced for a
/// different name, version, network or contract verifies to a different
/// separator and therefore never replays here.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub struct DomainSeparator(pub [u8; 32]);

impl DomainSeparator {
    pub fn new(name: &str, version: &str, chain_id: u64, verifying_contract: H160) -> Self {
        lazy_static! {
            /// The EIP-712 domain type used for computing the domain separator.
            static ref DOMAIN_TYPE_HASH: [u8; 32] = signing::keccak256(
                b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
            );
        }
        let abi_encode_string = encode(&[
            Token::Uint((*DOMAIN_TYPE_HASH).into()),
            Token::Uint(signing::keccak256(name.as_bytes()).into()),
            Token::Uint(signing::keccak256(version.as_bytes()).into()),
            Token::Uint(chain_id.into()),
            Token::Address(verifying_contract),
        ]);
        DomainSeparator(signing::keccak256(abi_encode_string.as_slice()))
    }
}

impl std::str::FromStr for DomainSeparator {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(FromHex::from_hex(s)?))
    }
}

impl fmt::Debug for DomainSeparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hex = [0u8; 64];
        // Unwrap because we know the length is correct.
        hex::encode_to_slice(self.0, &mut hex).unwrap();
        // Unwrap because we know it is valid utf8.
        f.write_str(std::str::from_utf8(&hex).unwrap())
    }
}

/// Erc20 token pair specified by two contract addresses.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TokenPair(H160, H160);

impl TokenPair {
    /// Create a new token pair from two addresses.
    /// The addresses must not be the equal.
    pub fn new(token_a: H160, token_b: H160) -> Option<Self> {
        match token_a.cmp(&token_b) {
            std::cmp::Ordering::Less => Some(Self(token_a, token_b)),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(Self(token_b, token_a)),
        }
    }

    /// Used to determine if `token` is among the pair.
    pub fn contains(&self, token: &H160) -> bool {
        self.0 == *token || self.1 == *token
    }

    /// The first address is always the lower one.
    /// The addresses are never equal.
    pub fn get(&self) -> (H160, H160) {
        (self.0, self.1)
    }
}
