//! Single-use spend authorizations in the ERC-2612 permit format.

use {
    crate::{h160_hexadecimal, signature::EcdsaSignature, u256_decimal, DomainSeparator},
    lazy_static::lazy_static,
    primitive_types::{H160, U256},
    serde::{Deserialize, Serialize},
    web3::signing::{self, SecretKeyRef},
};

/// A signed permission allowing `spender` to move up to `value` of a token
/// on the owner's behalf, until `deadline`.
///
/// Only the five permit fields are signed; the token binds through the
/// domain separator of the token contract the permit was signed under.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Deserialize, Serialize, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Permit {
    #[serde(with = "h160_hexadecimal")]
    pub owner: H160,
    #[serde(with = "h160_hexadecimal")]
    pub spender: H160,
    /// The token this permit is for. Routing information for the engine,
    /// not part of the signed fields.
    #[serde(with = "h160_hexadecimal")]
    pub token: H160,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    #[serde(with = "u256_decimal")]
    pub nonce: U256,
    /// Deadline in epoch seconds; the permit is usable while `now <= deadline`.
    pub deadline: u64,
}

impl Permit {
    pub fn hash_struct(&self) -> [u8; 32] {
        lazy_static! {
            static ref PERMIT_TYPE_HASH: [u8; 32] = signing::keccak256(
                b"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)",
            );
        }
        let mut hash_data = [0u8; 192];
        hash_data[0..32].copy_from_slice(&*PERMIT_TYPE_HASH);
        // Some slots are not assigned (stay 0) because all values are extended to 256 bits.
        hash_data[44..64].copy_from_slice(self.owner.as_fixed_bytes());
        hash_data[76..96].copy_from_slice(self.spender.as_fixed_bytes());
        self.value.to_big_endian(&mut hash_data[96..128]);
        self.nonce.to_big_endian(&mut hash_data[128..160]);
        hash_data[184..192].copy_from_slice(&self.deadline.to_be_bytes());
        signing::keccak256(&hash_data)
    }

    /// Signs the permit under the token contract's domain. The engine will
    /// only accept the result if the key belongs to `owner`.
    pub fn sign(&self, domain: &DomainSeparator, key: SecretKeyRef) -> EcdsaSignature {
        EcdsaSignature::sign(domain, &self.hash_struct(), key)
    }
}
