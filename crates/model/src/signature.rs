use {
    crate::DomainSeparator,
    primitive_types::{H160, H256},
    serde::{de, Deserialize, Serialize},
    std::fmt,
    thiserror::Error,
    web3::{
        signing::{self, Key, SecretKeyRef},
        types::Recovery,
    },
};

/// An ECDSA signature over the EIP-712 digest of a typed message,
/// ordered as r, s, v.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default, Hash)]
pub struct EcdsaSignature {
    pub r: H256,
    pub s: H256,
    pub v: u8,
}

/// Recovery failed to produce an account.
///
/// A malformed signature is rejected here instead of recovering to an
/// arbitrary account.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("malformed signature: {0}")]
    Malformed(#[from] signing::RecoveryError),
}

/// The digest that is actually signed: domain separator and struct hash
/// behind the EIP-191 `\x19\x01` prefix.
pub fn hashed_eip712_message(
    domain_separator: &DomainSeparator,
    struct_hash: &[u8; 32],
) -> [u8; 32] {
    let mut message = [0u8; 66];
    message[0..2].copy_from_slice(&[0x19, 0x01]);
    message[2..34].copy_from_slice(&domain_separator.0);
    message[34..66].copy_from_slice(struct_hash);
    signing::keccak256(&message)
}

impl EcdsaSignature {
    /// r + s + v
    pub fn to_bytes(self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(self.r.as_bytes());
        bytes[32..64].copy_from_slice(self.s.as_bytes());
        bytes[64] = self.v;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        EcdsaSignature {
            r: H256::from_slice(&bytes[..32]),
            s: H256::from_slice(&bytes[32..64]),
            v: bytes[64],
        }
    }

    /// Recovers the account that signed `struct_hash` under `domain_separator`.
    ///
    /// Pure: identical inputs always recover the identical account.
    pub fn recover(
        &self,
        domain_separator: &DomainSeparator,
        struct_hash: &[u8; 32],
    ) -> Result<H160, RecoveryError> {
        let message = hashed_eip712_message(domain_separator, struct_hash);
        let recovery = Recovery::new(message, self.v as u64, self.r, self.s);
        let (signature, recovery_id) = recovery
            .as_signature()
            .ok_or(RecoveryError::InvalidRecoveryId(self.v))?;
        Ok(signing::recover(&message, &signature, recovery_id)?)
    }

    pub fn sign(
        domain_separator: &DomainSeparator,
        struct_hash: &[u8; 32],
        key: SecretKeyRef,
    ) -> Self {
        let message = hashed_eip712_message(domain_separator, struct_hash);
        // Unwrap because the only error is for invalid messages which we don't create.
        let signature = key.sign(&message, None).unwrap();
        Self {
            v: signature.v as u8,
            r: signature.r,
            s: signature.s,
        }
    }
}

impl Serialize for EcdsaSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut bytes = [0u8; 2 + 65 * 2];
        bytes[..2].copy_from_slice(b"0x");
        // Can only fail if the buffer size does not match but we know it is correct.
        hex::encode_to_slice(self.to_bytes(), &mut bytes[2..]).unwrap();
        // Hex encoding is always valid utf8.
        let str = std::str::from_utf8(&bytes).unwrap();
        serializer.serialize_str(str)
    }
}

impl<'de> Deserialize<'de> for EcdsaSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor {}
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = EcdsaSignature;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "the 65 ecdsa signature bytes as a hex encoded string, ordered as r, s, v"
                )
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let s = s.strip_prefix("0x").ok_or_else(|| {
                    de::Error::custom(format!(
                        "{s:?} can't be decoded as hex ecdsa signature because it does not start with '0x'",
                    ))
                })?;
                let mut bytes = [0u8; 65];
                hex::decode_to_slice(s, &mut bytes).map_err(|err| {
                    de::Error::custom(format!(
                        "failed to decode {s:?} as hex ecdsa signature: {err}"
                    ))
                })?;
                Ok(EcdsaSignature::from_bytes(&bytes))
            }
        }

        deserializer.deserialize_str(Visitor {})
    }
}

#[cfg(test)]
mod tests {
    use {super::*, hex_literal::hex, secp256k1::SecretKey, serde_json::json};

    fn domain() -> DomainSeparator {
        DomainSeparator::new("Exchange", "1", 31337, H160::from_low_u64_be(0xbb))
    }

    #[test]
    fn recover_is_deterministic_and_bound_to_the_signer() {
        let key = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let signer = SecretKeyRef::new(&key).address();
        let struct_hash = signing::keccak256(b"some struct");

        let signature = EcdsaSignature::sign(&domain(), &struct_hash, SecretKeyRef::new(&key));
        assert_eq!(signature.recover(&domain(), &struct_hash).unwrap(), signer);
        assert_eq!(signature.recover(&domain(), &struct_hash).unwrap(), signer);
    }

    #[test]
    fn tampered_message_does_not_recover_the_signer() {
        let key = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let signer = SecretKeyRef::new(&key).address();
        let mut struct_hash = signing::keccak256(b"some struct");

        let signature = EcdsaSignature::sign(&domain(), &struct_hash, SecretKeyRef::new(&key));
        struct_hash[0] ^= 1;
        match signature.recover(&domain(), &struct_hash) {
            Ok(recovered) => assert_ne!(recovered, signer),
            Err(RecoveryError::Malformed(_)) => (),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn invalid_recovery_id_is_rejected() {
        let signature = EcdsaSignature {
            r: H256::from_low_u64_be(1),
            s: H256::from_low_u64_be(2),
            v: 2,
        };
        let struct_hash = signing::keccak256(b"some struct");
        assert!(matches!(
            signature.recover(&domain(), &struct_hash),
            Err(RecoveryError::InvalidRecoveryId(2))
        ));
    }

    #[test]
    fn out_of_range_s_is_rejected() {
        let signature = EcdsaSignature {
            r: H256::from_low_u64_be(1),
            s: hex!("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff").into(),
            v: 27,
        };
        let struct_hash = signing::keccak256(b"some struct");
        assert!(matches!(
            signature.recover(&domain(), &struct_hash),
            Err(RecoveryError::Malformed(_))
        ));
    }

    #[test]
    fn serialization_and_back() {
        let signature = EcdsaSignature {
            r: H256::from_low_u64_be(3),
            s: H256::from_low_u64_be(5),
            v: 27,
        };
        let value = json!(
            "0x0000000000000000000000000000000000000000000000000000000000000003\
             00000000000000000000000000000000000000000000000000000000000000051b"
        );
        let serialized = serde_json::to_value(signature).unwrap();
        assert_eq!(serialized, value);
        let deserialized: EcdsaSignature = serde_json::from_value(value).unwrap();
        assert_eq!(deserialized, signature);
    }
}
