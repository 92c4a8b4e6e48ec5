use {
    primitive_types::H160,
    serde::{de, Deserializer, Serializer},
    std::fmt,
};

pub fn serialize<S>(value: &H160, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut bytes = [0u8; 2 + 20 * 2];
    bytes[..2].copy_from_slice(b"0x");
    // Can only fail if the buffer size does not match but we know it is correct.
    hex::encode_to_slice(value, &mut bytes[2..]).unwrap();
    // Hex encoding is always valid utf8.
    let s = std::str::from_utf8(&bytes).unwrap();
    serializer.serialize_str(s)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<H160, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor {}
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = H160;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "an account address as a hex encoded string")
        }

        fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let s = s.strip_prefix("0x").ok_or_else(|| {
                de::Error::custom(format!(
                    "{s:?} can't be decoded as hex H160 because it does not start with '0x'",
                ))
            })?;
            let mut bytes = [0u8; 20];
            hex::decode_to_slice(s, &mut bytes).map_err(|err| {
                de::Error::custom(format!("failed to decode {s:?} as hex H160: {err}"))
            })?;
            Ok(H160(bytes))
        }
    }

    deserializer.deserialize_str(Visitor {})
}
