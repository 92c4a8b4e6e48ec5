//! The signed trade intent and its EIP-712 encoding.

use {
    crate::{
        h160_hexadecimal,
        signature::{hashed_eip712_message, EcdsaSignature},
        u256_decimal, DomainSeparator, TokenPair,
    },
    lazy_static::lazy_static,
    primitive_types::{H160, U256},
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    std::fmt::{self, Display},
    web3::signing::{self, Key, SecretKeyRef},
};

/// Which side of the swap the signer framed their intent as.
///
/// The kind selects the EIP-712 primary type, so it is part of the signed
/// payload: the same physical fields framed as a sell and as a buy produce
/// different digests.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Deserialize, Serialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Buy,
    Sell,
}

impl OrderKind {
    fn type_hash(&self) -> [u8; 32] {
        lazy_static! {
            static ref SELL_ORDER_TYPE_HASH: [u8; 32] = signing::keccak256(
                b"SellOrder(address account,address sellToken,uint256 sellAmount,\
                  address buyToken,uint256 buyAmount,uint256 expireBy)",
            );
            static ref BUY_ORDER_TYPE_HASH: [u8; 32] = signing::keccak256(
                b"BuyOrder(address account,address sellToken,uint256 sellAmount,\
                  address buyToken,uint256 buyAmount,uint256 expireBy)",
            );
        }
        match self {
            OrderKind::Sell => *SELL_ORDER_TYPE_HASH,
            OrderKind::Buy => *BUY_ORDER_TYPE_HASH,
        }
    }
}

/// A trade intent as signed by one counterparty.
///
/// Immutable once signed; its identity is the signature over its encoding.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Deserialize, Serialize, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(with = "h160_hexadecimal")]
    pub account: H160,
    #[serde(with = "h160_hexadecimal")]
    pub sell_token: H160,
    #[serde(with = "u256_decimal")]
    pub sell_amount: U256,
    #[serde(with = "h160_hexadecimal")]
    pub buy_token: H160,
    #[serde(with = "u256_decimal")]
    pub buy_amount: U256,
    /// Expiry in epoch seconds; the order settles while `now <= expire_by`.
    pub expire_by: u64,
    pub kind: OrderKind,
}

impl Order {
    pub fn token_pair(&self) -> Option<TokenPair> {
        TokenPair::new(self.buy_token, self.sell_token)
    }

    pub fn hash_struct(&self) -> [u8; 32] {
        let mut hash_data = [0u8; 224];
        hash_data[0..32].copy_from_slice(&self.kind.type_hash());
        // Some slots are not assigned (stay 0) because all values are extended to 256 bits.
        hash_data[44..64].copy_from_slice(self.account.as_fixed_bytes());
        hash_data[76..96].copy_from_slice(self.sell_token.as_fixed_bytes());
        self.sell_amount.to_big_endian(&mut hash_data[96..128]);
        hash_data[140..160].copy_from_slice(self.buy_token.as_fixed_bytes());
        self.buy_amount.to_big_endian(&mut hash_data[160..192]);
        hash_data[216..224].copy_from_slice(&self.expire_by.to_be_bytes());
        signing::keccak256(&hash_data)
    }

    pub fn uid(&self, domain: &DomainSeparator) -> OrderUid {
        let mut uid = OrderUid([0u8; 60]);
        uid.0[0..32].copy_from_slice(&hashed_eip712_message(domain, &self.hash_struct()));
        uid.0[32..52].copy_from_slice(self.account.as_fixed_bytes());
        uid.0[52..60].copy_from_slice(&self.expire_by.to_be_bytes());
        uid
    }
}

pub struct OrderBuilder(Order);

impl Default for OrderBuilder {
    fn default() -> Self {
        Self(Order {
            account: H160::zero(),
            sell_token: H160::zero(),
            sell_amount: U256::zero(),
            buy_token: H160::zero(),
            buy_amount: U256::zero(),
            expire_by: u64::MAX,
            kind: OrderKind::Sell,
        })
    }
}

impl OrderBuilder {
    pub fn with_sell_token(mut self, sell_token: H160) -> Self {
        self.0.sell_token = sell_token;
        self
    }

    pub fn with_sell_amount(mut self, sell_amount: U256) -> Self {
        self.0.sell_amount = sell_amount;
        self
    }

    pub fn with_buy_token(mut self, buy_token: H160) -> Self {
        self.0.buy_token = buy_token;
        self
    }

    pub fn with_buy_amount(mut self, buy_amount: U256) -> Self {
        self.0.buy_amount = buy_amount;
        self
    }

    pub fn with_expire_by(mut self, expire_by: u64) -> Self {
        self.0.expire_by = expire_by;
        self
    }

    pub fn with_kind(mut self, kind: OrderKind) -> Self {
        self.0.kind = kind;
        self
    }

    /// Sets the account from the key and signs the order under `domain`.
    pub fn sign_with(self, domain: &DomainSeparator, key: SecretKeyRef) -> (Order, EcdsaSignature) {
        let mut order = self.0;
        order.account = key.address();
        let signature = EcdsaSignature::sign(domain, &order.hash_struct(), key);
        (order, signature)
    }

    pub fn build(self) -> Order {
        self.0
    }
}

// uid as 60 bytes: 32 for the signing digest, 20 for the account and 8 for expireBy
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct OrderUid(pub [u8; 60]);

impl Display for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = [0u8; 2 + 60 * 2];
        bytes[..2].copy_from_slice(b"0x");
        // Unwrap because the length is always correct.
        hex::encode_to_slice(self.0, &mut bytes[2..]).unwrap();
        // Unwrap because the string is always valid utf8.
        let str = std::str::from_utf8(&bytes).unwrap();
        f.write_str(str)
    }
}

impl fmt::Debug for OrderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Serialize for OrderUid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for OrderUid {
    fn deserialize<D>(deserializer: D) -> Result<OrderUid, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor {}
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = OrderUid;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an uid with digest_account_expireBy")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let s = s.strip_prefix("0x").ok_or_else(|| {
                    de::Error::custom(format!(
                        "{s:?} can't be decoded as hex uid because it does not start with '0x'",
                    ))
                })?;
                let mut value = [0u8; 60];
                hex::decode_to_slice(s, value.as_mut()).map_err(|err| {
                    de::Error::custom(format!("failed to decode {s:?} as hex uid: {err}"))
                })?;
                Ok(OrderUid(value))
            }
        }

        deserializer.deserialize_str(Visitor {})
    }
}
