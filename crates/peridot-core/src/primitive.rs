use std::{
    fmt::{
        self,
        Display,
        Formatter,
    },
    str::FromStr,
};

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account address, displayed as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    #[must_use]
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Derives the address of a secp256k1 key: the trailing 20 bytes of the
    /// SHA-256 digest of its compressed SEC1 encoding.
    #[must_use]
    pub fn from_verifying_key(key: &k256::ecdsa::VerifyingKey) -> Self {
        use sha2::Digest as _;
        let digest = sha2::Sha256::digest(key.to_encoded_point(true).as_bytes());
        let mut bytes = [0_u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
        Self(bytes)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("address hex decoding failed")]
    Hex(#[from] hex::FromHexError),
    #[error("address must be {ADDRESS_LEN} bytes, got {0}")]
    BadLength(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| AddressParseError::BadLength(b.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An amount of a single denomination.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Coin {
    pub denom: String,
    pub amount: u128,
}

impl Coin {
    #[must_use]
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl Display for Coin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let addr = Address::new([0xab; ADDRESS_LEN]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn address_parse_rejects_bad_length() {
        assert!(matches!(
            "0xabcd".parse::<Address>(),
            Err(AddressParseError::BadLength(2))
        ));
    }

    #[test]
    fn address_serde_as_hex_string() {
        let addr = Address::new([1; ADDRESS_LEN]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }
}
