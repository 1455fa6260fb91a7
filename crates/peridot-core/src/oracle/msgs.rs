//! Oracle relay and allow-list messages, with their stateless validation.

use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest as _,
    Sha256,
};

use crate::{
    error::OracleError,
    oracle::{
        AssetPair,
        PriceAttestation,
    },
    primitive::Address,
};

/// Relays a batch of Band standard-dataset rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayBandRates {
    pub sender: Address,
    pub symbols: Vec<String>,
    pub rates: Vec<u64>,
    pub resolve_times: Vec<u64>,
    pub request_ids: Vec<u64>,
}

impl RelayBandRates {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.symbols.is_empty() {
            return Err(OracleError::InvalidInput("empty band rate batch".into()));
        }
        if self.symbols.len() != self.rates.len()
            || self.symbols.len() != self.resolve_times.len()
            || self.symbols.len() != self.request_ids.len()
        {
            return Err(OracleError::InvalidInput(
                "band rate batch arrays must have equal length".into(),
            ));
        }
        Ok(())
    }
}

/// One signed Coinbase price message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseMessage {
    pub kind: String,
    pub timestamp: u64,
    pub key: String,
    pub value: u64,
    /// 65-byte recoverable secp256k1 signature over [`Self::signing_digest`].
    pub signature: Vec<u8>,
}

impl CoinbaseMessage {
    /// The digest the Coinbase attestor signs: SHA-256 over the
    /// borsh-encoded message body.
    pub fn signing_digest(&self) -> Result<[u8; 32], OracleError> {
        let body = (&self.kind, self.timestamp, &self.key, self.value);
        let bytes = borsh::to_vec(&body)
            .map_err(|e| OracleError::InvalidInput(format!("encoding coinbase message: {e}")))?;
        Ok(Sha256::digest(&bytes).into())
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.kind != "prices" {
            return Err(OracleError::InvalidInput(format!(
                "unsupported coinbase message kind `{}`",
                self.kind
            )));
        }
        if self.key.is_empty() {
            return Err(OracleError::InvalidInput(
                "coinbase message key must not be empty".into(),
            ));
        }
        if self.value == 0 {
            return Err(OracleError::InvalidInput(
                "coinbase message value must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Relays a batch of signed Coinbase price messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCoinbaseMessages {
    pub sender: Address,
    pub messages: Vec<CoinbaseMessage>,
}

impl RelayCoinbaseMessages {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.messages.is_empty() {
            return Err(OracleError::InvalidInput(
                "empty coinbase message batch".into(),
            ));
        }
        for message in &self.messages {
            message.validate()?;
        }
        Ok(())
    }
}

/// Relays a batch of prices for one registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProviderPrices {
    pub sender: Address,
    pub provider: String,
    pub symbols: Vec<String>,
    pub prices: Vec<Decimal>,
}

impl RelayProviderPrices {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.provider.is_empty() {
            return Err(OracleError::InvalidInput("empty provider name".into()));
        }
        if self.symbols.is_empty() || self.symbols.len() != self.prices.len() {
            return Err(OracleError::InvalidInput(
                "provider price batch arrays must be non-empty and of equal length".into(),
            ));
        }
        if self.prices.iter().any(|p| *p <= Decimal::ZERO) {
            return Err(OracleError::InvalidInput(
                "provider prices must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Relays a batch of Pyth price attestations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPythPrices {
    pub sender: Address,
    pub price_attestations: Vec<PriceAttestation>,
}

impl RelayPythPrices {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.price_attestations.is_empty() {
            return Err(OracleError::InvalidInput(
                "empty pyth attestation batch".into(),
            ));
        }
        for attestation in &self.price_attestations {
            attestation.validate()?;
        }
        Ok(())
    }
}

/// Relays a batch of Stork asset pairs, each carrying publisher-signed
/// prices that are medianised on acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStorkPrices {
    pub sender: Address,
    pub asset_pairs: Vec<AssetPair>,
}

impl RelayStorkPrices {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.asset_pairs.is_empty() {
            return Err(OracleError::InvalidInput("empty stork batch".into()));
        }
        for pair in &self.asset_pairs {
            if pair.asset_id.is_empty() {
                return Err(OracleError::InvalidInput("empty stork asset id".into()));
            }
            if pair.signed_prices.is_empty() {
                return Err(OracleError::InvalidInput(format!(
                    "stork asset `{}` carries no signed prices",
                    pair.asset_id
                )));
            }
            let mut publishers: Vec<Address> =
                pair.signed_prices.iter().map(|p| p.publisher).collect();
            publishers.sort_unstable();
            publishers.dedup();
            if publishers.len() != pair.signed_prices.len() {
                return Err(OracleError::InvalidInput(format!(
                    "duplicate publisher in stork asset `{}`",
                    pair.asset_id
                )));
            }
        }
        Ok(())
    }
}

/// Admin message registering a provider, or extending its relayer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantProviderPrivilege {
    pub sender: Address,
    pub provider: String,
    pub relayers: Vec<Address>,
}

/// Admin message removing relayers from a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeProviderPrivilege {
    pub sender: Address,
    pub provider: String,
    pub relayers: Vec<Address>,
}

/// Admin message adding Band relayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantBandRelayerPrivilege {
    pub sender: Address,
    pub relayers: Vec<Address>,
}

/// Admin message removing Band relayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeBandRelayerPrivilege {
    pub sender: Address,
    pub relayers: Vec<Address>,
}

/// Admin message adding Stork publishers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantStorkPublisherPrivilege {
    pub sender: Address,
    pub publishers: Vec<Address>,
}

/// Admin message removing Stork publishers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeStorkPublisherPrivilege {
    pub sender: Address,
    pub publishers: Vec<Address>,
}

fn validate_address_list(addrs: &[Address], what: &str) -> Result<(), OracleError> {
    if addrs.is_empty() {
        return Err(OracleError::InvalidInput(format!("empty {what} list")));
    }
    let mut sorted = addrs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != addrs.len() {
        return Err(OracleError::InvalidInput(format!("duplicate {what}")));
    }
    Ok(())
}

impl GrantProviderPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.provider.is_empty() {
            return Err(OracleError::InvalidInput("empty provider name".into()));
        }
        validate_address_list(&self.relayers, "relayer")
    }
}

impl RevokeProviderPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.provider.is_empty() {
            return Err(OracleError::InvalidInput("empty provider name".into()));
        }
        validate_address_list(&self.relayers, "relayer")
    }
}

impl GrantBandRelayerPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        validate_address_list(&self.relayers, "relayer")
    }
}

impl RevokeBandRelayerPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        validate_address_list(&self.relayers, "relayer")
    }
}

impl GrantStorkPublisherPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        validate_address_list(&self.publishers, "publisher")
    }
}

impl RevokeStorkPublisherPrivilege {
    pub fn validate(&self) -> Result<(), OracleError> {
        validate_address_list(&self.publishers, "publisher")
    }
}
