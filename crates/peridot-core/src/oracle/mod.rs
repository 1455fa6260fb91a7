//! Price-oracle domain types: the closed set of source kinds, the shared
//! [`PriceState`] value, per-source state records, and the historical-series
//! types consumed by the volatility surface.

mod genesis;
mod msgs;

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
pub use genesis::GenesisState;
pub use msgs::{
    CoinbaseMessage,
    GrantBandRelayerPrivilege,
    GrantProviderPrivilege,
    GrantStorkPublisherPrivilege,
    RelayBandRates,
    RelayCoinbaseMessages,
    RelayProviderPrices,
    RelayPythPrices,
    RelayStorkPrices,
    RevokeBandRelayerPrivilege,
    RevokeProviderPrivilege,
    RevokeStorkPublisherPrivilege,
};
use rust_decimal::{
    Decimal,
    MathematicalOps as _,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::OracleError,
    primitive::Address,
};

/// Sentinel quote symbol meaning "return the base price unscaled".
pub const QUOTE_USD: &str = "USD";

/// Lookback window of the Coinbase time-weighted average price, in seconds.
pub const TWAP_WINDOW: i64 = 300;

/// Historical price records older than this are pruned, in seconds.
pub const MAX_HISTORICAL_PRICE_RECORD_AGE: i64 = 60 * 60 * 24 * 7;

/// Cadence, in blocks, of the historical-ledger pruning pass.
pub const HISTORY_PRUNE_INTERVAL: u64 = 100_000;

/// Raw Band rates are integers scaled by 1e9.
const BAND_PRICE_DECIMALS: u32 = 9;

/// Raw Coinbase price values are integers scaled by 1e6.
const COINBASE_PRICE_DECIMALS: u32 = 6;

/// The closed set of price sources. Adding a variant is intentionally a
/// compile error at every dispatch site.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum OracleType {
    Band,
    BandIbc,
    Coinbase,
    Chainlink,
    Provider,
    Pyth,
    Stork,
}

impl OracleType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Band => "band",
            Self::BandIbc => "bandibc",
            Self::Coinbase => "coinbase",
            Self::Chainlink => "chainlink",
            Self::Provider => "provider",
            Self::Pyth => "pyth",
            Self::Stork => "stork",
        }
    }
}

impl Display for OracleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OracleType {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "band" => Ok(Self::Band),
            "bandibc" => Ok(Self::BandIbc),
            "coinbase" => Ok(Self::Coinbase),
            "chainlink" => Ok(Self::Chainlink),
            "provider" => Ok(Self::Provider),
            "pyth" => Ok(Self::Pyth),
            "stork" => Ok(Self::Stork),
            other => Err(OracleError::InvalidInput(format!(
                "unknown oracle type `{other}`"
            ))),
        }
    }
}

/// Flash-move guard shared by the Pyth, Stork, Chainlink, and Band-IBC
/// adapters: an update deviating more than 100x (or below 1/100x) from the
/// last accepted price is dropped.
#[must_use]
pub fn exceeds_deviation_threshold(last_price: Decimal, new_price: Decimal) -> bool {
    if last_price <= Decimal::ZERO || new_price <= Decimal::ZERO {
        return false;
    }
    let hundred = Decimal::from(100_u32);
    new_price > last_price * hundred || new_price < last_price / hundred
}

/// Converts a raw Band rate into a price.
#[must_use]
pub fn band_rate_to_price(rate: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(rate), BAND_PRICE_DECIMALS)
}

/// Converts a raw Coinbase price value into a price.
#[must_use]
pub fn coinbase_value_to_price(value: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(value), COINBASE_PRICE_DECIMALS)
}

/// Builds `value * 10^expo` as a decimal, as used by Pyth attestations.
/// Returns `None` when the exponent is outside the representable range.
#[must_use]
pub fn scaled_decimal(value: i64, expo: i32) -> Option<Decimal> {
    if expo >= 0 {
        let factor = Decimal::from(10_u32).checked_powi(i64::from(expo))?;
        Decimal::from(value).checked_mul(factor)
    } else {
        let scale = u32::try_from(-i64::from(expo)).ok()?;
        if scale > 28 {
            return None;
        }
        Some(Decimal::from_i128_with_scale(i128::from(value), scale))
    }
}

/// Normalises a Stork timestamp to nanoseconds; publishers report seconds,
/// milliseconds, microseconds, or nanoseconds depending on their stack.
#[must_use]
pub fn timestamp_to_nanoseconds(timestamp: u64) -> u64 {
    if timestamp < 1_000_000_000_000 {
        timestamp.saturating_mul(1_000_000_000)
    } else if timestamp < 1_000_000_000_000_000 {
        timestamp.saturating_mul(1_000_000)
    } else if timestamp < 1_000_000_000_000_000_000 {
        timestamp.saturating_mul(1_000)
    } else {
        timestamp
    }
}

/// The shared per-key price value: spot price, time-cumulative price, and
/// the block timestamp of the last update.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PriceState {
    pub price: Decimal,
    pub cumulative_price: Decimal,
    pub timestamp: i64,
}

impl PriceState {
    #[must_use]
    pub fn new(price: Decimal, timestamp: i64) -> Self {
        Self {
            price,
            cumulative_price: Decimal::ZERO,
            timestamp,
        }
    }

    /// Advances the cumulative by the previously stored price over the
    /// elapsed interval, then overwrites price and timestamp.
    pub fn update(&mut self, price: Decimal, timestamp: i64) {
        if self.timestamp > 0 {
            let elapsed = Decimal::from(timestamp.saturating_sub(self.timestamp));
            self.cumulative_price += self.price * elapsed;
        }
        self.price = price;
        self.timestamp = timestamp;
    }
}

/// One historical sample.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PriceRecord {
    pub timestamp: i64,
    pub price: Decimal,
}

/// The retained series for one `(oracle_type, symbol)` key, ordered by
/// strictly increasing timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecords {
    pub oracle_type: OracleType,
    pub symbol: String,
    pub records: Vec<PriceRecord>,
}

/// Index entry tracking the most recent record timestamp per series, so the
/// pruner can decide eligibility without loading every series.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SymbolPriceTimestamp {
    pub oracle_type: OracleType,
    pub symbol: String,
    pub timestamp: i64,
}

/// Sets or inserts the timestamp for `(oracle_type, symbol)` in the index.
pub fn set_last_price_timestamp(
    index: &mut Vec<SymbolPriceTimestamp>,
    oracle_type: OracleType,
    symbol: &str,
    timestamp: i64,
) {
    if let Some(entry) = index
        .iter_mut()
        .find(|e| e.oracle_type == oracle_type && e.symbol == symbol)
    {
        entry.timestamp = timestamp;
    } else {
        index.push(SymbolPriceTimestamp {
            oracle_type,
            symbol: symbol.to_string(),
            timestamp,
        });
    }
}

/// A resolved pair price together with both legs' cumulative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePairState {
    pub pair_price: Decimal,
    pub base_price: Decimal,
    pub quote_price: Decimal,
    pub base_cumulative_price: Decimal,
    pub quote_cumulative_price: Decimal,
    pub base_timestamp: i64,
    pub quote_timestamp: i64,
}

/// Summary statistics over a series of price records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStatistics {
    pub mean: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub median_price: Decimal,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub records_sample_size: u32,
    pub twap: Decimal,
    /// Population standard deviation; zero for a single sample.
    pub std_dev: Decimal,
}

/// Options for the volatility query surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleHistoryOptions {
    /// Only records within `max_age` seconds of the block time are
    /// considered; zero means unbounded.
    pub max_age: u64,
    pub include_raw_history: bool,
    pub include_metadata: bool,
}

/// Identifies one leg of a volatility query.
#[derive(Debug, Clone)]
pub struct OracleInfo {
    pub oracle_type: OracleType,
    pub symbol: String,
}

/// Module parameters for the oracle side.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct OracleParams {
    /// Gates relayer/publisher allow-list mutations.
    pub admin: Address,
    /// Address Coinbase price messages must recover to.
    pub coinbase_signer: Address,
}

/// Stored state of the Band and Band-IBC adapters. The raw integer rate is
/// retained alongside the converted price.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct BandPriceState {
    pub symbol: String,
    pub rate: u64,
    pub resolve_time: u64,
    pub request_id: u64,
    pub price_state: PriceState,
}

/// Stored state of the Coinbase adapter: the accepted signed message plus
/// the derived price state.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct CoinbasePriceState {
    /// Message kind; only `"prices"` is accepted.
    pub kind: String,
    pub timestamp: u64,
    pub key: String,
    pub value: u64,
    pub price_state: PriceState,
}

/// One Pyth price attestation from a relayed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAttestation {
    pub price_id: [u8; 32],
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub ema_price: i64,
    pub ema_conf: u64,
    pub ema_expo: i32,
    pub publish_time: i64,
}

impl PriceAttestation {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.price_id == [0_u8; 32] {
            return Err(OracleError::InvalidInput("empty pyth price id".into()));
        }
        if self.price <= 0 {
            return Err(OracleError::InvalidInput(
                "pyth attestation price must be positive".into(),
            ));
        }
        if self.publish_time <= 0 {
            return Err(OracleError::InvalidInput(
                "pyth attestation publish time must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Stored state of the Pyth adapter.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PythPriceState {
    pub price_id: [u8; 32],
    pub ema_price: Decimal,
    pub ema_conf: Decimal,
    pub conf: Decimal,
    pub publish_time: i64,
    pub price_state: PriceState,
}

/// One publisher's signed price within a Stork asset pair batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPriceOfAssetPair {
    pub publisher: Address,
    pub timestamp: u64,
    pub price: Decimal,
}

/// One Stork asset pair batch entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPair {
    pub asset_id: String,
    pub signed_prices: Vec<SignedPriceOfAssetPair>,
}

/// Stored state of the Stork adapter; `timestamp` is in nanoseconds.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct StorkPriceState {
    pub symbol: String,
    pub timestamp: u64,
    pub price_state: PriceState,
}

/// Registration record of a generic price provider and its relayers.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ProviderInfo {
    pub provider: String,
    pub relayers: Vec<Address>,
}

/// Stored state of one (provider, symbol) price.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ProviderPriceState {
    pub symbol: String,
    pub price_state: PriceState,
}

/// A provider together with all its price states, as exported in genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub provider_info: ProviderInfo,
    pub price_states: Vec<ProviderPriceState>,
}

/// Stored state of the Chainlink-style adapter, fed exclusively by accepted
/// OCR transmissions.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ChainlinkPriceState {
    pub feed_id: String,
    pub answer: Decimal,
    pub price_state: PriceState,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn deviation_threshold_bounds() {
        let last = dec!(10);
        assert!(!exceeds_deviation_threshold(last, dec!(1000)));
        assert!(exceeds_deviation_threshold(last, dec!(1000.1)));
        assert!(!exceeds_deviation_threshold(last, dec!(0.1)));
        assert!(exceeds_deviation_threshold(last, dec!(0.0999)));
    }

    #[test]
    fn cumulative_price_advances_by_old_price() {
        let mut state = PriceState::new(dec!(10), 100);
        state.update(dec!(20), 130);
        // 10 * 30s elapsed
        assert_eq!(state.cumulative_price, dec!(300));
        assert_eq!(state.price, dec!(20));
        assert_eq!(state.timestamp, 130);
    }

    #[test]
    fn band_rate_scaling() {
        assert_eq!(band_rate_to_price(2_500_000_000), dec!(2.5));
    }

    #[test]
    fn pyth_exponent_scaling() {
        assert_eq!(scaled_decimal(12_345, -2), Some(dec!(123.45)));
        assert_eq!(scaled_decimal(7, 3), Some(dec!(7000)));
        assert_eq!(scaled_decimal(1, -40), None);
    }

    #[test]
    fn stork_timestamp_normalisation() {
        let seconds = 1_700_000_000_u64;
        let nanos = seconds * 1_000_000_000;
        assert_eq!(timestamp_to_nanoseconds(seconds), nanos);
        assert_eq!(timestamp_to_nanoseconds(seconds * 1_000), nanos);
        assert_eq!(timestamp_to_nanoseconds(seconds * 1_000_000), nanos);
        assert_eq!(timestamp_to_nanoseconds(nanos), nanos);
    }
}
