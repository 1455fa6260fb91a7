//! Genesis snapshot of the oracle side: allow lists, per-adapter price
//! states, and the historical ledger.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    oracle::{
        BandPriceState,
        ChainlinkPriceState,
        CoinbasePriceState,
        OracleParams,
        PriceRecords,
        ProviderState,
        PythPriceState,
        StorkPriceState,
    },
    primitive::Address,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub params: OracleParams,
    pub band_relayers: Vec<Address>,
    pub band_price_states: Vec<BandPriceState>,
    pub band_ibc_price_states: Vec<BandPriceState>,
    pub coinbase_price_states: Vec<CoinbasePriceState>,
    pub pyth_price_states: Vec<PythPriceState>,
    pub stork_publishers: Vec<Address>,
    pub stork_price_states: Vec<StorkPriceState>,
    pub provider_states: Vec<ProviderState>,
    pub chainlink_price_states: Vec<ChainlinkPriceState>,
    pub historical_price_records: Vec<PriceRecords>,
}

impl GenesisState {
    /// A minimal genesis carrying only the module parameters.
    #[must_use]
    pub fn with_params(params: OracleParams) -> Self {
        Self {
            params,
            band_relayers: Vec::new(),
            band_price_states: Vec::new(),
            band_ibc_price_states: Vec::new(),
            coinbase_price_states: Vec::new(),
            pyth_price_states: Vec::new(),
            stork_publishers: Vec::new(),
            stork_price_states: Vec::new(),
            provider_states: Vec::new(),
            chainlink_price_states: Vec::new(),
            historical_price_records: Vec::new(),
        }
    }
}
