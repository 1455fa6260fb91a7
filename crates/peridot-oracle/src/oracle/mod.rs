//! The price-oracle component: one submodule per price source, the
//! historical ledger, and a read facade dispatching on
//! [`OracleType`](peridot_core::oracle::OracleType).

pub mod action;
pub mod band;
pub mod band_ibc;
pub mod chainlink;
pub mod coinbase;
mod component;
pub mod genesis;
pub mod history;
pub mod provider;
pub mod pyth;
pub mod stork;
mod params;

use anyhow::{
    Context as _,
    Result,
};
use async_trait::async_trait;
use cnidarium::StateRead;
use peridot_core::oracle::{
    OracleType,
    PricePairState,
    PriceState,
    QUOTE_USD,
};
pub use component::OracleComponent;
pub use params::{
    StateReadExt as ParamsStateReadExt,
    StateWriteExt as ParamsStateWriteExt,
};
use rust_decimal::Decimal;
use tracing::instrument;

use self::{
    band::StateReadExt as _,
    band_ibc::StateReadExt as _,
    chainlink::StateReadExt as _,
    coinbase::StateReadExt as _,
    pyth::StateReadExt as _,
    stork::StateReadExt as _,
};

/// Read facade over every price source. The `symbol` argument is
/// source-specific: a Band symbol, a Coinbase key, a hex Pyth price id, a
/// Stork asset id, or a Chainlink feed id. Provider prices are addressed
/// through [`provider::StateReadExt`] instead, since they carry an extra
/// provider dimension.
#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all, fields(%oracle_type, symbol))]
    async fn get_price_state(
        &self,
        oracle_type: OracleType,
        symbol: &str,
    ) -> Result<Option<PriceState>> {
        let price_state = match oracle_type {
            OracleType::Band => self
                .get_band_price_state(symbol)
                .await
                .context("failed to get band price state")?
                .map(|s| s.price_state),
            OracleType::BandIbc => self
                .get_band_ibc_price_state(symbol)
                .await
                .context("failed to get band ibc price state")?
                .map(|s| s.price_state),
            OracleType::Coinbase => self
                .get_coinbase_price_state(symbol)
                .await
                .context("failed to get coinbase price state")?,
            OracleType::Chainlink => self
                .get_chainlink_price_state(symbol)
                .await
                .context("failed to get chainlink price state")?
                .map(|s| s.price_state),
            OracleType::Provider => None,
            OracleType::Pyth => self
                .get_pyth_price_state_by_symbol(symbol)
                .await
                .context("failed to get pyth price state")?
                .map(|s| s.price_state),
            OracleType::Stork => self
                .get_stork_price_state(symbol)
                .await
                .context("failed to get stork price state")?
                .map(|s| s.price_state),
        };
        Ok(price_state)
    }

    /// The current price of `base` quoted in `quote`. A quote of `USD`
    /// returns the base price unscaled.
    #[instrument(skip_all, fields(%oracle_type, base, quote))]
    async fn get_price(
        &self,
        oracle_type: OracleType,
        base: &str,
        quote: &str,
    ) -> Result<Option<Decimal>> {
        let Some(base_state) = self
            .get_price_state(oracle_type, base)
            .await
            .context("failed to get base price state")?
        else {
            return Ok(None);
        };
        if base_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        if quote == QUOTE_USD {
            return Ok(Some(base_state.price));
        }
        let Some(quote_state) = self
            .get_price_state(oracle_type, quote)
            .await
            .context("failed to get quote price state")?
        else {
            return Ok(None);
        };
        if quote_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(base_state.price / quote_state.price))
    }

    /// The pair price together with both legs' cumulative state.
    #[instrument(skip_all, fields(%oracle_type, base, quote))]
    async fn get_price_pair_state(
        &self,
        oracle_type: OracleType,
        base: &str,
        quote: &str,
    ) -> Result<Option<PricePairState>> {
        let Some(base_state) = self
            .get_price_state(oracle_type, base)
            .await
            .context("failed to get base price state")?
        else {
            return Ok(None);
        };
        if base_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        if quote == QUOTE_USD {
            return Ok(Some(PricePairState {
                pair_price: base_state.price,
                base_price: base_state.price,
                quote_price: Decimal::ONE,
                base_cumulative_price: base_state.cumulative_price,
                quote_cumulative_price: Decimal::ZERO,
                base_timestamp: base_state.timestamp,
                quote_timestamp: 0,
            }));
        }
        let Some(quote_state) = self
            .get_price_state(oracle_type, quote)
            .await
            .context("failed to get quote price state")?
        else {
            return Ok(None);
        };
        if quote_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(PricePairState {
            pair_price: base_state.price / quote_state.price,
            base_price: base_state.price,
            quote_price: quote_state.price,
            base_cumulative_price: base_state.cumulative_price,
            quote_cumulative_price: quote_state.cumulative_price,
            base_timestamp: base_state.timestamp,
            quote_timestamp: quote_state.timestamp,
        }))
    }

    /// The cumulative price of one leg, as consumed by off-chain TWAP
    /// calculators.
    #[instrument(skip_all, fields(%oracle_type, symbol))]
    async fn get_cumulative_price(
        &self,
        oracle_type: OracleType,
        symbol: &str,
    ) -> Result<Option<Decimal>> {
        let price_state = self
            .get_price_state(oracle_type, symbol)
            .await
            .context("failed to get price state")?;
        Ok(price_state.map(|s| s.cumulative_price))
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

/// Event recorded whenever an adapter accepts a price update.
pub(crate) fn price_update_event(
    oracle_type: OracleType,
    symbol: &str,
    price: Decimal,
    timestamp: i64,
) -> tendermint::abci::Event {
    use tendermint::abci::EventAttributeIndexExt as _;
    tendermint::abci::Event::new(
        "price_update",
        [
            ("oracle_type", oracle_type.to_string()).index(),
            ("symbol", symbol.to_string()).index(),
            ("price", price.to_string()).index(),
            ("timestamp", timestamp.to_string()).index(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use peridot_core::oracle::BandPriceState;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::oracle::band::StateWriteExt as _;

    fn band_state(symbol: &str, price: Decimal, cumulative: Decimal) -> BandPriceState {
        BandPriceState {
            symbol: symbol.to_string(),
            rate: 0,
            resolve_time: 10,
            request_id: 1,
            price_state: PriceState {
                price,
                cumulative_price: cumulative,
                timestamp: 100,
            },
        }
    }

    #[tokio::test]
    async fn usd_quote_returns_the_base_price_unscaled() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        state
            .put_band_price_state(&band_state("ATOM", dec!(12), dec!(300)))
            .unwrap();

        let price = state.get_price(OracleType::Band, "ATOM", "USD").await.unwrap();
        assert_eq!(price, Some(dec!(12)));

        let pair = state
            .get_price_pair_state(OracleType::Band, "ATOM", "USD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.pair_price, dec!(12));
        assert_eq!(pair.quote_price, Decimal::ONE);
        assert_eq!(pair.quote_timestamp, 0);
        assert_eq!(pair.base_cumulative_price, dec!(300));
    }

    #[tokio::test]
    async fn cross_pair_divides_and_requires_both_legs() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        state
            .put_band_price_state(&band_state("ATOM", dec!(12), dec!(300)))
            .unwrap();

        // quote leg missing
        assert_eq!(
            state.get_price(OracleType::Band, "ATOM", "OSMO").await.unwrap(),
            None
        );

        state
            .put_band_price_state(&band_state("OSMO", dec!(4), dec!(80)))
            .unwrap();
        assert_eq!(
            state.get_price(OracleType::Band, "ATOM", "OSMO").await.unwrap(),
            Some(dec!(3))
        );

        // a non-positive leg disqualifies the pair
        state
            .put_band_price_state(&band_state("OSMO", dec!(0), dec!(80)))
            .unwrap();
        assert_eq!(
            state.get_price(OracleType::Band, "ATOM", "OSMO").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn provider_prices_are_not_resolvable_through_the_facade() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let state = StateDelta::new(snapshot);

        assert_eq!(
            state
                .get_price_state(OracleType::Provider, "ATOM")
                .await
                .unwrap(),
            None
        );
    }
}
