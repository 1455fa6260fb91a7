//! Band-IBC adapter: rates delivered by the host chain's IBC plumbing
//! rather than by allow-listed relayer accounts. The host calls
//! [`StateWriteExt::process_band_ibc_prices`] when an oracle response
//! packet is acknowledged.

use anyhow::{
    Context as _,
    Result,
};
use async_trait::async_trait;
use cnidarium::{
    StateRead,
    StateWrite,
};
use futures::StreamExt as _;
use peridot_core::oracle::{
    band_rate_to_price,
    exceeds_deviation_threshold,
    BandPriceState,
    OracleType,
    PriceState,
};
use tracing::{
    debug,
    instrument,
    warn,
};

use super::{
    history::StateWriteExt as _,
    price_update_event,
};

const PRICE_PREFIX: &str = "oracle/bandibc/price";

fn price_storage_key(symbol: &str) -> String {
    format!("{PRICE_PREFIX}/{symbol}")
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all, fields(symbol))]
    async fn get_band_ibc_price_state(&self, symbol: &str) -> Result<Option<BandPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(symbol))
            .await
            .context("failed reading band ibc price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize band ibc price state")
            })
            .transpose()
    }

    #[instrument(skip_all)]
    async fn get_band_ibc_price_states(&self) -> Result<Vec<BandPriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading band ibc price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize band ibc price state")?,
            );
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(symbol = state.symbol))]
    fn put_band_ibc_price_state(&mut self, state: &BandPriceState) -> Result<()> {
        let bytes =
            serde_json::to_vec(state).context("failed to serialize band ibc price state")?;
        self.put_raw(price_storage_key(&state.symbol), bytes);
        Ok(())
    }

    /// Applies one rate from an acknowledged oracle response. Rates that
    /// are zero, stale, or beyond the deviation threshold are dropped.
    /// Returns whether the rate was accepted.
    #[instrument(skip_all, fields(symbol))]
    async fn set_band_ibc_price(
        &mut self,
        symbol: &str,
        rate: u64,
        resolve_time: u64,
        request_id: u64,
        block_timestamp: i64,
    ) -> Result<bool> {
        if rate == 0 {
            debug!(symbol, "dropping band ibc rate of zero");
            return Ok(false);
        }
        let existing = self
            .get_band_ibc_price_state(symbol)
            .await
            .context("failed to get band ibc price state")?;
        let price = band_rate_to_price(rate);
        let price_state = match existing {
            Some(existing) => {
                if resolve_time <= existing.resolve_time {
                    debug!(symbol, resolve_time, "dropping stale band ibc rate");
                    return Ok(false);
                }
                if exceeds_deviation_threshold(existing.price_state.price, price) {
                    warn!(
                        symbol,
                        %price,
                        last_price = %existing.price_state.price,
                        "dropping band ibc rate beyond deviation threshold",
                    );
                    return Ok(false);
                }
                let mut price_state = existing.price_state;
                price_state.update(price, block_timestamp);
                price_state
            }
            None => PriceState::new(price, block_timestamp),
        };
        let state = BandPriceState {
            symbol: symbol.to_string(),
            rate,
            resolve_time,
            request_id,
            price_state,
        };
        self.put_band_ibc_price_state(&state)
            .context("failed to put band ibc price state")?;
        self.append_price_record(OracleType::BandIbc, symbol, price, block_timestamp)
            .await
            .context("failed to append band ibc price record")?;
        self.record(price_update_event(
            OracleType::BandIbc,
            symbol,
            price,
            block_timestamp,
        ));
        Ok(true)
    }

    /// Ingress seam for the host chain's IBC stack: applies a batch of
    /// rates from one acknowledged oracle response.
    #[instrument(skip_all)]
    async fn process_band_ibc_prices(
        &mut self,
        symbols: &[String],
        rates: &[u64],
        resolve_time: u64,
        request_id: u64,
        block_timestamp: i64,
    ) -> Result<()> {
        anyhow::ensure!(
            symbols.len() == rates.len(),
            "symbols and rates must have equal length"
        );
        for (symbol, rate) in symbols.iter().zip(rates) {
            self.set_band_ibc_price(symbol, *rate, resolve_time, request_id, block_timestamp)
                .await
                .with_context(|| format!("failed to set band ibc price for `{symbol}`"))?;
        }
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}
