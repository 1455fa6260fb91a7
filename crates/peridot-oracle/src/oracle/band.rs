//! Band adapter: rates relayed by an allow-listed set of relayer accounts.

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
use peridot_core::{
    oracle::{
        band_rate_to_price,
        BandPriceState,
        OracleType,
        PriceState,
    },
    primitive::Address,
};
use tracing::{
    debug,
    instrument,
};

use super::{
    history::StateWriteExt as _,
    price_update_event,
};

const PRICE_PREFIX: &str = "oracle/band/price";
const RELAYER_PREFIX: &str = "oracle/band/relayer";

fn price_storage_key(symbol: &str) -> String {
    format!("{PRICE_PREFIX}/{symbol}")
}

fn relayer_storage_key(address: &Address) -> String {
    format!("{RELAYER_PREFIX}/{address}")
}

fn extract_address_from_key(prefix: &str, key: &str) -> Result<Address> {
    key.strip_prefix(prefix)
        .and_then(|suffix| suffix.strip_prefix('/'))
        .context("failed to strip prefix from relayer key")?
        .parse::<Address>()
        .context("failed to parse storage key suffix as address")
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn is_band_relayer(&self, address: &Address) -> Result<bool> {
        Ok(self
            .get_raw(&relayer_storage_key(address))
            .await
            .context("failed reading band relayer from state")?
            .is_some())
    }

    #[instrument(skip_all)]
    async fn get_band_relayers(&self) -> Result<Vec<Address>> {
        let mut stream = std::pin::pin!(self.prefix_keys(RELAYER_PREFIX));
        let mut relayers = Vec::new();
        while let Some(key) = stream.next().await {
            let key = key.context("failed reading band relayer keys from state")?;
            relayers.push(extract_address_from_key(RELAYER_PREFIX, &key)?);
        }
        Ok(relayers)
    }

    #[instrument(skip_all, fields(symbol))]
    async fn get_band_price_state(&self, symbol: &str) -> Result<Option<BandPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(symbol))
            .await
            .context("failed reading band price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize band price state")
            })
            .transpose()
    }

    #[instrument(skip_all)]
    async fn get_band_price_states(&self) -> Result<Vec<BandPriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading band price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize band price state")?,
            );
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_band_relayer(&mut self, address: &Address) {
        self.put_raw(relayer_storage_key(address), Vec::new());
    }

    #[instrument(skip_all)]
    fn delete_band_relayer(&mut self, address: &Address) {
        self.delete(relayer_storage_key(address));
    }

    #[instrument(skip_all, fields(symbol = state.symbol))]
    fn put_band_price_state(&mut self, state: &BandPriceState) -> Result<()> {
        let bytes = serde_json::to_vec(state).context("failed to serialize band price state")?;
        self.put_raw(price_storage_key(&state.symbol), bytes);
        Ok(())
    }

    /// Applies one relayed Band rate. Rates whose resolve time does not
    /// advance past the stored one are dropped. Returns whether the rate
    /// was accepted.
    #[instrument(skip_all, fields(symbol))]
    async fn set_band_price_from_relay(
        &mut self,
        symbol: &str,
        rate: u64,
        resolve_time: u64,
        request_id: u64,
        block_timestamp: i64,
    ) -> Result<bool> {
        if rate == 0 {
            debug!(symbol, "dropping band rate of zero");
            return Ok(false);
        }
        let existing = self
            .get_band_price_state(symbol)
            .await
            .context("failed to get band price state")?;
        let price = band_rate_to_price(rate);
        let price_state = match existing {
            Some(existing) => {
                if resolve_time <= existing.resolve_time {
                    debug!(symbol, resolve_time, "dropping stale band rate");
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
        self.put_band_price_state(&state)
            .context("failed to put band price state")?;
        self.append_price_record(OracleType::Band, symbol, price, block_timestamp)
            .await
            .context("failed to append band price record")?;
        self.record(price_update_event(
            OracleType::Band,
            symbol,
            price,
            block_timestamp,
        ));
        Ok(true)
    }
}

impl<T: StateWrite> StateWriteExt for T {}
