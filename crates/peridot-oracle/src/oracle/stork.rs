//! Stork adapter: per-asset batches of publisher-signed prices, medianised
//! on acceptance. Publishers are allow-listed; timestamps are normalised
//! to nanoseconds.

use anyhow::{
    anyhow,
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
        exceeds_deviation_threshold,
        timestamp_to_nanoseconds,
        AssetPair,
        OracleType,
        PriceState,
        StorkPriceState,
    },
    primitive::Address,
    OracleError,
};
use rust_decimal::Decimal;
use tracing::{
    debug,
    instrument,
    warn,
};

use super::{
    history::StateWriteExt as _,
    price_update_event,
};

const PRICE_PREFIX: &str = "oracle/stork/price";
const PUBLISHER_PREFIX: &str = "oracle/stork/publisher";

fn price_storage_key(symbol: &str) -> String {
    format!("{PRICE_PREFIX}/{symbol}")
}

fn publisher_storage_key(address: &Address) -> String {
    format!("{PUBLISHER_PREFIX}/{address}")
}

/// Median of the submitted prices; the average of the two middle values on
/// an even count.
fn median_price(prices: &mut [Decimal]) -> Option<Decimal> {
    if prices.is_empty() {
        return None;
    }
    prices.sort_unstable();
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        Some((prices[mid - 1] + prices[mid]) / Decimal::TWO)
    } else {
        Some(prices[mid])
    }
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn is_stork_publisher(&self, address: &Address) -> Result<bool> {
        Ok(self
            .get_raw(&publisher_storage_key(address))
            .await
            .context("failed reading stork publisher from state")?
            .is_some())
    }

    #[instrument(skip_all)]
    async fn get_stork_publishers(&self) -> Result<Vec<Address>> {
        let mut stream = std::pin::pin!(self.prefix_keys(PUBLISHER_PREFIX));
        let mut publishers = Vec::new();
        while let Some(key) = stream.next().await {
            let key = key.context("failed reading stork publisher keys from state")?;
            let address = key
                .strip_prefix(PUBLISHER_PREFIX)
                .and_then(|suffix| suffix.strip_prefix('/'))
                .context("failed to strip prefix from stork publisher key")?
                .parse::<Address>()
                .context("failed to parse storage key suffix as address")?;
            publishers.push(address);
        }
        Ok(publishers)
    }

    #[instrument(skip_all, fields(symbol))]
    async fn get_stork_price_state(&self, symbol: &str) -> Result<Option<StorkPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(symbol))
            .await
            .context("failed reading stork price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize stork price state")
            })
            .transpose()
    }

    #[instrument(skip_all)]
    async fn get_stork_price_states(&self) -> Result<Vec<StorkPriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading stork price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize stork price state")?,
            );
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_stork_publisher(&mut self, address: &Address) {
        self.put_raw(publisher_storage_key(address), Vec::new());
    }

    #[instrument(skip_all)]
    fn delete_stork_publisher(&mut self, address: &Address) {
        self.delete(publisher_storage_key(address));
    }

    #[instrument(skip_all, fields(symbol = state.symbol))]
    fn put_stork_price_state(&mut self, state: &StorkPriceState) -> Result<()> {
        let bytes = serde_json::to_vec(state).context("failed to serialize stork price state")?;
        self.put_raw(price_storage_key(&state.symbol), bytes);
        Ok(())
    }

    /// Applies one asset-pair batch. Every signing publisher must be
    /// allow-listed or the whole message fails. Batches whose newest
    /// timestamp does not advance, or whose median trips the deviation
    /// threshold, are dropped. Returns whether the batch was accepted.
    #[instrument(skip_all, fields(asset_id = pair.asset_id))]
    async fn set_stork_price_from_asset_pair(
        &mut self,
        pair: &AssetPair,
        block_timestamp: i64,
    ) -> Result<bool> {
        for signed in &pair.signed_prices {
            if !self
                .is_stork_publisher(&signed.publisher)
                .await
                .context("failed to check stork publisher")?
            {
                return Err(anyhow!(OracleError::Unauthorized(format!(
                    "{} is not an authorized stork publisher",
                    signed.publisher
                ))));
            }
        }
        let mut prices: Vec<Decimal> = pair.signed_prices.iter().map(|p| p.price).collect();
        let Some(price) = median_price(&mut prices) else {
            return Ok(false);
        };
        if price <= Decimal::ZERO {
            debug!(asset_id = pair.asset_id, "dropping non-positive stork median");
            return Ok(false);
        }
        let timestamp = pair
            .signed_prices
            .iter()
            .map(|p| timestamp_to_nanoseconds(p.timestamp))
            .max()
            .unwrap_or(0);

        let existing = self
            .get_stork_price_state(&pair.asset_id)
            .await
            .context("failed to get stork price state")?;
        let price_state = match existing {
            Some(existing) => {
                if timestamp <= existing.timestamp {
                    debug!(asset_id = pair.asset_id, "dropping stale stork batch");
                    return Ok(false);
                }
                if exceeds_deviation_threshold(existing.price_state.price, price) {
                    warn!(
                        asset_id = pair.asset_id,
                        %price,
                        last_price = %existing.price_state.price,
                        "dropping stork batch beyond deviation threshold",
                    );
                    return Ok(false);
                }
                let mut price_state = existing.price_state;
                price_state.update(price, block_timestamp);
                price_state
            }
            None => PriceState::new(price, block_timestamp),
        };
        let state = StorkPriceState {
            symbol: pair.asset_id.clone(),
            timestamp,
            price_state,
        };
        self.put_stork_price_state(&state)
            .context("failed to put stork price state")?;
        self.append_price_record(OracleType::Stork, &pair.asset_id, price, block_timestamp)
            .await
            .context("failed to append stork price record")?;
        self.record(price_update_event(
            OracleType::Stork,
            &pair.asset_id,
            price,
            block_timestamp,
        ));
        Ok(true)
    }
}

impl<T: StateWrite> StateWriteExt for T {}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use peridot_core::oracle::SignedPriceOfAssetPair;
    use rust_decimal_macros::dec;

    use super::*;

    fn pair(prices: &[(u8, u64, Decimal)]) -> AssetPair {
        AssetPair {
            asset_id: "BTCUSD".into(),
            signed_prices: prices
                .iter()
                .map(|(publisher, timestamp, price)| SignedPriceOfAssetPair {
                    publisher: Address::from([*publisher; 20]),
                    timestamp: *timestamp,
                    price: *price,
                })
                .collect(),
        }
    }

    #[test]
    fn median_of_even_count_averages_middles() {
        let mut prices = vec![dec!(4), dec!(1), dec!(3), dec!(2)];
        assert_eq!(median_price(&mut prices), Some(dec!(2.5)));
    }

    #[tokio::test]
    async fn unlisted_publisher_fails_the_message() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        state.put_stork_publisher(&Address::from([1; 20]));
        let batch = pair(&[
            (1, 1_700_000_000, dec!(65000)),
            (2, 1_700_000_000, dec!(65010)),
        ]);
        let err = state
            .set_stork_price_from_asset_pair(&batch, 100)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn median_is_stored_and_timestamps_normalised() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        for i in 1..=3 {
            state.put_stork_publisher(&Address::from([i; 20]));
        }
        // mixed units: seconds, milliseconds, nanoseconds
        let batch = pair(&[
            (1, 1_700_000_000, dec!(64000)),
            (2, 1_700_000_001_000, dec!(65000)),
            (3, 1_700_000_002_000_000_000, dec!(66000)),
        ]);
        assert!(state
            .set_stork_price_from_asset_pair(&batch, 100)
            .await
            .unwrap());

        let stored = state
            .get_stork_price_state("BTCUSD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.price_state.price, dec!(65000));
        assert_eq!(stored.timestamp, 1_700_000_002_000_000_000);
    }

    #[tokio::test]
    async fn stale_batch_is_dropped() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        state.put_stork_publisher(&Address::from([1; 20]));
        let batch = pair(&[(1, 1_700_000_000, dec!(65000))]);
        assert!(state
            .set_stork_price_from_asset_pair(&batch, 100)
            .await
            .unwrap());
        let stale = pair(&[(1, 1_700_000_000, dec!(66000))]);
        assert!(!state
            .set_stork_price_from_asset_pair(&stale, 110)
            .await
            .unwrap());
    }
}
