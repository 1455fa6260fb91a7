//! Chainlink-style adapter, fed exclusively by accepted OCR transmissions.

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
    exceeds_deviation_threshold,
    ChainlinkPriceState,
    OracleType,
    PriceState,
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

const PRICE_PREFIX: &str = "oracle/chainlink/price";

fn price_storage_key(feed_id: &str) -> String {
    format!("{PRICE_PREFIX}/{feed_id}")
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all, fields(feed_id))]
    async fn get_chainlink_price_state(
        &self,
        feed_id: &str,
    ) -> Result<Option<ChainlinkPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(feed_id))
            .await
            .context("failed reading chainlink price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize chainlink price state")
            })
            .transpose()
    }

    #[instrument(skip_all)]
    async fn get_chainlink_price_states(&self) -> Result<Vec<ChainlinkPriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading chainlink price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize chainlink price state")?,
            );
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(feed_id = state.feed_id))]
    fn put_chainlink_price_state(&mut self, state: &ChainlinkPriceState) -> Result<()> {
        let bytes =
            serde_json::to_vec(state).context("failed to serialize chainlink price state")?;
        self.put_raw(price_storage_key(&state.feed_id), bytes);
        Ok(())
    }

    /// Feeds an accepted OCR median into the adapter. Answers that are
    /// non-positive or trip the deviation threshold leave the stored price
    /// untouched; the transmission itself still stands. Returns whether
    /// the price moved.
    #[instrument(skip_all, fields(feed_id))]
    async fn apply_ocr_transmission(
        &mut self,
        feed_id: &str,
        answer: Decimal,
        block_timestamp: i64,
    ) -> Result<bool> {
        if answer <= Decimal::ZERO {
            debug!(feed_id, "ignoring non-positive ocr answer");
            return Ok(false);
        }
        let existing = self
            .get_chainlink_price_state(feed_id)
            .await
            .context("failed to get chainlink price state")?;
        let price_state = match existing {
            Some(existing) => {
                if exceeds_deviation_threshold(existing.price_state.price, answer) {
                    warn!(
                        feed_id,
                        %answer,
                        last_price = %existing.price_state.price,
                        "ignoring ocr answer beyond deviation threshold",
                    );
                    return Ok(false);
                }
                let mut price_state = existing.price_state;
                price_state.update(answer, block_timestamp);
                price_state
            }
            None => PriceState::new(answer, block_timestamp),
        };
        let state = ChainlinkPriceState {
            feed_id: feed_id.to_string(),
            answer,
            price_state,
        };
        self.put_chainlink_price_state(&state)
            .context("failed to put chainlink price state")?;
        self.append_price_record(OracleType::Chainlink, feed_id, answer, block_timestamp)
            .await
            .context("failed to append chainlink price record")?;
        self.record(price_update_event(
            OracleType::Chainlink,
            feed_id,
            answer,
            block_timestamp,
        ));
        Ok(true)
    }
}

impl<T: StateWrite> StateWriteExt for T {}
