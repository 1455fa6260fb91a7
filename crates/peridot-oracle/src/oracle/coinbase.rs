//! Coinbase adapter: signed price messages from the Coinbase attestor.
//! Accepted messages are stored per (key, timestamp) and the exposed price
//! is a time-weighted average over a sliding window, so a single bad
//! sample cannot move the price far.

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
    coinbase_value_to_price,
    CoinbasePriceState,
    OracleType,
    PriceState,
    TWAP_WINDOW,
};
use rust_decimal::Decimal;
use tracing::{
    debug,
    instrument,
};

use super::{
    history::StateWriteExt as _,
    price_update_event,
};
use crate::state_ext::StateReadExt as _;

const PRICE_PREFIX: &str = "oracle/coinbase/price";

// Timestamps are zero-padded so lexicographic key order is chronological.
fn price_storage_key(key: &str, timestamp: u64) -> String {
    format!("{PRICE_PREFIX}/{key}/{timestamp:020}")
}

fn price_key_prefix(key: &str) -> String {
    format!("{PRICE_PREFIX}/{key}/")
}

/// Time-weighted average over `window` seconds ending at `now`, over
/// chronologically ascending states. Each sample's price applies from its
/// timestamp until the next sample (or `now`); the sample straddling the
/// window start is integrated from the window edge. The cumulative is
/// divided by the full window, so a sparsely covered window pulls the
/// average toward zero. `None` for an empty series.
pub fn calculate_twap(states: &[CoinbasePriceState], now: i64, window: i64) -> Option<Decimal> {
    if states.is_empty() || window <= 0 {
        return None;
    }
    let window_start = now.saturating_sub(window);
    let mut cumulative = Decimal::ZERO;
    let mut upper = now;
    for state in states.iter().rev() {
        let timestamp = i64::try_from(state.timestamp).ok()?;
        let lower = timestamp.max(window_start);
        if upper > lower {
            cumulative += coinbase_value_to_price(state.value) * Decimal::from(upper - lower);
        }
        if timestamp <= window_start {
            break;
        }
        upper = timestamp;
    }
    Some(cumulative / Decimal::from(window))
}

#[async_trait]
pub trait StateReadExt: StateRead {
    /// All retained samples for `key`, ascending by message timestamp.
    #[instrument(skip_all, fields(key))]
    async fn get_coinbase_price_states(&self, key: &str) -> Result<Vec<CoinbasePriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(&price_key_prefix(key)));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading coinbase price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize coinbase price state")?,
            );
        }
        Ok(states)
    }

    #[instrument(skip_all)]
    async fn get_all_coinbase_price_states(&self) -> Result<Vec<CoinbasePriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading coinbase price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize coinbase price state")?,
            );
        }
        Ok(states)
    }

    /// The exposed Coinbase price state for `key`: the window TWAP as the
    /// price, alongside the newest sample's cumulative state.
    #[instrument(skip_all, fields(key))]
    async fn get_coinbase_price_state(&self, key: &str) -> Result<Option<PriceState>> {
        let states = self
            .get_coinbase_price_states(key)
            .await
            .context("failed to get coinbase price states")?;
        let Some(newest) = states.last().cloned() else {
            return Ok(None);
        };
        let now = self
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        let Some(twap) = calculate_twap(&states, now, TWAP_WINDOW) else {
            return Ok(None);
        };
        Ok(Some(PriceState {
            price: twap,
            cumulative_price: newest.price_state.cumulative_price,
            timestamp: newest.price_state.timestamp,
        }))
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(key = state.key))]
    fn put_coinbase_price_state(&mut self, state: &CoinbasePriceState) -> Result<()> {
        let bytes =
            serde_json::to_vec(state).context("failed to serialize coinbase price state")?;
        self.put_raw(price_storage_key(&state.key, state.timestamp), bytes);
        Ok(())
    }

    /// Applies one signature-verified Coinbase message. Messages whose
    /// timestamp does not advance past the newest stored sample are
    /// dropped. Samples that fell fully out of the window are pruned,
    /// keeping the one straddling the window start. Returns whether the
    /// message was accepted.
    #[instrument(skip_all, fields(key))]
    async fn set_coinbase_price_from_message(
        &mut self,
        key: &str,
        timestamp: u64,
        value: u64,
        kind: &str,
        block_timestamp: i64,
    ) -> Result<bool> {
        let mut states = self
            .get_coinbase_price_states(key)
            .await
            .context("failed to get coinbase price states")?;
        let price = coinbase_value_to_price(value);
        let price_state = match states.last() {
            Some(newest) => {
                if timestamp <= newest.timestamp {
                    debug!(key, timestamp, "dropping stale coinbase message");
                    return Ok(false);
                }
                let mut price_state = newest.price_state.clone();
                price_state.update(price, block_timestamp);
                price_state
            }
            None => PriceState::new(price, block_timestamp),
        };
        let state = CoinbasePriceState {
            kind: kind.to_string(),
            timestamp,
            key: key.to_string(),
            value,
            price_state,
        };
        self.put_coinbase_price_state(&state)
            .context("failed to put coinbase price state")?;
        states.push(state);

        // prune samples older than the one straddling the window start
        let window_start = i64::try_from(timestamp)
            .unwrap_or(i64::MAX)
            .saturating_sub(TWAP_WINDOW);
        let straddle = states
            .iter()
            .rposition(|s| i64::try_from(s.timestamp).unwrap_or(i64::MAX) <= window_start);
        if let Some(straddle) = straddle {
            for stale in &states[..straddle] {
                self.delete(price_storage_key(key, stale.timestamp));
            }
            states.drain(..straddle);
        }

        let Some(twap) = calculate_twap(&states, block_timestamp, TWAP_WINDOW) else {
            return Ok(true);
        };
        self.append_price_record(OracleType::Coinbase, key, twap, block_timestamp)
            .await
            .context("failed to append coinbase price record")?;
        self.record(price_update_event(
            OracleType::Coinbase,
            key,
            twap,
            block_timestamp,
        ));
        Ok(true)
    }
}

impl<T: StateWrite> StateWriteExt for T {}
