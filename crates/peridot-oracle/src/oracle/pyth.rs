//! Pyth adapter: batches of price attestations, keyed by the 32-byte Pyth
//! price id (hex-encoded wherever a symbol string is expected).

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
    scaled_decimal,
    OracleType,
    PriceAttestation,
    PriceState,
    PythPriceState,
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

const PRICE_PREFIX: &str = "oracle/pyth/price";

fn price_storage_key(price_id: &[u8; 32]) -> String {
    format!("{PRICE_PREFIX}/{}", hex::encode(price_id))
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_pyth_price_state(&self, price_id: &[u8; 32]) -> Result<Option<PythPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(price_id))
            .await
            .context("failed reading pyth price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize pyth price state")
            })
            .transpose()
    }

    /// Lookup by hex-encoded price id, as used by the read facade.
    #[instrument(skip_all, fields(symbol))]
    async fn get_pyth_price_state_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<PythPriceState>> {
        let Ok(bytes) = hex::decode(symbol) else {
            return Ok(None);
        };
        let Ok(price_id) = <[u8; 32]>::try_from(bytes) else {
            return Ok(None);
        };
        self.get_pyth_price_state(&price_id).await
    }

    #[instrument(skip_all)]
    async fn get_pyth_price_states(&self) -> Result<Vec<PythPriceState>> {
        let mut stream = std::pin::pin!(self.prefix_raw(PRICE_PREFIX));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading pyth price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize pyth price state")?,
            );
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_pyth_price_state(&mut self, state: &PythPriceState) -> Result<()> {
        let bytes = serde_json::to_vec(state).context("failed to serialize pyth price state")?;
        self.put_raw(price_storage_key(&state.price_id), bytes);
        Ok(())
    }

    /// Applies one attestation. Attestations that do not advance the
    /// publish time, scale outside the representable range, or trip the
    /// deviation threshold are dropped. Returns whether the attestation
    /// was accepted.
    #[instrument(skip_all)]
    async fn process_pyth_attestation(
        &mut self,
        attestation: &PriceAttestation,
        block_timestamp: i64,
    ) -> Result<bool> {
        let symbol = hex::encode(attestation.price_id);
        let Some(price) = scaled_decimal(attestation.price, attestation.expo) else {
            debug!(symbol, "dropping pyth attestation with unrepresentable price");
            return Ok(false);
        };
        if price <= Decimal::ZERO {
            debug!(symbol, "dropping pyth attestation with non-positive price");
            return Ok(false);
        }
        let ema_price =
            scaled_decimal(attestation.ema_price, attestation.ema_expo).unwrap_or(Decimal::ZERO);
        let conf = scaled_decimal(
            i64::try_from(attestation.conf).unwrap_or(i64::MAX),
            attestation.expo,
        )
        .unwrap_or(Decimal::ZERO);
        let ema_conf = scaled_decimal(
            i64::try_from(attestation.ema_conf).unwrap_or(i64::MAX),
            attestation.ema_expo,
        )
        .unwrap_or(Decimal::ZERO);

        let existing = self
            .get_pyth_price_state(&attestation.price_id)
            .await
            .context("failed to get pyth price state")?;
        let price_state = match existing {
            Some(existing) => {
                if attestation.publish_time <= existing.publish_time {
                    debug!(
                        symbol,
                        publish_time = attestation.publish_time,
                        "dropping stale pyth attestation",
                    );
                    return Ok(false);
                }
                if exceeds_deviation_threshold(existing.price_state.price, price) {
                    warn!(
                        symbol,
                        %price,
                        last_price = %existing.price_state.price,
                        "dropping pyth attestation beyond deviation threshold",
                    );
                    return Ok(false);
                }
                let mut price_state = existing.price_state;
                price_state.update(price, block_timestamp);
                price_state
            }
            None => PriceState::new(price, block_timestamp),
        };
        let state = PythPriceState {
            price_id: attestation.price_id,
            ema_price,
            ema_conf,
            conf,
            publish_time: attestation.publish_time,
            price_state,
        };
        self.put_pyth_price_state(&state)
            .context("failed to put pyth price state")?;
        self.append_price_record(OracleType::Pyth, &symbol, price, block_timestamp)
            .await
            .context("failed to append pyth price record")?;
        self.record(price_update_event(
            OracleType::Pyth,
            &symbol,
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
    use rust_decimal_macros::dec;

    use super::*;

    fn attestation(price: i64, publish_time: i64) -> PriceAttestation {
        PriceAttestation {
            price_id: [7; 32],
            price,
            conf: 10,
            expo: -2,
            ema_price: price,
            ema_conf: 10,
            ema_expo: -2,
            publish_time,
        }
    }

    #[tokio::test]
    async fn attestation_round_trip_with_exponent() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        assert!(state
            .process_pyth_attestation(&attestation(6_500_000, 1000), 100)
            .await
            .unwrap());

        let stored = state.get_pyth_price_state(&[7; 32]).await.unwrap().unwrap();
        assert_eq!(stored.price_state.price, dec!(65000));
        assert_eq!(stored.publish_time, 1000);

        let by_symbol = state
            .get_pyth_price_state_by_symbol(&hex::encode([7_u8; 32]))
            .await
            .unwrap();
        assert!(by_symbol.is_some());
    }

    #[tokio::test]
    async fn stale_and_deviating_attestations_are_dropped() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        assert!(state
            .process_pyth_attestation(&attestation(6_500_000, 1000), 100)
            .await
            .unwrap());
        // same publish time
        assert!(!state
            .process_pyth_attestation(&attestation(6_600_000, 1000), 110)
            .await
            .unwrap());
        // 65000 -> 66000000 is beyond 100x
        assert!(!state
            .process_pyth_attestation(&attestation(6_600_000_000, 1100), 120)
            .await
            .unwrap());

        let stored = state.get_pyth_price_state(&[7; 32]).await.unwrap().unwrap();
        assert_eq!(stored.price_state.price, dec!(65000));
    }
}
