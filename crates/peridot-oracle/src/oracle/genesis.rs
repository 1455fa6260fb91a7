//! Oracle genesis import and export. Import restores every adapter's
//! stored states byte-for-byte (cumulative prices and digests included)
//! and rebuilds the last-update index from the historical records; export
//! is the inverse.

use anyhow::{
    Context as _,
    Result,
};
use cnidarium::{
    StateRead,
    StateWrite,
};
use peridot_core::oracle::{
    set_last_price_timestamp,
    GenesisState,
    ProviderState,
};
use tracing::instrument;

use super::{
    band::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    band_ibc::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    chainlink::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    coinbase::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    history::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    provider::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    pyth::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    stork::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    ParamsStateReadExt as _,
    ParamsStateWriteExt as _,
};

#[instrument(skip_all)]
pub async fn import<S: StateWrite>(mut state: S, genesis: &GenesisState) -> Result<()> {
    state
        .put_oracle_params(&genesis.params)
        .context("failed to put oracle params")?;
    for relayer in &genesis.band_relayers {
        state.put_band_relayer(relayer);
    }
    for band_state in &genesis.band_price_states {
        state
            .put_band_price_state(band_state)
            .context("failed to put band price state")?;
    }
    for band_state in &genesis.band_ibc_price_states {
        state
            .put_band_ibc_price_state(band_state)
            .context("failed to put band ibc price state")?;
    }
    for coinbase_state in &genesis.coinbase_price_states {
        state
            .put_coinbase_price_state(coinbase_state)
            .context("failed to put coinbase price state")?;
    }
    for pyth_state in &genesis.pyth_price_states {
        state
            .put_pyth_price_state(pyth_state)
            .context("failed to put pyth price state")?;
    }
    for publisher in &genesis.stork_publishers {
        state.put_stork_publisher(publisher);
    }
    for stork_state in &genesis.stork_price_states {
        state
            .put_stork_price_state(stork_state)
            .context("failed to put stork price state")?;
    }
    for provider_state in &genesis.provider_states {
        state
            .put_provider_info(&provider_state.provider_info)
            .context("failed to put provider info")?;
        for price_state in &provider_state.price_states {
            state
                .put_provider_price_state(&provider_state.provider_info.provider, price_state)
                .context("failed to put provider price state")?;
        }
    }
    for chainlink_state in &genesis.chainlink_price_states {
        state
            .put_chainlink_price_state(chainlink_state)
            .context("failed to put chainlink price state")?;
    }
    let mut index = Vec::new();
    for records in &genesis.historical_price_records {
        state
            .put_price_records(records.oracle_type, &records.symbol, &records.records)
            .context("failed to put historical price records")?;
        if let Some(last) = records.records.last() {
            set_last_price_timestamp(
                &mut index,
                records.oracle_type,
                &records.symbol,
                last.timestamp,
            );
        }
    }
    state
        .put_last_price_timestamps(&index)
        .context("failed to put last price timestamps")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn export<S: StateRead>(state: &S) -> Result<GenesisState> {
    use peridot_core::oracle::PriceRecords;

    let params = state
        .get_oracle_params()
        .await
        .context("failed to get oracle params")?;
    let index = state
        .get_last_price_timestamps()
        .await
        .context("failed to get last price timestamps")?;
    let mut historical_price_records = Vec::with_capacity(index.len());
    for entry in &index {
        let records = state
            .get_price_records(entry.oracle_type, &entry.symbol)
            .await
            .context("failed to get price records")?;
        historical_price_records.push(PriceRecords {
            oracle_type: entry.oracle_type,
            symbol: entry.symbol.clone(),
            records,
        });
    }
    let provider_states: Vec<ProviderState> = state
        .get_all_provider_states()
        .await
        .context("failed to get provider states")?;
    Ok(GenesisState {
        params,
        band_relayers: state
            .get_band_relayers()
            .await
            .context("failed to get band relayers")?,
        band_price_states: state
            .get_band_price_states()
            .await
            .context("failed to get band price states")?,
        band_ibc_price_states: state
            .get_band_ibc_price_states()
            .await
            .context("failed to get band ibc price states")?,
        coinbase_price_states: state
            .get_all_coinbase_price_states()
            .await
            .context("failed to get coinbase price states")?,
        pyth_price_states: state
            .get_pyth_price_states()
            .await
            .context("failed to get pyth price states")?,
        stork_publishers: state
            .get_stork_publishers()
            .await
            .context("failed to get stork publishers")?,
        stork_price_states: state
            .get_stork_price_states()
            .await
            .context("failed to get stork price states")?,
        provider_states,
        chainlink_price_states: state
            .get_chainlink_price_states()
            .await
            .context("failed to get chainlink price states")?,
        historical_price_records,
    })
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use peridot_core::{
        oracle::{
            BandPriceState,
            OracleParams,
            OracleType,
            PriceRecord,
            PriceRecords,
            PriceState,
        },
        primitive::Address,
    };
    use rust_decimal_macros::dec;

    use super::*;

    fn genesis() -> GenesisState {
        let mut genesis = GenesisState::with_params(OracleParams {
            admin: Address::from([200; 20]),
            coinbase_signer: Address::from([9; 20]),
        });
        genesis.band_relayers = vec![Address::from([1; 20])];
        genesis.band_price_states = vec![BandPriceState {
            symbol: "ATOM".into(),
            rate: 2_000_000_000,
            resolve_time: 10,
            request_id: 1,
            price_state: PriceState {
                price: dec!(2),
                cumulative_price: dec!(120),
                timestamp: 100,
            },
        }];
        genesis.historical_price_records = vec![PriceRecords {
            oracle_type: OracleType::Band,
            symbol: "ATOM".into(),
            records: vec![
                PriceRecord {
                    timestamp: 50,
                    price: dec!(1.9),
                },
                PriceRecord {
                    timestamp: 100,
                    price: dec!(2),
                },
            ],
        }];
        genesis
    }

    #[tokio::test]
    async fn import_then_export_round_trips() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        let genesis = genesis();
        import(&mut state, &genesis).await.unwrap();
        let exported = export(&state).await.unwrap();
        assert_eq!(exported, genesis);
    }

    #[tokio::test]
    async fn import_rebuilds_the_last_update_index() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        import(&mut state, &genesis()).await.unwrap();
        use crate::oracle::history::StateReadExt as _;
        let index = state.get_last_price_timestamps().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].symbol, "ATOM");
        assert_eq!(index[0].timestamp, 100);
    }

    #[tokio::test]
    async fn cumulative_prices_survive_the_round_trip() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        import(&mut state, &genesis()).await.unwrap();
        use crate::oracle::band::StateReadExt as _;
        let stored = state.get_band_price_state("ATOM").await.unwrap().unwrap();
        assert_eq!(stored.price_state.cumulative_price, dec!(120));
    }
}
