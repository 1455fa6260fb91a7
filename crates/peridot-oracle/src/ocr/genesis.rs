//! OCR genesis import and export. Exported config infos are restored
//! verbatim so stored digests and config counts survive a restore
//! byte-for-byte; only a feed lacking an exported info gets a freshly
//! computed one.

use anyhow::{
    Context as _,
    Result,
};
use cnidarium::{
    StateRead,
    StateWrite,
};
use peridot_core::ocr::{
    FeedConfigInfoRecord,
    FeedCounts,
    FeedEpochAndRound,
    FeedLatestAggregatorRoundId,
    FeedTransmission,
    GenesisState,
    PayeeSet,
    PendingPayeeTransfer,
    RewardPool,
};
use tracing::instrument;

use super::{
    action::store_new_feed_config,
    StateReadExt as _,
    StateWriteExt as _,
};

#[instrument(skip_all)]
pub async fn import<S: StateWrite>(mut state: S, genesis: &GenesisState) -> Result<()> {
    state
        .put_ocr_params(&genesis.params)
        .context("failed to put ocr params")?;
    for config in &genesis.feed_configs {
        config
            .validate()
            .with_context(|| format!("invalid genesis feed `{}`", config.properties.feed_id))?;
        store_new_feed_config(&mut state, config, 1)
            .await
            .context("failed to store genesis feed config")?;
    }
    for entry in &genesis.feed_config_infos {
        state
            .put_feed_config_info(&entry.feed_id, &entry.info)
            .context("failed to put feed config info")?;
    }
    for entry in &genesis.latest_epoch_and_rounds {
        state
            .put_latest_epoch_and_round(&entry.feed_id, entry.epoch_and_round)
            .context("failed to put epoch and round")?;
    }
    for entry in &genesis.transmissions {
        state
            .put_transmission(&entry.feed_id, &entry.transmission)
            .context("failed to put transmission")?;
    }
    for entry in &genesis.latest_aggregator_round_ids {
        state
            .put_latest_aggregator_round_id(&entry.feed_id, entry.aggregator_round_id)
            .context("failed to put aggregator round id")?;
    }
    for entry in &genesis.reward_pools {
        state
            .put_reward_pool(&entry.feed_id, &entry.amount)
            .context("failed to put reward pool")?;
    }
    for entry in &genesis.observation_counts {
        state
            .put_observation_count(&entry.feed_id, &entry.address, entry.count)
            .context("failed to put observation count")?;
    }
    for entry in &genesis.transmission_counts {
        state
            .put_transmission_count(&entry.feed_id, &entry.address, entry.count)
            .context("failed to put transmission count")?;
    }
    for entry in &genesis.payees {
        state
            .put_payee(&entry.feed_id, &entry.transmitter, &entry.payee)
            .context("failed to put payee")?;
    }
    for entry in &genesis.pending_payeeship_transfers {
        state
            .put_pending_payee(&entry.feed_id, &entry.transmitter, &entry.proposed_payee)
            .context("failed to put pending payee")?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn export<S: StateRead>(state: &S) -> Result<GenesisState> {
    let params = state
        .get_ocr_params()
        .await
        .context("failed to get ocr params")?;
    let mut genesis = GenesisState::with_params(params);
    for feed_id in state
        .get_all_feed_ids()
        .await
        .context("failed to list feeds")?
    {
        let config = state
            .get_feed_config(&feed_id)
            .await
            .context("failed to get feed config")?
            .context("listed feed without a config")?;
        genesis.feed_configs.push(config);
        if let Some(info) = state
            .get_feed_config_info(&feed_id)
            .await
            .context("failed to get feed config info")?
        {
            genesis.feed_config_infos.push(FeedConfigInfoRecord {
                feed_id: feed_id.clone(),
                info,
            });
        }
        genesis.latest_epoch_and_rounds.push(FeedEpochAndRound {
            feed_id: feed_id.clone(),
            epoch_and_round: state
                .get_latest_epoch_and_round(&feed_id)
                .await
                .context("failed to get epoch and round")?,
        });
        if let Some(transmission) = state
            .get_transmission(&feed_id)
            .await
            .context("failed to get transmission")?
        {
            genesis.transmissions.push(FeedTransmission {
                feed_id: feed_id.clone(),
                transmission,
            });
        }
        genesis
            .latest_aggregator_round_ids
            .push(FeedLatestAggregatorRoundId {
                feed_id: feed_id.clone(),
                aggregator_round_id: state
                    .get_latest_aggregator_round_id(&feed_id)
                    .await
                    .context("failed to get aggregator round id")?,
            });
        if let Some(amount) = state
            .get_reward_pool(&feed_id)
            .await
            .context("failed to get reward pool")?
        {
            genesis.reward_pools.push(RewardPool {
                feed_id: feed_id.clone(),
                amount,
            });
        }
        for (address, count) in state
            .get_feed_observation_counts(&feed_id)
            .await
            .context("failed to get observation counts")?
        {
            genesis.observation_counts.push(FeedCounts {
                feed_id: feed_id.clone(),
                address,
                count,
            });
        }
        for (address, count) in state
            .get_feed_transmission_counts(&feed_id)
            .await
            .context("failed to get transmission counts")?
        {
            genesis.transmission_counts.push(FeedCounts {
                feed_id: feed_id.clone(),
                address,
                count,
            });
        }
        for (transmitter, payee) in state
            .get_feed_payees(&feed_id)
            .await
            .context("failed to get payees")?
        {
            genesis.payees.push(PayeeSet {
                feed_id: feed_id.clone(),
                transmitter,
                payee,
            });
        }
        for (transmitter, proposed_payee) in state
            .get_feed_pending_payees(&feed_id)
            .await
            .context("failed to get pending payees")?
        {
            genesis.pending_payeeship_transfers.push(PendingPayeeTransfer {
                feed_id: feed_id.clone(),
                transmitter,
                proposed_payee,
            });
        }
    }
    Ok(genesis)
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use peridot_core::{
        ocr::{
            EpochAndRound,
            FeedConfig,
            FeedProperties,
            OcrParams,
        },
        primitive::{
            Address,
            Coin,
        },
    };
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        ocr::StateReadExt as _,
        state_ext::StateWriteExt as _,
    };

    fn genesis_fixture() -> GenesisState {
        let mut genesis = GenesisState::with_params(OcrParams {
            link_denom: "link".into(),
            payout_block_interval: 1000,
            module_admin: Address::from([1; 20]),
        });
        genesis.feed_configs.push(FeedConfig {
            signers: (1_u8..=4).map(|i| Address::from([i; 20])).collect(),
            transmitters: (11_u8..=14).map(|i| Address::from([i; 20])).collect(),
            f: 1,
            onchain_config: vec![],
            offchain_config_version: 2,
            offchain_config: vec![1, 2, 3],
            properties: FeedProperties {
                feed_id: "ETH/USD".into(),
                link_denom: "link".into(),
                min_answer: dec!(1),
                max_answer: dec!(100000),
                link_per_observation: 5,
                link_per_transmission: 7,
                unique_reports: true,
                description: "eth feed".into(),
                feed_admin: Address::from([21; 20]),
                billing_admin: Address::from([22; 20]),
            },
        });
        genesis.feed_config_infos.push(FeedConfigInfoRecord {
            feed_id: "ETH/USD".into(),
            info: peridot_core::ocr::FeedConfigInfo {
                config_digest: [7; 32],
                f: 1,
                n: 4,
                config_count: 5,
                latest_config_block_number: 42,
            },
        });
        genesis.latest_epoch_and_rounds.push(FeedEpochAndRound {
            feed_id: "ETH/USD".into(),
            epoch_and_round: EpochAndRound { epoch: 4, round: 2 },
        });
        genesis.reward_pools.push(RewardPool {
            feed_id: "ETH/USD".into(),
            amount: Coin::new("link", 12345),
        });
        genesis.observation_counts.push(FeedCounts {
            feed_id: "ETH/USD".into(),
            address: Address::from([11; 20]),
            count: 9,
        });
        genesis.payees.push(PayeeSet {
            feed_id: "ETH/USD".into(),
            transmitter: Address::from([11; 20]),
            payee: Address::from([31; 20]),
        });
        genesis
    }

    #[tokio::test]
    async fn import_then_export_round_trips() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let mut state = StateDelta::new(storage.latest_snapshot());
        state.put_chain_id("peridot-1");
        state.put_block_height(0).unwrap();

        let genesis = genesis_fixture();
        import(&mut state, &genesis).await.unwrap();
        let exported = export(&state).await.unwrap();

        assert_eq!(exported.params, genesis.params);
        assert_eq!(exported.feed_configs, genesis.feed_configs);
        // the exported info is the stored one, digest and count untouched
        assert_eq!(exported.feed_config_infos, genesis.feed_config_infos);
        assert_eq!(exported.latest_epoch_and_rounds, genesis.latest_epoch_and_rounds);
        assert_eq!(exported.reward_pools, genesis.reward_pools);
        assert_eq!(exported.payees, genesis.payees);
        assert!(exported.pending_payeeship_transfers.is_empty());

        // the explicit genesis count overrides the seeded value, the rest
        // of the oracle set keeps the seed of 1
        let eleven = exported
            .observation_counts
            .iter()
            .find(|c| c.address == Address::from([11; 20]))
            .unwrap();
        assert_eq!(eleven.count, 9);
        assert_eq!(exported.observation_counts.len(), 4);
    }

    #[tokio::test]
    async fn import_computes_a_digest_when_no_info_is_exported() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let mut state = StateDelta::new(storage.latest_snapshot());
        state.put_chain_id("peridot-1");
        state.put_block_height(0).unwrap();

        let mut genesis = genesis_fixture();
        genesis.feed_config_infos.clear();
        import(&mut state, &genesis).await.unwrap();

        let info = state
            .get_feed_config_info("ETH/USD")
            .await
            .unwrap()
            .unwrap();
        let expected = genesis.feed_configs[0].digest("peridot-1", 1).unwrap();
        assert_eq!(info.config_digest, expected);
        assert_eq!(info.n, 4);
        assert_eq!(info.config_count, 1);
    }
}
