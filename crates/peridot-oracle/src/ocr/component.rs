use std::sync::Arc;

use anyhow::{
    Context,
    Result,
};
use tendermint::abci::request::{
    BeginBlock,
    EndBlock,
};
use tracing::instrument;

use super::{
    rewards::disburse_rewards,
    StateReadExt as _,
};
use crate::{
    component::Component,
    genesis::GenesisState,
};

#[derive(Default)]
pub struct OcrComponent;

#[async_trait::async_trait]
impl Component for OcrComponent {
    type AppState = GenesisState;

    #[instrument(name = "OcrComponent::init_chain", skip_all)]
    async fn init_chain<S: cnidarium::StateWrite>(
        mut state: S,
        app_state: &Self::AppState,
    ) -> Result<()> {
        super::genesis::import(&mut state, &app_state.ocr)
            .await
            .context("failed to import ocr genesis state")?;
        Ok(())
    }

    #[instrument(name = "OcrComponent::begin_block", skip_all)]
    async fn begin_block<S: cnidarium::StateWrite + 'static>(
        _state: &mut Arc<S>,
        _begin_block: &BeginBlock,
    ) -> Result<()> {
        Ok(())
    }

    /// Pays out the accumulated observation and transmission rewards of
    /// every feed on the configured block cadence.
    #[instrument(name = "OcrComponent::end_block", skip_all)]
    async fn end_block<S: cnidarium::StateWrite + 'static>(
        state: &mut Arc<S>,
        end_block: &EndBlock,
    ) -> Result<()> {
        let state = Arc::get_mut(state)
            .context("must only have one reference to the state; this is a bug")?;
        let params = state
            .get_ocr_params()
            .await
            .context("failed to get ocr params")?;
        if params.payout_block_interval == 0 {
            return Ok(());
        }
        let height = u64::try_from(end_block.height).context("negative block height")?;
        if height % params.payout_block_interval != 0 {
            return Ok(());
        }
        for feed_id in state
            .get_all_feed_ids()
            .await
            .context("failed to list feeds")?
        {
            disburse_rewards(state, &feed_id)
                .await
                .with_context(|| format!("failed to disburse rewards of feed `{feed_id}`"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use peridot_core::{
        ocr::{
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
        accounts::StateReadExt as _,
        ocr::StateWriteExt as _,
        state_ext::StateWriteExt as _,
    };

    fn end_block_request(height: i64) -> EndBlock {
        EndBlock { height }
    }

    #[tokio::test]
    async fn end_block_pays_out_on_the_interval() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let mut state = StateDelta::new(storage.latest_snapshot());
        state.put_chain_id("peridot-1");
        state.put_block_height(0).unwrap();
        state
            .put_ocr_params(&OcrParams {
                link_denom: "link".into(),
                payout_block_interval: 10,
                module_admin: Address::from([1; 20]),
            })
            .unwrap();

        let transmitter = Address::from([11; 20]);
        let config = FeedConfig {
            signers: (1_u8..=4).map(|i| Address::from([i; 20])).collect(),
            transmitters: (11_u8..=14).map(|i| Address::from([i; 20])).collect(),
            f: 1,
            onchain_config: vec![],
            offchain_config_version: 1,
            offchain_config: vec![],
            properties: FeedProperties {
                feed_id: "BTC/USD".into(),
                link_denom: "link".into(),
                min_answer: dec!(1),
                max_answer: dec!(100000),
                link_per_observation: 10,
                link_per_transmission: 0,
                unique_reports: false,
                description: String::new(),
                feed_admin: Address::from([21; 20]),
                billing_admin: Address::from([22; 20]),
            },
        };
        super::super::action::store_new_feed_config(&mut state, &config, 1)
            .await
            .unwrap();
        state
            .put_observation_count("BTC/USD", &transmitter, 5)
            .unwrap();
        state
            .put_reward_pool("BTC/USD", &Coin::new("link", 1000))
            .unwrap();

        // off the cadence nothing happens
        let mut state = Arc::new(state);
        OcrComponent::end_block(&mut state, &end_block_request(9))
            .await
            .unwrap();
        assert_eq!(
            state.get_account_balance(&transmitter, "link").await.unwrap(),
            0
        );

        OcrComponent::end_block(&mut state, &end_block_request(10))
            .await
            .unwrap();
        assert_eq!(
            state.get_account_balance(&transmitter, "link").await.unwrap(),
            50
        );
    }
}
