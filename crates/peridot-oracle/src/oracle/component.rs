use std::sync::Arc;

use anyhow::{
    Context,
    Result,
};
use peridot_core::oracle::HISTORY_PRUNE_INTERVAL;
use tendermint::abci::request::{
    BeginBlock,
    EndBlock,
};
use tracing::instrument;

use super::history::StateWriteExt as _;
use crate::{
    component::Component,
    genesis::GenesisState,
    state_ext::StateWriteExt as _,
};

#[derive(Default)]
pub struct OracleComponent;

#[async_trait::async_trait]
impl Component for OracleComponent {
    type AppState = GenesisState;

    #[instrument(name = "OracleComponent::init_chain", skip_all)]
    async fn init_chain<S: cnidarium::StateWrite>(
        mut state: S,
        app_state: &Self::AppState,
    ) -> Result<()> {
        state.put_chain_id(&app_state.chain_id);
        super::genesis::import(&mut state, &app_state.oracle)
            .await
            .context("failed to import oracle genesis state")?;
        Ok(())
    }

    /// Stores the block context for the message handlers and, on the prune
    /// cadence, sweeps the historical ledger.
    #[instrument(name = "OracleComponent::begin_block", skip_all)]
    async fn begin_block<S: cnidarium::StateWrite + 'static>(
        state: &mut Arc<S>,
        begin_block: &BeginBlock,
    ) -> Result<()> {
        let state = Arc::get_mut(state)
            .context("must only have one reference to the state; this is a bug")?;
        let height = begin_block.header.height.value();
        let timestamp = begin_block.header.time.unix_timestamp();
        state
            .put_block_height(height)
            .context("failed to put block height")?;
        state
            .put_block_timestamp(timestamp)
            .context("failed to put block timestamp")?;
        if height % HISTORY_PRUNE_INTERVAL == 0 {
            state
                .prune_historical_prices(timestamp)
                .await
                .context("failed to prune historical prices")?;
        }
        Ok(())
    }

    #[instrument(name = "OracleComponent::end_block", skip_all)]
    async fn end_block<S: cnidarium::StateWrite + 'static>(
        _state: &mut Arc<S>,
        _end_block: &EndBlock,
    ) -> Result<()> {
        Ok(())
    }
}
