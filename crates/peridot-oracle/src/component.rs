use std::sync::Arc;

use anyhow::Result;
use cnidarium::StateWrite;
use tendermint::abci::request::{
    BeginBlock,
    EndBlock,
};

/// A block-lifecycle participant of the ABCI application.
#[async_trait::async_trait]
pub trait Component {
    /// The genesis slice this component initializes itself from.
    type AppState;

    async fn init_chain<S: StateWrite>(state: S, app_state: &Self::AppState) -> Result<()>;

    async fn begin_block<S: StateWrite + 'static>(
        state: &mut Arc<S>,
        begin_block: &BeginBlock,
    ) -> Result<()>;

    async fn end_block<S: StateWrite + 'static>(
        state: &mut Arc<S>,
        end_block: &EndBlock,
    ) -> Result<()>;
}
