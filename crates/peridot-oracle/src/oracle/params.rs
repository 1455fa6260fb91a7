use anyhow::{
    bail,
    Context as _,
    Result,
};
use async_trait::async_trait;
use cnidarium::{
    StateRead,
    StateWrite,
};
use peridot_core::oracle::OracleParams;
use tracing::instrument;

const PARAMS_KEY: &str = "oracle/params";

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_oracle_params(&self) -> Result<OracleParams> {
        let Some(bytes) = self
            .get_raw(PARAMS_KEY)
            .await
            .context("failed reading oracle params from state")?
        else {
            bail!("oracle params not found in state");
        };
        serde_json::from_slice(&bytes).context("failed to deserialize oracle params")
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_oracle_params(&mut self, params: &OracleParams) -> Result<()> {
        let bytes = serde_json::to_vec(params).context("failed to serialize oracle params")?;
        self.put_raw(PARAMS_KEY.to_string(), bytes);
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}
