//! Chain-level state shared by every component: chain id, block height, and
//! block timestamp.

use anyhow::{
    bail,
    Context as _,
    Result,
};
use async_trait::async_trait;
use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use cnidarium::{
    StateRead,
    StateWrite,
};
use tracing::instrument;

const CHAIN_ID_KEY: &str = "chain_id";
const BLOCK_HEIGHT_KEY: &str = "block_height";
const BLOCK_TIMESTAMP_KEY: &str = "block_timestamp";

/// Newtype wrapper to read and write a u64 from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Height(u64);

/// Newtype wrapper to read and write an i64 from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Timestamp(i64);

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_chain_id(&self) -> Result<String> {
        let Some(bytes) = self
            .get_raw(CHAIN_ID_KEY)
            .await
            .context("failed reading chain id from state")?
        else {
            bail!("chain id not found in state");
        };
        String::from_utf8(bytes).context("invalid chain id bytes")
    }

    #[instrument(skip_all)]
    async fn get_block_height(&self) -> Result<u64> {
        let Some(bytes) = self
            .get_raw(BLOCK_HEIGHT_KEY)
            .await
            .context("failed reading block height from state")?
        else {
            bail!("block height not found in state");
        };
        let Height(height) = Height::try_from_slice(&bytes).context("invalid block height bytes")?;
        Ok(height)
    }

    /// Unix seconds of the block currently being executed.
    #[instrument(skip_all)]
    async fn get_block_timestamp(&self) -> Result<i64> {
        let Some(bytes) = self
            .get_raw(BLOCK_TIMESTAMP_KEY)
            .await
            .context("failed reading block timestamp from state")?
        else {
            bail!("block timestamp not found in state");
        };
        let Timestamp(timestamp) =
            Timestamp::try_from_slice(&bytes).context("invalid block timestamp bytes")?;
        Ok(timestamp)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_chain_id(&mut self, chain_id: &str) {
        self.put_raw(CHAIN_ID_KEY.to_string(), chain_id.as_bytes().to_vec());
    }

    #[instrument(skip_all)]
    fn put_block_height(&mut self, height: u64) -> Result<()> {
        let bytes = borsh::to_vec(&Height(height)).context("failed to serialize block height")?;
        self.put_raw(BLOCK_HEIGHT_KEY.to_string(), bytes);
        Ok(())
    }

    #[instrument(skip_all)]
    fn put_block_timestamp(&mut self, timestamp: i64) -> Result<()> {
        let bytes =
            borsh::to_vec(&Timestamp(timestamp)).context("failed to serialize block timestamp")?;
        self.put_raw(BLOCK_TIMESTAMP_KEY.to_string(), bytes);
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}
