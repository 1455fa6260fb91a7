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
use futures::StreamExt as _;
use peridot_core::{
    ocr::{
        EpochAndRound,
        FeedConfig,
        FeedConfigInfo,
        OcrParams,
        Transmission,
    },
    primitive::{
        Address,
        Coin,
    },
};
use tracing::instrument;

const PARAMS_KEY: &str = "ocr/params";
const FEED_CONFIG_PREFIX: &str = "ocr/feedconfig";
const FEED_CONFIG_INFO_PREFIX: &str = "ocr/feedinfo";
const EPOCH_AND_ROUND_PREFIX: &str = "ocr/epochround";
const TRANSMISSION_PREFIX: &str = "ocr/transmission";
const AGGREGATOR_ROUND_ID_PREFIX: &str = "ocr/agground";
const OBSERVATION_COUNT_PREFIX: &str = "ocr/obscount";
const TRANSMISSION_COUNT_PREFIX: &str = "ocr/txcount";
const REWARD_POOL_PREFIX: &str = "ocr/pool";
const PAYEE_PREFIX: &str = "ocr/payee";
const PENDING_PAYEE_PREFIX: &str = "ocr/pendingpayee";

fn feed_config_storage_key(feed_id: &str) -> String {
    format!("{FEED_CONFIG_PREFIX}/{feed_id}")
}

fn feed_config_info_storage_key(feed_id: &str) -> String {
    format!("{FEED_CONFIG_INFO_PREFIX}/{feed_id}")
}

fn epoch_and_round_storage_key(feed_id: &str) -> String {
    format!("{EPOCH_AND_ROUND_PREFIX}/{feed_id}")
}

fn transmission_storage_key(feed_id: &str) -> String {
    format!("{TRANSMISSION_PREFIX}/{feed_id}")
}

fn aggregator_round_id_storage_key(feed_id: &str) -> String {
    format!("{AGGREGATOR_ROUND_ID_PREFIX}/{feed_id}")
}

fn observation_count_storage_key(feed_id: &str, address: &Address) -> String {
    format!("{OBSERVATION_COUNT_PREFIX}/{feed_id}/{address}")
}

fn transmission_count_storage_key(feed_id: &str, address: &Address) -> String {
    format!("{TRANSMISSION_COUNT_PREFIX}/{feed_id}/{address}")
}

fn reward_pool_storage_key(feed_id: &str) -> String {
    format!("{REWARD_POOL_PREFIX}/{feed_id}")
}

fn payee_storage_key(feed_id: &str, transmitter: &Address) -> String {
    format!("{PAYEE_PREFIX}/{feed_id}/{transmitter}")
}

fn pending_payee_storage_key(feed_id: &str, transmitter: &Address) -> String {
    format!("{PENDING_PAYEE_PREFIX}/{feed_id}/{transmitter}")
}

// Feed ids may contain `/`, so the address is split off the end.
fn extract_address_suffix(prefix: &str, key: &str) -> Result<(String, Address)> {
    let suffix = key
        .strip_prefix(prefix)
        .and_then(|s| s.strip_prefix('/'))
        .context("failed to strip prefix from storage key")?;
    let (feed_id, address) = suffix
        .rsplit_once('/')
        .context("storage key missing address suffix")?;
    Ok((
        feed_id.to_string(),
        address
            .parse::<Address>()
            .context("failed to parse storage key suffix as address")?,
    ))
}

/// Newtype wrapper to read and write a u64 from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Count(u64);

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_ocr_params(&self) -> Result<OcrParams> {
        let Some(bytes) = self
            .get_raw(PARAMS_KEY)
            .await
            .context("failed reading ocr params from state")?
        else {
            bail!("ocr params not found in state");
        };
        serde_json::from_slice(&bytes).context("failed to deserialize ocr params")
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_config(&self, feed_id: &str) -> Result<Option<FeedConfig>> {
        let bytes = self
            .get_raw(&feed_config_storage_key(feed_id))
            .await
            .context("failed reading feed config from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize feed config")
            })
            .transpose()
    }

    #[instrument(skip_all)]
    async fn get_all_feed_ids(&self) -> Result<Vec<String>> {
        let prefix = format!("{FEED_CONFIG_PREFIX}/");
        let mut stream = std::pin::pin!(self.prefix_keys(&prefix));
        let mut feed_ids = Vec::new();
        while let Some(key) = stream.next().await {
            let key = key.context("failed reading feed config keys from state")?;
            let feed_id = key
                .strip_prefix(&prefix)
                .context("failed to strip prefix from feed config key")?;
            feed_ids.push(feed_id.to_string());
        }
        Ok(feed_ids)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_config_info(&self, feed_id: &str) -> Result<Option<FeedConfigInfo>> {
        let bytes = self
            .get_raw(&feed_config_info_storage_key(feed_id))
            .await
            .context("failed reading feed config info from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize feed config info")
            })
            .transpose()
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_latest_epoch_and_round(&self, feed_id: &str) -> Result<EpochAndRound> {
        let Some(bytes) = self
            .get_raw(&epoch_and_round_storage_key(feed_id))
            .await
            .context("failed reading epoch and round from state")?
        else {
            return Ok(EpochAndRound::default());
        };
        EpochAndRound::try_from_slice(&bytes).context("invalid epoch and round bytes")
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_transmission(&self, feed_id: &str) -> Result<Option<Transmission>> {
        let bytes = self
            .get_raw(&transmission_storage_key(feed_id))
            .await
            .context("failed reading transmission from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize transmission")
            })
            .transpose()
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_latest_aggregator_round_id(&self, feed_id: &str) -> Result<u64> {
        let Some(bytes) = self
            .get_raw(&aggregator_round_id_storage_key(feed_id))
            .await
            .context("failed reading aggregator round id from state")?
        else {
            return Ok(0);
        };
        let Count(round_id) =
            Count::try_from_slice(&bytes).context("invalid aggregator round id bytes")?;
        Ok(round_id)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_observation_count(&self, feed_id: &str, address: &Address) -> Result<u64> {
        let Some(bytes) = self
            .get_raw(&observation_count_storage_key(feed_id, address))
            .await
            .context("failed reading observation count from state")?
        else {
            return Ok(0);
        };
        let Count(count) = Count::try_from_slice(&bytes).context("invalid observation count bytes")?;
        Ok(count)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_transmission_count(&self, feed_id: &str, address: &Address) -> Result<u64> {
        let Some(bytes) = self
            .get_raw(&transmission_count_storage_key(feed_id, address))
            .await
            .context("failed reading transmission count from state")?
        else {
            return Ok(0);
        };
        let Count(count) =
            Count::try_from_slice(&bytes).context("invalid transmission count bytes")?;
        Ok(count)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_observation_counts(&self, feed_id: &str) -> Result<Vec<(Address, u64)>> {
        self.collect_counts(OBSERVATION_COUNT_PREFIX, feed_id).await
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_transmission_counts(&self, feed_id: &str) -> Result<Vec<(Address, u64)>> {
        self.collect_counts(TRANSMISSION_COUNT_PREFIX, feed_id).await
    }

    async fn collect_counts(&self, prefix: &str, feed_id: &str) -> Result<Vec<(Address, u64)>> {
        let scan_prefix = format!("{prefix}/{feed_id}/");
        let mut stream = std::pin::pin!(self.prefix_raw(&scan_prefix));
        let mut counts = Vec::new();
        while let Some(item) = stream.next().await {
            let (key, bytes) = item.context("failed reading counts from state")?;
            let (key_feed_id, address) = extract_address_suffix(prefix, &key)?;
            // a feed id is itself allowed to contain `/`, so the scan
            // prefix can overmatch
            if key_feed_id != feed_id {
                continue;
            }
            let Count(count) = Count::try_from_slice(&bytes).context("invalid count bytes")?;
            counts.push((address, count));
        }
        counts.sort_unstable_by_key(|(address, _)| *address);
        Ok(counts)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_reward_pool(&self, feed_id: &str) -> Result<Option<Coin>> {
        let bytes = self
            .get_raw(&reward_pool_storage_key(feed_id))
            .await
            .context("failed reading reward pool from state")?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes).context("failed to deserialize reward pool"))
            .transpose()
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_payee(&self, feed_id: &str, transmitter: &Address) -> Result<Option<Address>> {
        let bytes = self
            .get_raw(&payee_storage_key(feed_id, transmitter))
            .await
            .context("failed reading payee from state")?;
        bytes
            .map(|bytes| Address::try_from_slice(&bytes).context("invalid payee bytes"))
            .transpose()
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_pending_payee(
        &self,
        feed_id: &str,
        transmitter: &Address,
    ) -> Result<Option<Address>> {
        let bytes = self
            .get_raw(&pending_payee_storage_key(feed_id, transmitter))
            .await
            .context("failed reading pending payee from state")?;
        bytes
            .map(|bytes| Address::try_from_slice(&bytes).context("invalid pending payee bytes"))
            .transpose()
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_payees(&self, feed_id: &str) -> Result<Vec<(Address, Address)>> {
        let scan_prefix = format!("{PAYEE_PREFIX}/{feed_id}/");
        let mut stream = std::pin::pin!(self.prefix_raw(&scan_prefix));
        let mut payees = Vec::new();
        while let Some(item) = stream.next().await {
            let (key, bytes) = item.context("failed reading payees from state")?;
            let (key_feed_id, transmitter) = extract_address_suffix(PAYEE_PREFIX, &key)?;
            if key_feed_id != feed_id {
                continue;
            }
            let payee = Address::try_from_slice(&bytes).context("invalid payee bytes")?;
            payees.push((transmitter, payee));
        }
        Ok(payees)
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn get_feed_pending_payees(&self, feed_id: &str) -> Result<Vec<(Address, Address)>> {
        let scan_prefix = format!("{PENDING_PAYEE_PREFIX}/{feed_id}/");
        let mut stream = std::pin::pin!(self.prefix_raw(&scan_prefix));
        let mut pending = Vec::new();
        while let Some(item) = stream.next().await {
            let (key, bytes) = item.context("failed reading pending payees from state")?;
            let (key_feed_id, transmitter) = extract_address_suffix(PENDING_PAYEE_PREFIX, &key)?;
            if key_feed_id != feed_id {
                continue;
            }
            let payee = Address::try_from_slice(&bytes).context("invalid pending payee bytes")?;
            pending.push((transmitter, payee));
        }
        Ok(pending)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_ocr_params(&mut self, params: &OcrParams) -> Result<()> {
        let bytes = serde_json::to_vec(params).context("failed to serialize ocr params")?;
        self.put_raw(PARAMS_KEY.to_string(), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_feed_config(&mut self, feed_id: &str, config: &FeedConfig) -> Result<()> {
        let bytes = serde_json::to_vec(config).context("failed to serialize feed config")?;
        self.put_raw(feed_config_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_feed_config_info(&mut self, feed_id: &str, info: &FeedConfigInfo) -> Result<()> {
        let bytes = serde_json::to_vec(info).context("failed to serialize feed config info")?;
        self.put_raw(feed_config_info_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_latest_epoch_and_round(
        &mut self,
        feed_id: &str,
        epoch_and_round: EpochAndRound,
    ) -> Result<()> {
        let bytes =
            borsh::to_vec(&epoch_and_round).context("failed to serialize epoch and round")?;
        self.put_raw(epoch_and_round_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_transmission(&mut self, feed_id: &str, transmission: &Transmission) -> Result<()> {
        let bytes = serde_json::to_vec(transmission).context("failed to serialize transmission")?;
        self.put_raw(transmission_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_latest_aggregator_round_id(&mut self, feed_id: &str, round_id: u64) -> Result<()> {
        let bytes =
            borsh::to_vec(&Count(round_id)).context("failed to serialize aggregator round id")?;
        self.put_raw(aggregator_round_id_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_observation_count(&mut self, feed_id: &str, address: &Address, count: u64) -> Result<()> {
        let bytes = borsh::to_vec(&Count(count)).context("failed to serialize observation count")?;
        self.put_raw(observation_count_storage_key(feed_id, address), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_transmission_count(
        &mut self,
        feed_id: &str,
        address: &Address,
        count: u64,
    ) -> Result<()> {
        let bytes =
            borsh::to_vec(&Count(count)).context("failed to serialize transmission count")?;
        self.put_raw(transmission_count_storage_key(feed_id, address), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn increment_observation_count(&mut self, feed_id: &str, address: &Address) -> Result<()> {
        let count = self
            .get_observation_count(feed_id, address)
            .await
            .context("failed to get observation count")?;
        self.put_observation_count(feed_id, address, count.saturating_add(1))
            .context("failed to put observation count")?;
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    async fn increment_transmission_count(&mut self, feed_id: &str, address: &Address) -> Result<()> {
        let count = self
            .get_transmission_count(feed_id, address)
            .await
            .context("failed to get transmission count")?;
        self.put_transmission_count(feed_id, address, count.saturating_add(1))
            .context("failed to put transmission count")?;
        Ok(())
    }

    /// Removes every reward counter of a feed.
    #[instrument(skip_all, fields(feed_id))]
    async fn delete_feed_counts(&mut self, feed_id: &str) -> Result<()> {
        for (address, _) in self
            .get_feed_observation_counts(feed_id)
            .await
            .context("failed to get observation counts")?
        {
            self.delete(observation_count_storage_key(feed_id, &address));
        }
        for (address, _) in self
            .get_feed_transmission_counts(feed_id)
            .await
            .context("failed to get transmission counts")?
        {
            self.delete(transmission_count_storage_key(feed_id, &address));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_reward_pool(&mut self, feed_id: &str, pool: &Coin) -> Result<()> {
        let bytes = serde_json::to_vec(pool).context("failed to serialize reward pool")?;
        self.put_raw(reward_pool_storage_key(feed_id), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_payee(&mut self, feed_id: &str, transmitter: &Address, payee: &Address) -> Result<()> {
        let bytes = borsh::to_vec(payee).context("failed to serialize payee")?;
        self.put_raw(payee_storage_key(feed_id, transmitter), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn put_pending_payee(
        &mut self,
        feed_id: &str,
        transmitter: &Address,
        payee: &Address,
    ) -> Result<()> {
        let bytes = borsh::to_vec(payee).context("failed to serialize pending payee")?;
        self.put_raw(pending_payee_storage_key(feed_id, transmitter), bytes);
        Ok(())
    }

    #[instrument(skip_all, fields(feed_id))]
    fn delete_pending_payee(&mut self, feed_id: &str, transmitter: &Address) {
        self.delete(pending_payee_storage_key(feed_id, transmitter));
    }
}

impl<T: StateWrite> StateWriteExt for T {}
