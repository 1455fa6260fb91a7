//! Message handlers of the OCR component. The transmit pipeline performs
//! every check before any write, so a rejected transmission leaves no
//! trace in state.

use anyhow::{
    anyhow,
    Context as _,
    Result,
};
use cnidarium::StateWrite;
use peridot_core::{
    crypto::recover_signer,
    ocr::{
        AcceptPayeeship,
        CreateFeed,
        EpochAndRound,
        FeedConfig,
        FeedConfigInfo,
        FundFeedRewardPool,
        ReportToSign,
        SetPayees,
        TransferPayeeship,
        Transmission,
        Transmit,
        UpdateFeed,
        WithdrawFeedRewardPool,
    },
    primitive::{
        Address,
        Coin,
    },
    OracleError,
};
use tendermint::abci::{
    Event,
    EventAttributeIndexExt as _,
};
use tracing::instrument;

use super::{
    rewards::disburse_rewards,
    StateReadExt as _,
    StateWriteExt as _,
};
use crate::{
    accounts::StateWriteExt as _,
    action_handler::ActionHandler,
    oracle::chainlink::StateWriteExt as _,
    state_ext::StateReadExt as _,
};

fn transmit_event(feed_id: &str, epoch_and_round: EpochAndRound, answer: &str) -> Event {
    Event::new(
        "transmission",
        [
            ("feed_id", feed_id.to_string()).index(),
            ("epoch", epoch_and_round.epoch.to_string()).index(),
            ("round", epoch_and_round.round.to_string()).index(),
            ("answer", answer.to_string()).index(),
        ],
    )
}

pub(super) async fn store_new_feed_config<S: StateWrite>(
    state: &mut S,
    config: &FeedConfig,
    config_count: u64,
) -> Result<()> {
    let feed_id = &config.properties.feed_id;
    let chain_id = state
        .get_chain_id()
        .await
        .context("failed to get chain id")?;
    let block_height = state
        .get_block_height()
        .await
        .context("failed to get block height")?;
    let config_digest = config
        .digest(&chain_id, config_count)
        .context("failed to compute config digest")?;
    state
        .put_feed_config(feed_id, config)
        .context("failed to put feed config")?;
    state
        .put_feed_config_info(
            feed_id,
            &FeedConfigInfo {
                config_digest,
                f: config.f,
                n: u32::try_from(config.signers.len()).context("oracle set size overflow")?,
                config_count,
                latest_config_block_number: block_height,
            },
        )
        .context("failed to put feed config info")?;
    state
        .put_latest_epoch_and_round(feed_id, EpochAndRound::default())
        .context("failed to put epoch and round")?;
    for transmitter in &config.transmitters {
        state
            .put_observation_count(feed_id, transmitter, 1)
            .context("failed to seed observation count")?;
        state
            .put_transmission_count(feed_id, transmitter, 1)
            .context("failed to seed transmission count")?;
    }
    state.record(Event::new(
        "feed_config_set",
        [
            ("feed_id", feed_id.to_string()).index(),
            ("config_digest", hex::encode(config_digest)).index(),
            ("config_count", config_count.to_string()).index(),
        ],
    ));
    Ok(())
}

#[async_trait::async_trait]
impl ActionHandler for CreateFeed {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.config.properties.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let params = state
            .get_ocr_params()
            .await
            .context("failed to get ocr params")?;
        if self.sender != params.module_admin {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not the ocr module admin",
                self.sender
            ))));
        }
        if self.config.properties.link_denom != params.link_denom {
            return Err(anyhow!(OracleError::InvalidInput(format!(
                "feed denom `{}` does not match module denom `{}`",
                self.config.properties.link_denom, params.link_denom
            ))));
        }
        let feed_id = &self.config.properties.feed_id;
        if state
            .get_feed_config(feed_id)
            .await
            .context("failed to get feed config")?
            .is_some()
        {
            return Err(anyhow!(OracleError::InvalidInput(format!(
                "feed `{feed_id}` already exists"
            ))));
        }
        store_new_feed_config(&mut state, &self.config, 1)
            .await
            .context("failed to store feed config")
    }
}

#[async_trait::async_trait]
impl ActionHandler for UpdateFeed {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let Some(mut config) = state
            .get_feed_config(&self.feed_id)
            .await
            .context("failed to get feed config")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` does not exist",
                self.feed_id
            ))));
        };
        let is_feed_admin = self.sender == config.properties.feed_admin;
        let is_billing_admin = self.sender == config.properties.billing_admin;
        if self.touches_oracle_set() {
            if !is_feed_admin {
                return Err(anyhow!(OracleError::Unauthorized(format!(
                    "{} is not the feed admin of `{}`",
                    self.sender, self.feed_id
                ))));
            }
        } else if !is_feed_admin && !is_billing_admin {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is neither feed admin nor billing admin of `{}`",
                self.sender, self.feed_id
            ))));
        }

        // settle outstanding rewards at the old rates, then clear the
        // counters and round state before the configuration changes
        disburse_rewards(&mut state, &self.feed_id)
            .await
            .context("failed to disburse rewards")?;
        state
            .delete_feed_counts(&self.feed_id)
            .await
            .context("failed to delete feed counts")?;

        if let (Some(signers), Some(transmitters)) = (&self.signers, &self.transmitters) {
            config.signers = signers.clone();
            config.transmitters = transmitters.clone();
        }
        if let Some(link_per_observation) = self.link_per_observation {
            config.properties.link_per_observation = link_per_observation;
        }
        if let Some(link_per_transmission) = self.link_per_transmission {
            config.properties.link_per_transmission = link_per_transmission;
        }
        if let Some(feed_admin) = self.feed_admin {
            config.properties.feed_admin = feed_admin;
        }
        if let Some(billing_admin) = self.billing_admin {
            config.properties.billing_admin = billing_admin;
        }
        config.validate().map_err(|e| anyhow!(e))?;

        let config_count = state
            .get_feed_config_info(&self.feed_id)
            .await
            .context("failed to get feed config info")?
            .map_or(1, |info| info.config_count.saturating_add(1));
        store_new_feed_config(&mut state, &config, config_count)
            .await
            .context("failed to store feed config")
    }
}

#[async_trait::async_trait]
impl ActionHandler for Transmit {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let epoch_and_round = EpochAndRound {
            epoch: self.epoch,
            round: self.round,
        };
        let stored = state
            .get_latest_epoch_and_round(&self.feed_id)
            .await
            .context("failed to get epoch and round")?;
        if epoch_and_round <= stored {
            return Err(anyhow!(OracleError::Stale(format!(
                "transmission for epoch {} round {} does not advance past epoch {} round {}",
                self.epoch, self.round, stored.epoch, stored.round
            ))));
        }
        let Some(info) = state
            .get_feed_config_info(&self.feed_id)
            .await
            .context("failed to get feed config info")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` does not exist",
                self.feed_id
            ))));
        };
        if self.config_digest != info.config_digest {
            return Err(anyhow!(OracleError::DigestMismatch));
        }
        let config = state
            .get_feed_config(&self.feed_id)
            .await
            .context("failed to get feed config")?
            .context("feed config info present without feed config")?;
        if !config.transmitters.contains(&self.sender) {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not a transmitter of feed `{}`",
                self.sender, self.feed_id
            ))));
        }
        if self.report.observations.len() <= 2 * config.f as usize {
            return Err(anyhow!(OracleError::QuorumFailure(format!(
                "{} observations do not exceed 2f = {}",
                self.report.observations.len(),
                2 * config.f
            ))));
        }
        let median = self
            .report
            .median()
            .ok_or_else(|| anyhow!(OracleError::InvalidInput("empty observations".into())))?;
        if median < config.properties.min_answer || median > config.properties.max_answer {
            return Err(anyhow!(OracleError::OutOfBounds));
        }
        let required = config.required_signatures();
        if self.signatures.len() != required {
            return Err(anyhow!(OracleError::QuorumFailure(format!(
                "expected exactly {required} signatures, got {}",
                self.signatures.len()
            ))));
        }

        // recover every signer before any state is touched; one bad
        // signature rejects the whole transmission
        let digest = ReportToSign {
            config_digest: self.config_digest,
            epoch: self.epoch,
            round: self.round,
            extra_hash: self.extra_hash.clone(),
            report: self.report.clone(),
        }
        .signing_digest()
        .context("failed to compute report digest")?;
        let mut observers: Vec<Address> = Vec::with_capacity(self.signatures.len());
        for signature in &self.signatures {
            let signer = recover_signer(&digest, signature)
                .map_err(|e| anyhow!(OracleError::QuorumFailure(e.to_string())))?;
            let Some(index) = config.signers.iter().position(|s| *s == signer) else {
                return Err(anyhow!(OracleError::QuorumFailure(format!(
                    "recovered signer {signer} is not part of the oracle set"
                ))));
            };
            let observer = config.transmitters[index];
            if observers.contains(&observer) {
                return Err(anyhow!(OracleError::QuorumFailure(format!(
                    "duplicate signature from {signer}"
                ))));
            }
            observers.push(observer);
        }

        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for observer in &observers {
            state
                .increment_observation_count(&self.feed_id, observer)
                .await
                .context("failed to increment observation count")?;
        }
        state
            .increment_transmission_count(&self.feed_id, &self.sender)
            .await
            .context("failed to increment transmission count")?;
        state
            .put_latest_epoch_and_round(&self.feed_id, epoch_and_round)
            .context("failed to put epoch and round")?;
        let round_id = state
            .get_latest_aggregator_round_id(&self.feed_id)
            .await
            .context("failed to get aggregator round id")?;
        state
            .put_latest_aggregator_round_id(&self.feed_id, round_id.saturating_add(1))
            .context("failed to put aggregator round id")?;
        state
            .put_transmission(
                &self.feed_id,
                &Transmission {
                    answer: median,
                    observations_timestamp: self.report.observations_timestamp,
                    transmission_timestamp: block_timestamp,
                },
            )
            .context("failed to put transmission")?;
        state
            .apply_ocr_transmission(&self.feed_id, median, block_timestamp)
            .await
            .context("failed to feed transmission into the chainlink adapter")?;
        state.record(transmit_event(
            &self.feed_id,
            epoch_and_round,
            &median.to_string(),
        ));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for FundFeedRewardPool {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let params = state
            .get_ocr_params()
            .await
            .context("failed to get ocr params")?;
        if self.amount.denom != params.link_denom {
            return Err(anyhow!(OracleError::InvalidInput(format!(
                "cannot fund with denom `{}`, feeds are billed in `{}`",
                self.amount.denom, params.link_denom
            ))));
        }
        if state
            .get_feed_config(&self.feed_id)
            .await
            .context("failed to get feed config")?
            .is_none()
        {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` does not exist",
                self.feed_id
            ))));
        }
        state
            .decrease_balance(&self.sender, &self.amount.denom, self.amount.amount)
            .await
            .context("failed to debit funder")?;
        let pool = state
            .get_reward_pool(&self.feed_id)
            .await
            .context("failed to get reward pool")?
            .unwrap_or_else(|| Coin::new(self.amount.denom.clone(), 0));
        state
            .put_reward_pool(
                &self.feed_id,
                &Coin::new(
                    pool.denom.clone(),
                    pool.amount
                        .checked_add(self.amount.amount)
                        .context("reward pool overflow")?,
                ),
            )
            .context("failed to put reward pool")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for WithdrawFeedRewardPool {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let Some(config) = state
            .get_feed_config(&self.feed_id)
            .await
            .context("failed to get feed config")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` does not exist",
                self.feed_id
            ))));
        };
        if self.sender != config.properties.billing_admin {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not the billing admin of `{}`",
                self.sender, self.feed_id
            ))));
        }
        let Some(pool) = state
            .get_reward_pool(&self.feed_id)
            .await
            .context("failed to get reward pool")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` has no reward pool",
                self.feed_id
            ))));
        };
        if self.amount.denom != pool.denom {
            return Err(anyhow!(OracleError::InvalidInput(format!(
                "cannot withdraw denom `{}` from a pool of `{}`",
                self.amount.denom, pool.denom
            ))));
        }
        let Some(remaining) = pool.amount.checked_sub(self.amount.amount) else {
            return Err(anyhow!(OracleError::InvalidInput(format!(
                "withdrawal of {} exceeds pool of {}",
                self.amount.amount, pool.amount
            ))));
        };
        state
            .put_reward_pool(&self.feed_id, &Coin::new(pool.denom.clone(), remaining))
            .context("failed to put reward pool")?;
        state
            .increase_balance(&self.sender, &pool.denom, self.amount.amount)
            .await
            .context("failed to credit withdrawer")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for SetPayees {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let Some(config) = state
            .get_feed_config(&self.feed_id)
            .await
            .context("failed to get feed config")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "feed `{}` does not exist",
                self.feed_id
            ))));
        };
        if self.sender != config.properties.feed_admin {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not the feed admin of `{}`",
                self.sender, self.feed_id
            ))));
        }
        for (transmitter, payee) in self.transmitters.iter().zip(&self.payees) {
            if state
                .get_payee(&self.feed_id, transmitter)
                .await
                .context("failed to get payee")?
                .is_some()
            {
                return Err(anyhow!(OracleError::InvalidInput(format!(
                    "payee of transmitter {transmitter} is already set"
                ))));
            }
            state
                .put_payee(&self.feed_id, transmitter, payee)
                .context("failed to put payee")?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for TransferPayeeship {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let current = state
            .get_payee(&self.feed_id, &self.transmitter)
            .await
            .context("failed to get payee")?;
        if current != Some(self.sender) {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not the payee of transmitter {}",
                self.sender, self.transmitter
            ))));
        }
        state
            .put_pending_payee(&self.feed_id, &self.transmitter, &self.proposed)
            .context("failed to put pending payee")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for AcceptPayeeship {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, feed_id = self.feed_id))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let pending = state
            .get_pending_payee(&self.feed_id, &self.transmitter)
            .await
            .context("failed to get pending payee")?;
        if pending != Some(self.sender) {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} has no pending payeeship for transmitter {}",
                self.sender, self.transmitter
            ))));
        }
        state
            .put_payee(&self.feed_id, &self.transmitter, &self.sender)
            .context("failed to put payee")?;
        state.delete_pending_payee(&self.feed_id, &self.transmitter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;
    use k256::ecdsa::SigningKey;
    use peridot_core::{
        crypto::sign_recoverable,
        ocr::{
            FeedProperties,
            OcrParams,
            Report,
        },
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{
        accounts::{
            StateReadExt as _,
            StateWriteExt as _,
        },
        ocr::{
            StateReadExt as _,
            StateWriteExt as _,
        },
        oracle::chainlink::StateReadExt as _,
        state_ext::StateWriteExt as _,
    };

    const FEED_ID: &str = "BTC/USD";
    const ADMIN: Address = Address::new([200; 20]);

    fn signing_keys() -> Vec<SigningKey> {
        (1_u8..=4)
            .map(|i| SigningKey::from_bytes(&[i; 32].into()).unwrap())
            .collect()
    }

    fn transmitters() -> Vec<Address> {
        (11_u8..=14).map(|i| Address::from([i; 20])).collect()
    }

    fn feed_config(keys: &[SigningKey]) -> FeedConfig {
        FeedConfig {
            signers: keys
                .iter()
                .map(|k| Address::from_verifying_key(k.verifying_key()))
                .collect(),
            transmitters: transmitters(),
            f: 1,
            onchain_config: vec![],
            offchain_config_version: 1,
            offchain_config: vec![],
            properties: FeedProperties {
                feed_id: FEED_ID.into(),
                link_denom: "link".into(),
                min_answer: dec!(0.01),
                max_answer: dec!(1000000),
                link_per_observation: 10,
                link_per_transmission: 20,
                unique_reports: false,
                description: "btc feed".into(),
                feed_admin: Address::from([99; 20]),
                billing_admin: Address::from([98; 20]),
            },
        }
    }

    async fn setup() -> (cnidarium::TempStorage, StateDelta<cnidarium::Snapshot>, Vec<SigningKey>)
    {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);
        state.put_chain_id("peridot-1");
        state.put_block_height(10).unwrap();
        state.put_block_timestamp(1_700_000_000).unwrap();
        state
            .put_ocr_params(&OcrParams {
                link_denom: "link".into(),
                payout_block_interval: 100,
                module_admin: ADMIN,
            })
            .unwrap();
        let keys = signing_keys();
        CreateFeed {
            sender: ADMIN,
            config: feed_config(&keys),
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();
        (storage, state, keys)
    }

    fn signed_transmit(
        state_digest: [u8; 32],
        keys: &[SigningKey],
        num_signatures: usize,
        observations: Vec<Decimal>,
    ) -> Transmit {
        let report = Report {
            observations_timestamp: 1_699_999_990,
            observers: (0..observations.len() as u8).collect(),
            observations,
        };
        let digest = ReportToSign {
            config_digest: state_digest,
            epoch: 1,
            round: 1,
            extra_hash: vec![],
            report: report.clone(),
        }
        .signing_digest()
        .unwrap();
        let signatures = keys
            .iter()
            .take(num_signatures)
            .map(|k| sign_recoverable(&digest, k).to_vec())
            .collect();
        Transmit {
            sender: transmitters()[0],
            feed_id: FEED_ID.into(),
            config_digest: state_digest,
            epoch: 1,
            round: 1,
            extra_hash: vec![],
            report,
            signatures,
        }
    }

    fn downcast(err: &anyhow::Error) -> Option<&OracleError> {
        err.downcast_ref::<OracleError>()
    }

    #[tokio::test]
    async fn transmit_happy_path_updates_round_state_and_price() {
        let (_storage, mut state, keys) = setup().await;
        let digest = state
            .get_feed_config_info(FEED_ID)
            .await
            .unwrap()
            .unwrap()
            .config_digest;

        let msg = signed_transmit(digest, &keys, 2, vec![dec!(64000), dec!(65000), dec!(66000)]);
        msg.check_and_execute(&mut state).await.unwrap();

        let epoch_and_round = state.get_latest_epoch_and_round(FEED_ID).await.unwrap();
        assert_eq!(epoch_and_round, EpochAndRound { epoch: 1, round: 1 });
        assert_eq!(
            state.get_latest_aggregator_round_id(FEED_ID).await.unwrap(),
            1
        );
        let transmission = state.get_transmission(FEED_ID).await.unwrap().unwrap();
        assert_eq!(transmission.answer, dec!(65000));

        // observation counts of the two signing oracles went from 1 to 2
        assert_eq!(
            state
                .get_observation_count(FEED_ID, &transmitters()[0])
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            state
                .get_observation_count(FEED_ID, &transmitters()[2])
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            state
                .get_transmission_count(FEED_ID, &transmitters()[0])
                .await
                .unwrap(),
            2
        );

        // the accepted median feeds the chainlink adapter
        let price = state
            .get_chainlink_price_state(FEED_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(price.answer, dec!(65000));
    }

    #[tokio::test]
    async fn transmit_rejections_map_to_distinct_errors() {
        let (_storage, mut state, keys) = setup().await;
        let digest = state
            .get_feed_config_info(FEED_ID)
            .await
            .unwrap()
            .unwrap()
            .config_digest;
        let good = signed_transmit(digest, &keys, 2, vec![dec!(64000), dec!(65000), dec!(66000)]);
        good.clone().check_and_execute(&mut state).await.unwrap();

        // replaying the same epoch and round is stale
        let err = good.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Stale(_))));

        // a digest from another configuration is rejected
        let mut mismatched =
            signed_transmit([9; 32], &keys, 2, vec![dec!(64000), dec!(65000), dec!(66000)]);
        mismatched.epoch = 2;
        let err = mismatched.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::DigestMismatch)));

        // an unknown transmitter is rejected
        let mut unauthorized =
            signed_transmit(digest, &keys, 2, vec![dec!(64000), dec!(65000), dec!(66000)]);
        unauthorized.epoch = 2;
        unauthorized.sender = Address::from([77; 20]);
        let err = unauthorized.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Unauthorized(_))));

        // a median outside the configured bounds is rejected
        let mut out_of_bounds =
            signed_transmit(digest, &keys, 2, vec![dec!(0.001), dec!(0.002), dec!(0.003)]);
        out_of_bounds.epoch = 2;
        let err = out_of_bounds.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::OutOfBounds)));
    }

    #[tokio::test]
    async fn transmit_requires_exactly_f_plus_one_signatures() {
        let (_storage, mut state, keys) = setup().await;
        let digest = state
            .get_feed_config_info(FEED_ID)
            .await
            .unwrap()
            .unwrap()
            .config_digest;

        let too_few = signed_transmit(digest, &keys, 1, vec![dec!(1), dec!(2), dec!(3)]);
        let err = too_few.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::QuorumFailure(_))));

        let too_many = signed_transmit(digest, &keys, 3, vec![dec!(1), dec!(2), dec!(3)]);
        let err = too_many.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::QuorumFailure(_))));
    }

    #[tokio::test]
    async fn one_bad_signature_rejects_the_whole_transmission() {
        let (_storage, mut state, keys) = setup().await;
        let digest = state
            .get_feed_config_info(FEED_ID)
            .await
            .unwrap()
            .unwrap()
            .config_digest;

        let mut msg = signed_transmit(digest, &keys, 2, vec![dec!(1), dec!(2), dec!(3)]);
        let outsider = SigningKey::from_bytes(&[99; 32].into()).unwrap();
        let report_digest = ReportToSign {
            config_digest: digest,
            epoch: 1,
            round: 1,
            extra_hash: vec![],
            report: msg.report.clone(),
        }
        .signing_digest()
        .unwrap();
        msg.signatures[1] = sign_recoverable(&report_digest, &outsider).to_vec();

        let err = msg.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::QuorumFailure(_))));

        // the rejection left no trace: counts, round state, and the
        // adapter are untouched
        assert_eq!(
            state
                .get_observation_count(FEED_ID, &transmitters()[0])
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            state.get_latest_epoch_and_round(FEED_ID).await.unwrap(),
            EpochAndRound::default()
        );
        assert!(state
            .get_chainlink_price_state(FEED_ID)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn too_few_observations_fail_quorum() {
        let (_storage, mut state, keys) = setup().await;
        let digest = state
            .get_feed_config_info(FEED_ID)
            .await
            .unwrap()
            .unwrap()
            .config_digest;

        // 2 observations do not exceed 2f = 2
        let msg = signed_transmit(digest, &keys, 2, vec![dec!(1), dec!(2)]);
        let err = msg.check_and_execute(&mut state).await.unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::QuorumFailure(_))));
    }

    #[tokio::test]
    async fn create_feed_is_module_admin_only() {
        let (_storage, mut state, keys) = setup().await;
        let mut config = feed_config(&keys);
        config.properties.feed_id = "ETH/USD".into();
        let err = CreateFeed {
            sender: Address::from([1; 20]),
            config,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn billing_admin_cannot_touch_the_oracle_set() {
        let (_storage, mut state, keys) = setup().await;
        let billing_admin = Address::from([98; 20]);

        let err = UpdateFeed {
            sender: billing_admin,
            feed_id: FEED_ID.into(),
            signers: Some(feed_config(&keys).signers),
            transmitters: Some(transmitters()),
            link_per_observation: None,
            link_per_transmission: None,
            feed_admin: None,
            billing_admin: None,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Unauthorized(_))));

        // billing fields are fine, and bump the config count
        UpdateFeed {
            sender: billing_admin,
            feed_id: FEED_ID.into(),
            signers: None,
            transmitters: None,
            link_per_observation: Some(11),
            link_per_transmission: None,
            feed_admin: None,
            billing_admin: None,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();
        let info = state.get_feed_config_info(FEED_ID).await.unwrap().unwrap();
        assert_eq!(info.config_count, 2);
        let config = state.get_feed_config(FEED_ID).await.unwrap().unwrap();
        assert_eq!(config.properties.link_per_observation, 11);
        // a reconfiguration resets the round state
        assert_eq!(
            state.get_latest_epoch_and_round(FEED_ID).await.unwrap(),
            EpochAndRound::default()
        );
    }

    #[tokio::test]
    async fn fund_and_withdraw_move_balances() {
        let (_storage, mut state, _keys) = setup().await;
        let funder = Address::from([3; 20]);
        state.put_account_balance(&funder, "link", 500).unwrap();

        FundFeedRewardPool {
            sender: funder,
            feed_id: FEED_ID.into(),
            amount: Coin::new("link", 300),
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();
        assert_eq!(state.get_account_balance(&funder, "link").await.unwrap(), 200);
        assert_eq!(
            state.get_reward_pool(FEED_ID).await.unwrap().unwrap().amount,
            300
        );

        let billing_admin = Address::from([98; 20]);
        WithdrawFeedRewardPool {
            sender: billing_admin,
            feed_id: FEED_ID.into(),
            amount: Coin::new("link", 100),
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();
        assert_eq!(
            state
                .get_account_balance(&billing_admin, "link")
                .await
                .unwrap(),
            100
        );
        assert_eq!(
            state.get_reward_pool(FEED_ID).await.unwrap().unwrap().amount,
            200
        );

        // wrong denom is rejected
        let err = FundFeedRewardPool {
            sender: funder,
            feed_id: FEED_ID.into(),
            amount: Coin::new("uatom", 10),
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn payeeship_is_a_two_phase_transfer() {
        let (_storage, mut state, _keys) = setup().await;
        let feed_admin = Address::from([99; 20]);
        let transmitter = transmitters()[0];
        let payee = Address::from([50; 20]);
        let proposed = Address::from([51; 20]);

        // accepting without a proposal fails
        let err = AcceptPayeeship {
            sender: proposed,
            feed_id: FEED_ID.into(),
            transmitter,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Unauthorized(_))));

        SetPayees {
            sender: feed_admin,
            feed_id: FEED_ID.into(),
            transmitters: vec![transmitter],
            payees: vec![payee],
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();

        // payees can only be set while unset
        let err = SetPayees {
            sender: feed_admin,
            feed_id: FEED_ID.into(),
            transmitters: vec![transmitter],
            payees: vec![proposed],
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::InvalidInput(_))));

        // only the current payee may propose
        let err = TransferPayeeship {
            sender: proposed,
            feed_id: FEED_ID.into(),
            transmitter,
            proposed,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(downcast(&err), Some(OracleError::Unauthorized(_))));

        TransferPayeeship {
            sender: payee,
            feed_id: FEED_ID.into(),
            transmitter,
            proposed,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();
        AcceptPayeeship {
            sender: proposed,
            feed_id: FEED_ID.into(),
            transmitter,
        }
        .check_and_execute(&mut state)
        .await
        .unwrap();

        assert_eq!(
            state.get_payee(FEED_ID, &transmitter).await.unwrap(),
            Some(proposed)
        );
        assert_eq!(
            state.get_pending_payee(FEED_ID, &transmitter).await.unwrap(),
            None
        );
    }
}
