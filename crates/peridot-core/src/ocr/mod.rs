//! Off-chain-reporting domain types: feed configuration, report envelopes,
//! and the digests binding signatures to a configured feed.

mod genesis;
mod msgs;

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
pub use genesis::{
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
pub use msgs::{
    AcceptPayeeship,
    CreateFeed,
    FundFeedRewardPool,
    SetPayees,
    TransferPayeeship,
    Transmit,
    UpdateFeed,
    WithdrawFeedRewardPool,
};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest as _,
    Sha256,
};

use crate::{
    error::OracleError,
    primitive::Address,
};

/// Hard cap on the oracle set size of a single feed.
pub const MAX_NUM_ORACLES: usize = 31;

/// Module-wide OCR parameters.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct OcrParams {
    /// Denomination feeds are billed and rewarded in.
    pub link_denom: String,
    /// Reward payouts run when the block height is a multiple of this.
    pub payout_block_interval: u64,
    /// Gates feed creation and parameter updates.
    pub module_admin: Address,
}

/// Per-feed operational properties, mutable after creation subject to the
/// feed-admin/billing-admin split.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct FeedProperties {
    pub feed_id: String,
    /// Must match the module-wide link denom at feed creation.
    pub link_denom: String,
    pub min_answer: Decimal,
    pub max_answer: Decimal,
    pub link_per_observation: u128,
    pub link_per_transmission: u128,
    /// When set, a transmission needs signatures from more than half the
    /// oracle set rather than `f + 1`.
    pub unique_reports: bool,
    pub description: String,
    pub feed_admin: Address,
    pub billing_admin: Address,
}

/// The full configuration of one feed.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct FeedConfig {
    /// Addresses whose signatures count towards quorum. `signers[i]` is
    /// paired with `transmitters[i]`.
    pub signers: Vec<Address>,
    /// Addresses allowed to submit transmissions.
    pub transmitters: Vec<Address>,
    /// Maximum number of faulty oracles tolerated.
    pub f: u32,
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    pub offchain_config: Vec<u8>,
    pub properties: FeedProperties,
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.properties.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.f == 0 {
            return Err(OracleError::InvalidInput("f must be positive".into()));
        }
        let n = self.signers.len();
        if n == 0 || n > MAX_NUM_ORACLES {
            return Err(OracleError::InvalidInput(format!(
                "oracle set size {n} out of range 1..={MAX_NUM_ORACLES}"
            )));
        }
        if self.transmitters.len() != n {
            return Err(OracleError::InvalidInput(
                "signers and transmitters must have equal length".into(),
            ));
        }
        if n <= 3 * self.f as usize {
            return Err(OracleError::InvalidInput(format!(
                "oracle set size {n} too small for f = {}",
                self.f
            )));
        }
        let mut signers = self.signers.clone();
        signers.sort_unstable();
        signers.dedup();
        if signers.len() != n {
            return Err(OracleError::InvalidInput("duplicate signer".into()));
        }
        let mut transmitters = self.transmitters.clone();
        transmitters.sort_unstable();
        transmitters.dedup();
        if transmitters.len() != n {
            return Err(OracleError::InvalidInput("duplicate transmitter".into()));
        }
        if self.properties.min_answer >= self.properties.max_answer {
            return Err(OracleError::InvalidInput(
                "min answer must be below max answer".into(),
            ));
        }
        Ok(())
    }

    /// Number of valid signatures a transmission must carry.
    #[must_use]
    pub fn required_signatures(&self) -> usize {
        if self.properties.unique_reports {
            (self.signers.len() + self.f as usize) / 2 + 1
        } else {
            self.f as usize + 1
        }
    }

    /// The digest binding this configuration to a chain and feed. Changing
    /// any quorum-relevant field changes the digest and invalidates
    /// in-flight reports.
    pub fn digest(&self, chain_id: &str, config_count: u64) -> Result<[u8; 32], OracleError> {
        let body = (
            chain_id,
            &self.properties.feed_id,
            config_count,
            &self.signers,
            &self.transmitters,
            self.f,
            &self.onchain_config,
            self.offchain_config_version,
            &self.offchain_config,
        );
        let bytes = borsh::to_vec(&body)
            .map_err(|e| OracleError::CorruptState(format!("encoding feed config: {e}")))?;
        Ok(Sha256::digest(&bytes).into())
    }
}

/// Digest and counters of the currently active configuration.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct FeedConfigInfo {
    pub config_digest: [u8; 32],
    pub f: u32,
    pub n: u32,
    pub config_count: u64,
    pub latest_config_block_number: u64,
}

/// Epoch and round of the last accepted transmission.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct EpochAndRound {
    pub epoch: u64,
    pub round: u64,
}

/// The observation payload of a transmission.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Report {
    pub observations_timestamp: i64,
    /// `observers[i]` is the oracle-set index that produced
    /// `observations[i]`.
    pub observers: Vec<u8>,
    /// Ascending-sorted observed values.
    pub observations: Vec<Decimal>,
}

impl Report {
    /// The median observation; the element at `n / 2` of the sorted list.
    #[must_use]
    pub fn median(&self) -> Option<Decimal> {
        self.observations.get(self.observations.len() / 2).copied()
    }
}

/// The exact bytes oracle signatures commit to.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, Serialize, Deserialize)]
pub struct ReportToSign {
    pub config_digest: [u8; 32],
    pub epoch: u64,
    pub round: u64,
    pub extra_hash: Vec<u8>,
    pub report: Report,
}

impl ReportToSign {
    pub fn signing_digest(&self) -> Result<[u8; 32], OracleError> {
        let report_bytes = borsh::to_vec(&self.report)
            .map_err(|e| OracleError::InvalidInput(format!("encoding report: {e}")))?;
        let body = (
            self.config_digest,
            self.epoch,
            self.round,
            &self.extra_hash,
            report_bytes,
        );
        let bytes = borsh::to_vec(&body)
            .map_err(|e| OracleError::InvalidInput(format!("encoding report envelope: {e}")))?;
        Ok(Sha256::digest(&bytes).into())
    }
}

/// The accepted answer of a feed.
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Transmission {
    pub answer: Decimal,
    pub observations_timestamp: i64,
    pub transmission_timestamp: i64,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn test_config() -> FeedConfig {
        let signers: Vec<Address> = (1_u8..=4).map(|i| Address::from([i; 20])).collect();
        let transmitters: Vec<Address> = (11_u8..=14).map(|i| Address::from([i; 20])).collect();
        FeedConfig {
            signers,
            transmitters,
            f: 1,
            onchain_config: vec![],
            offchain_config_version: 1,
            offchain_config: vec![],
            properties: FeedProperties {
                feed_id: "BTC/USD".into(),
                link_denom: "link".into(),
                min_answer: dec!(0.01),
                max_answer: dec!(1000000),
                link_per_observation: 10,
                link_per_transmission: 20,
                unique_reports: false,
                description: "BTC/USD feed".into(),
                feed_admin: Address::from([99; 20]),
                billing_admin: Address::from([98; 20]),
            },
        }
    }

    #[test]
    fn config_validation() {
        let config = test_config();
        config.validate().unwrap();

        let mut too_small = config.clone();
        too_small.signers.truncate(3);
        too_small.transmitters.truncate(3);
        assert!(too_small.validate().is_err());

        let mut dup = config.clone();
        dup.signers[1] = dup.signers[0];
        assert!(dup.validate().is_err());
    }

    #[test]
    fn required_signatures_depends_on_unique_reports() {
        let mut config = test_config();
        assert_eq!(config.required_signatures(), 2);
        config.properties.unique_reports = true;
        // (4 + 1) / 2 + 1
        assert_eq!(config.required_signatures(), 3);
    }

    #[test]
    fn digest_changes_with_config_count() {
        let config = test_config();
        let a = config.digest("peridot-1", 1).unwrap();
        let b = config.digest("peridot-1", 2).unwrap();
        let c = config.digest("peridot-2", 1).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn report_median_is_upper_middle() {
        let report = Report {
            observations_timestamp: 100,
            observers: vec![0, 1, 2, 3],
            observations: vec![dec!(1), dec!(2), dec!(3), dec!(4)],
        };
        assert_eq!(report.median(), Some(dec!(3)));
    }
}
