//! Genesis snapshot of the OCR side.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
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

/// Per-recipient reward counter of one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCounts {
    pub feed_id: String,
    pub address: Address,
    pub count: u64,
}

/// The stored digest and counters of one feed, exported verbatim so that a
/// restore reproduces them byte-for-byte instead of recomputing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfigInfoRecord {
    pub feed_id: String,
    pub info: FeedConfigInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEpochAndRound {
    pub feed_id: String,
    pub epoch_and_round: EpochAndRound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTransmission {
    pub feed_id: String,
    pub transmission: Transmission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLatestAggregatorRoundId {
    pub feed_id: String,
    pub aggregator_round_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPool {
    pub feed_id: String,
    pub amount: Coin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayeeSet {
    pub feed_id: String,
    pub transmitter: Address,
    pub payee: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayeeTransfer {
    pub feed_id: String,
    pub transmitter: Address,
    pub proposed_payee: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub params: OcrParams,
    pub feed_configs: Vec<FeedConfig>,
    pub feed_config_infos: Vec<FeedConfigInfoRecord>,
    pub latest_epoch_and_rounds: Vec<FeedEpochAndRound>,
    pub transmissions: Vec<FeedTransmission>,
    pub latest_aggregator_round_ids: Vec<FeedLatestAggregatorRoundId>,
    pub reward_pools: Vec<RewardPool>,
    pub observation_counts: Vec<FeedCounts>,
    pub transmission_counts: Vec<FeedCounts>,
    pub payees: Vec<PayeeSet>,
    pub pending_payeeship_transfers: Vec<PendingPayeeTransfer>,
}

impl GenesisState {
    /// A minimal genesis carrying only the module parameters.
    #[must_use]
    pub fn with_params(params: OcrParams) -> Self {
        Self {
            params,
            feed_configs: Vec::new(),
            feed_config_infos: Vec::new(),
            latest_epoch_and_rounds: Vec::new(),
            transmissions: Vec::new(),
            latest_aggregator_round_ids: Vec::new(),
            reward_pools: Vec::new(),
            observation_counts: Vec::new(),
            transmission_counts: Vec::new(),
            payees: Vec::new(),
            pending_payeeship_transfers: Vec::new(),
        }
    }
}
