//! OCR messages: feed lifecycle, transmissions, reward-pool funding, and
//! payeeship management.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    crypto::SIGNATURE_LEN,
    error::OracleError,
    ocr::{
        FeedConfig,
        Report,
    },
    primitive::{
        Address,
        Coin,
    },
};

/// Registers a new feed. Module-admin only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFeed {
    pub sender: Address,
    pub config: FeedConfig,
}

impl CreateFeed {
    pub fn validate(&self) -> Result<(), OracleError> {
        self.config.validate()
    }
}

/// Updates an existing feed. The oracle set and feed admin may only be
/// changed by the feed admin; the remaining fields also accept the billing
/// admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFeed {
    pub sender: Address,
    pub feed_id: String,
    pub signers: Option<Vec<Address>>,
    pub transmitters: Option<Vec<Address>>,
    pub link_per_observation: Option<u128>,
    pub link_per_transmission: Option<u128>,
    pub feed_admin: Option<Address>,
    pub billing_admin: Option<Address>,
}

impl UpdateFeed {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        match (&self.signers, &self.transmitters) {
            (Some(signers), Some(transmitters)) if signers.len() == transmitters.len() => {}
            (None, None) => {}
            _ => {
                return Err(OracleError::InvalidInput(
                    "signers and transmitters must be updated together with equal length".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the update touches fields reserved to the feed admin.
    #[must_use]
    pub fn touches_oracle_set(&self) -> bool {
        self.signers.is_some() || self.transmitters.is_some() || self.feed_admin.is_some()
    }
}

/// Submits a signed report for a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmit {
    pub sender: Address,
    pub feed_id: String,
    pub config_digest: [u8; 32],
    pub epoch: u64,
    pub round: u64,
    pub extra_hash: Vec<u8>,
    pub report: Report,
    /// 65-byte recoverable signatures over the report envelope digest.
    pub signatures: Vec<Vec<u8>>,
}

impl Transmit {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.report.observations.is_empty() {
            return Err(OracleError::InvalidInput("empty observations".into()));
        }
        if self.report.observers.len() != self.report.observations.len() {
            return Err(OracleError::InvalidInput(
                "observers and observations must have equal length".into(),
            ));
        }
        if !self
            .report
            .observations
            .windows(2)
            .all(|pair| pair[0] <= pair[1])
        {
            return Err(OracleError::InvalidInput(
                "observations must be sorted ascending".into(),
            ));
        }
        if self.signatures.is_empty() {
            return Err(OracleError::InvalidInput("empty signature set".into()));
        }
        if self.signatures.iter().any(|sig| sig.len() != SIGNATURE_LEN) {
            return Err(OracleError::InvalidInput(format!(
                "signatures must be {SIGNATURE_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Deposits reward funds into a feed's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundFeedRewardPool {
    pub sender: Address,
    pub feed_id: String,
    pub amount: Coin,
}

impl FundFeedRewardPool {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.amount.amount == 0 {
            return Err(OracleError::InvalidInput(
                "fund amount must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Withdraws reward funds from a feed's pool. Billing-admin only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawFeedRewardPool {
    pub sender: Address,
    pub feed_id: String,
    pub amount: Coin,
}

impl WithdrawFeedRewardPool {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.amount.amount == 0 {
            return Err(OracleError::InvalidInput(
                "withdraw amount must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Assigns payees for transmitters that do not have one yet. Feed-admin
/// only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPayees {
    pub sender: Address,
    pub feed_id: String,
    pub transmitters: Vec<Address>,
    pub payees: Vec<Address>,
}

impl SetPayees {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.transmitters.is_empty() || self.transmitters.len() != self.payees.len() {
            return Err(OracleError::InvalidInput(
                "transmitters and payees must be non-empty and of equal length".into(),
            ));
        }
        Ok(())
    }
}

/// Proposes transferring a transmitter's payeeship. Current-payee only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayeeship {
    pub sender: Address,
    pub feed_id: String,
    pub transmitter: Address,
    pub proposed: Address,
}

impl TransferPayeeship {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        if self.sender == self.proposed {
            return Err(OracleError::InvalidInput(
                "cannot transfer payeeship to the current payee".into(),
            ));
        }
        Ok(())
    }
}

/// Accepts a pending payeeship transfer. Pending-payee only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptPayeeship {
    pub sender: Address,
    pub feed_id: String,
    pub transmitter: Address,
}

impl AcceptPayeeship {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.feed_id.is_empty() {
            return Err(OracleError::InvalidInput("empty feed id".into()));
        }
        Ok(())
    }
}
