//! Reward disbursement: counts accumulated by the transmit pipeline are
//! converted to balances on the payout cadence (and before any feed
//! reconfiguration, so stale counts are never paid at new rates).

use std::collections::BTreeMap;

use anyhow::{
    Context as _,
    Result,
};
use cnidarium::StateWrite;
use peridot_core::primitive::{
    Address,
    Coin,
};
use tendermint::abci::{
    Event,
    EventAttributeIndexExt as _,
};
use tracing::{
    debug,
    instrument,
};

use super::{
    StateReadExt as _,
    StateWriteExt as _,
};
use crate::accounts::StateWriteExt as _;

/// Pays out the accumulated observation and transmission counts of one
/// feed from its reward pool. An absent, empty, or underfunded pool is a
/// silent skip; the counts stay and are retried on the next payout.
///
/// Transmission rewards go to the transmitter's payee when one is set,
/// otherwise to the transmitter itself. After a successful payout every
/// counter is reset to one, keyed by the reward recipient.
#[instrument(skip_all, fields(feed_id))]
pub async fn disburse_rewards<S: StateWrite>(state: &mut S, feed_id: &str) -> Result<()> {
    let Some(config) = state
        .get_feed_config(feed_id)
        .await
        .context("failed to get feed config")?
    else {
        return Ok(());
    };
    let Some(pool) = state
        .get_reward_pool(feed_id)
        .await
        .context("failed to get reward pool")?
    else {
        return Ok(());
    };
    if pool.amount == 0 {
        return Ok(());
    }

    let observation_counts = state
        .get_feed_observation_counts(feed_id)
        .await
        .context("failed to get observation counts")?;
    let transmission_counts = state
        .get_feed_transmission_counts(feed_id)
        .await
        .context("failed to get transmission counts")?;

    let mut rewards: BTreeMap<Address, u128> = BTreeMap::new();
    let mut observation_recipients = Vec::with_capacity(observation_counts.len());
    for (observer, count) in &observation_counts {
        let amount = u128::from(*count)
            .checked_mul(config.properties.link_per_observation)
            .context("observation reward overflow")?;
        *rewards.entry(*observer).or_default() += amount;
        observation_recipients.push(*observer);
    }
    let mut transmission_recipients = Vec::with_capacity(transmission_counts.len());
    for (transmitter, count) in &transmission_counts {
        let amount = u128::from(*count)
            .checked_mul(config.properties.link_per_transmission)
            .context("transmission reward overflow")?;
        let recipient = state
            .get_payee(feed_id, transmitter)
            .await
            .context("failed to get payee")?
            .unwrap_or(*transmitter);
        *rewards.entry(recipient).or_default() += amount;
        transmission_recipients.push(recipient);
    }

    let total: u128 = rewards.values().sum();
    if total == 0 {
        return Ok(());
    }
    if total > pool.amount {
        debug!(
            feed_id,
            total,
            pool = pool.amount,
            "reward pool underfunded, skipping payout",
        );
        return Ok(());
    }

    for (recipient, amount) in &rewards {
        state
            .increase_balance(recipient, &pool.denom, *amount)
            .await
            .context("failed to credit reward recipient")?;
    }
    state
        .put_reward_pool(
            feed_id,
            &Coin::new(pool.denom.clone(), pool.amount - total),
        )
        .context("failed to put reward pool")?;

    state
        .delete_feed_counts(feed_id)
        .await
        .context("failed to delete feed counts")?;
    for observer in observation_recipients {
        state
            .put_observation_count(feed_id, &observer, 1)
            .context("failed to reset observation count")?;
    }
    for recipient in transmission_recipients {
        state
            .put_transmission_count(feed_id, &recipient, 1)
            .context("failed to reset transmission count")?;
    }
    state.record(Event::new(
        "reward_payout",
        [
            ("feed_id", feed_id.to_string()).index(),
            ("amount", total.to_string()).index(),
            ("denom", pool.denom).index(),
        ],
    ));
    Ok(())
}
