//! Message handlers of the oracle component.

use anyhow::{
    anyhow,
    Context as _,
    Result,
};
use cnidarium::StateWrite;
use peridot_core::{
    crypto::recover_signer,
    oracle::{
        GrantBandRelayerPrivilege,
        GrantProviderPrivilege,
        GrantStorkPublisherPrivilege,
        ProviderInfo,
        RelayBandRates,
        RelayCoinbaseMessages,
        RelayProviderPrices,
        RelayPythPrices,
        RelayStorkPrices,
        RevokeBandRelayerPrivilege,
        RevokeProviderPrivilege,
        RevokeStorkPublisherPrivilege,
    },
    primitive::Address,
    OracleError,
};
use tracing::instrument;

use super::{
    band::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    coinbase::StateWriteExt as _,
    provider::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    pyth::StateWriteExt as _,
    stork::StateWriteExt as _,
    ParamsStateReadExt as _,
};
use crate::{
    action_handler::ActionHandler,
    state_ext::StateReadExt as _,
};

async fn ensure_oracle_admin<S: StateWrite>(state: &S, sender: &Address) -> Result<()> {
    let params = state
        .get_oracle_params()
        .await
        .context("failed to get oracle params")?;
    if params.admin != *sender {
        return Err(anyhow!(OracleError::Unauthorized(format!(
            "{sender} is not the oracle admin"
        ))));
    }
    Ok(())
}

#[async_trait::async_trait]
impl ActionHandler for RelayBandRates {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        if !state
            .is_band_relayer(&self.sender)
            .await
            .context("failed to check band relayer")?
        {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not an authorized band relayer",
                self.sender
            ))));
        }
        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for (((symbol, rate), resolve_time), request_id) in self
            .symbols
            .iter()
            .zip(&self.rates)
            .zip(&self.resolve_times)
            .zip(&self.request_ids)
        {
            state
                .set_band_price_from_relay(symbol, *rate, *resolve_time, *request_id, block_timestamp)
                .await
                .with_context(|| format!("failed to set band price for `{symbol}`"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RelayCoinbaseMessages {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let params = state
            .get_oracle_params()
            .await
            .context("failed to get oracle params")?;
        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for message in &self.messages {
            let digest = message
                .signing_digest()
                .context("failed to compute coinbase message digest")?;
            let signer = recover_signer(&digest, &message.signature)
                .context("failed to recover coinbase message signer")?;
            if signer != params.coinbase_signer {
                return Err(anyhow!(OracleError::Unauthorized(format!(
                    "coinbase message for `{}` signed by {signer}, expected {}",
                    message.key, params.coinbase_signer
                ))));
            }
            state
                .set_coinbase_price_from_message(
                    &message.key,
                    message.timestamp,
                    message.value,
                    &message.kind,
                    block_timestamp,
                )
                .await
                .with_context(|| format!("failed to set coinbase price for `{}`", message.key))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RelayProviderPrices {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, provider = self.provider))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let Some(info) = state
            .get_provider_info(&self.provider)
            .await
            .context("failed to get provider info")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "provider `{}` is not registered",
                self.provider
            ))));
        };
        if !info.relayers.contains(&self.sender) {
            return Err(anyhow!(OracleError::Unauthorized(format!(
                "{} is not a relayer of provider `{}`",
                self.sender, self.provider
            ))));
        }
        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for (symbol, price) in self.symbols.iter().zip(&self.prices) {
            state
                .set_provider_price_from_relay(&self.provider, symbol, *price, block_timestamp)
                .await
                .with_context(|| format!("failed to set provider price for `{symbol}`"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RelayPythPrices {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for attestation in &self.price_attestations {
            state
                .process_pyth_attestation(attestation, block_timestamp)
                .await
                .context("failed to process pyth attestation")?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RelayStorkPrices {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        let block_timestamp = state
            .get_block_timestamp()
            .await
            .context("failed to get block timestamp")?;
        for pair in &self.asset_pairs {
            state
                .set_stork_price_from_asset_pair(pair, block_timestamp)
                .await
                .with_context(|| format!("failed to set stork price for `{}`", pair.asset_id))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for GrantBandRelayerPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        for relayer in &self.relayers {
            state.put_band_relayer(relayer);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RevokeBandRelayerPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        for relayer in &self.relayers {
            if !state
                .is_band_relayer(relayer)
                .await
                .context("failed to check band relayer")?
            {
                return Err(anyhow!(OracleError::NotFound(format!(
                    "{relayer} is not a band relayer"
                ))));
            }
            state.delete_band_relayer(relayer);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for GrantStorkPublisherPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        use super::stork::StateWriteExt as _;
        for publisher in &self.publishers {
            state.put_stork_publisher(publisher);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RevokeStorkPublisherPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        use super::stork::{
            StateReadExt as _,
            StateWriteExt as _,
        };
        for publisher in &self.publishers {
            if !state
                .is_stork_publisher(publisher)
                .await
                .context("failed to check stork publisher")?
            {
                return Err(anyhow!(OracleError::NotFound(format!(
                    "{publisher} is not a stork publisher"
                ))));
            }
            state.delete_stork_publisher(publisher);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for GrantProviderPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, provider = self.provider))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        // a relayer account serves at most one provider
        for relayer in &self.relayers {
            if let Some(bound) = state
                .get_provider_of_relayer(relayer)
                .await
                .context("failed to get provider of relayer")?
            {
                if bound != self.provider {
                    return Err(anyhow!(OracleError::InvalidInput(format!(
                        "{relayer} is already a relayer of provider `{bound}`"
                    ))));
                }
            }
        }
        let mut info = state
            .get_provider_info(&self.provider)
            .await
            .context("failed to get provider info")?
            .unwrap_or_else(|| ProviderInfo {
                provider: self.provider.clone(),
                relayers: Vec::new(),
            });
        for relayer in &self.relayers {
            if !info.relayers.contains(relayer) {
                info.relayers.push(*relayer);
            }
        }
        state
            .put_provider_info(&info)
            .context("failed to put provider info")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionHandler for RevokeProviderPrivilege {
    async fn check_stateless(&self) -> Result<()> {
        self.validate().map_err(Into::into)
    }

    #[instrument(skip_all, fields(sender = %self.sender, provider = self.provider))]
    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> Result<()> {
        ensure_oracle_admin(&state, &self.sender).await?;
        let Some(mut info) = state
            .get_provider_info(&self.provider)
            .await
            .context("failed to get provider info")?
        else {
            return Err(anyhow!(OracleError::NotFound(format!(
                "provider `{}` is not registered",
                self.provider
            ))));
        };
        for relayer in &self.relayers {
            if !info.relayers.contains(relayer) {
                return Err(anyhow!(OracleError::NotFound(format!(
                    "{relayer} is not a relayer of provider `{}`",
                    self.provider
                ))));
            }
            info.relayers.retain(|r| r != relayer);
            state.delete_provider_relayer_index(relayer);
        }
        state
            .put_provider_info(&info)
            .context("failed to put provider info")?;
        Ok(())
    }
}
