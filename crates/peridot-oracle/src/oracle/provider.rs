//! Generic provider adapter: named providers with their own relayer sets,
//! each publishing prices for arbitrary symbols. A relayer account may
//! serve at most one provider.

use anyhow::{
    Context as _,
    Result,
};
use async_trait::async_trait;
use cnidarium::{
    StateRead,
    StateWrite,
};
use futures::StreamExt as _;
use peridot_core::{
    oracle::{
        OracleType,
        PriceState,
        ProviderInfo,
        ProviderPriceState,
        ProviderState,
    },
    primitive::Address,
};
use rust_decimal::Decimal;
use tracing::{
    debug,
    instrument,
};

use super::history::StateWriteExt as _;

const INFO_PREFIX: &str = "oracle/provider/info";
const RELAYER_PREFIX: &str = "oracle/provider/relayer";
const PRICE_PREFIX: &str = "oracle/provider/price";

fn info_storage_key(provider: &str) -> String {
    format!("{INFO_PREFIX}/{provider}")
}

fn relayer_storage_key(address: &Address) -> String {
    format!("{RELAYER_PREFIX}/{address}")
}

fn price_storage_key(provider: &str, symbol: &str) -> String {
    format!("{PRICE_PREFIX}/{provider}/{symbol}")
}

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all, fields(provider))]
    async fn get_provider_info(&self, provider: &str) -> Result<Option<ProviderInfo>> {
        let bytes = self
            .get_raw(&info_storage_key(provider))
            .await
            .context("failed reading provider info from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).context("failed to deserialize provider info")
            })
            .transpose()
    }

    /// The provider a relayer account is bound to, if any.
    #[instrument(skip_all)]
    async fn get_provider_of_relayer(&self, address: &Address) -> Result<Option<String>> {
        let bytes = self
            .get_raw(&relayer_storage_key(address))
            .await
            .context("failed reading provider relayer index from state")?;
        bytes
            .map(|bytes| String::from_utf8(bytes).context("invalid provider relayer index bytes"))
            .transpose()
    }

    #[instrument(skip_all, fields(provider, symbol))]
    async fn get_provider_price_state(
        &self,
        provider: &str,
        symbol: &str,
    ) -> Result<Option<ProviderPriceState>> {
        let bytes = self
            .get_raw(&price_storage_key(provider, symbol))
            .await
            .context("failed reading provider price state from state")?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize provider price state")
            })
            .transpose()
    }

    /// The current price of `base` quoted in `quote` under one provider.
    #[instrument(skip_all, fields(provider, base, quote))]
    async fn get_provider_price(
        &self,
        provider: &str,
        base: &str,
        quote: &str,
    ) -> Result<Option<Decimal>> {
        let Some(base_state) = self
            .get_provider_price_state(provider, base)
            .await
            .context("failed to get base provider price state")?
        else {
            return Ok(None);
        };
        if base_state.price_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        if quote == peridot_core::oracle::QUOTE_USD {
            return Ok(Some(base_state.price_state.price));
        }
        let Some(quote_state) = self
            .get_provider_price_state(provider, quote)
            .await
            .context("failed to get quote provider price state")?
        else {
            return Ok(None);
        };
        if quote_state.price_state.price <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(
            base_state.price_state.price / quote_state.price_state.price,
        ))
    }

    #[instrument(skip_all, fields(provider))]
    async fn get_provider_price_states(&self, provider: &str) -> Result<Vec<ProviderPriceState>> {
        let prefix = format!("{PRICE_PREFIX}/{provider}/");
        let mut stream = std::pin::pin!(self.prefix_raw(&prefix));
        let mut states = Vec::new();
        while let Some(item) = stream.next().await {
            let (_, bytes) = item.context("failed reading provider price states from state")?;
            states.push(
                serde_json::from_slice(&bytes)
                    .context("failed to deserialize provider price state")?,
            );
        }
        Ok(states)
    }

    #[instrument(skip_all)]
    async fn get_all_provider_states(&self) -> Result<Vec<ProviderState>> {
        let mut infos = Vec::new();
        {
            let mut stream = std::pin::pin!(self.prefix_raw(INFO_PREFIX));
            while let Some(item) = stream.next().await {
                let (_, bytes) = item.context("failed reading provider infos from state")?;
                let info: ProviderInfo =
                    serde_json::from_slice(&bytes).context("failed to deserialize provider info")?;
                infos.push(info);
            }
        }
        let mut states = Vec::with_capacity(infos.len());
        for provider_info in infos {
            let price_states = self
                .get_provider_price_states(&provider_info.provider)
                .await
                .context("failed to get provider price states")?;
            states.push(ProviderState {
                provider_info,
                price_states,
            });
        }
        Ok(states)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    /// Stores the provider registration and rebuilds its relayer index
    /// entries.
    #[instrument(skip_all, fields(provider = info.provider))]
    fn put_provider_info(&mut self, info: &ProviderInfo) -> Result<()> {
        let bytes = serde_json::to_vec(info).context("failed to serialize provider info")?;
        self.put_raw(info_storage_key(&info.provider), bytes);
        for relayer in &info.relayers {
            self.put_raw(
                relayer_storage_key(relayer),
                info.provider.as_bytes().to_vec(),
            );
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn delete_provider_relayer_index(&mut self, address: &Address) {
        self.delete(relayer_storage_key(address));
    }

    #[instrument(skip_all, fields(provider, symbol = state.symbol))]
    fn put_provider_price_state(
        &mut self,
        provider: &str,
        state: &ProviderPriceState,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(state).context("failed to serialize provider price state")?;
        self.put_raw(price_storage_key(provider, &state.symbol), bytes);
        Ok(())
    }

    /// Applies one relayed provider price. Non-positive prices are
    /// dropped. Returns whether the price was accepted.
    #[instrument(skip_all, fields(provider, symbol))]
    async fn set_provider_price_from_relay(
        &mut self,
        provider: &str,
        symbol: &str,
        price: Decimal,
        block_timestamp: i64,
    ) -> Result<bool> {
        if price <= Decimal::ZERO {
            debug!(provider, symbol, "dropping non-positive provider price");
            return Ok(false);
        }
        let existing = self
            .get_provider_price_state(provider, symbol)
            .await
            .context("failed to get provider price state")?;
        let price_state = match existing {
            Some(existing) => {
                let mut price_state = existing.price_state;
                price_state.update(price, block_timestamp);
                price_state
            }
            None => PriceState::new(price, block_timestamp),
        };
        let state = ProviderPriceState {
            symbol: symbol.to_string(),
            price_state,
        };
        self.put_provider_price_state(provider, &state)
            .context("failed to put provider price state")?;
        // provider series are keyed `provider/symbol` in the ledger
        let series = format!("{provider}/{symbol}");
        self.append_price_record(OracleType::Provider, &series, price, block_timestamp)
            .await
            .context("failed to append provider price record")?;
        Ok(true)
    }
}

impl<T: StateWrite> StateWriteExt for T {}
