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
use peridot_core::primitive::Address;
use tracing::instrument;

const BALANCE_PREFIX: &str = "accounts/balance";

fn balance_storage_key(address: &Address, denom: &str) -> String {
    format!("{BALANCE_PREFIX}/{address}/{denom}")
}

/// Newtype wrapper to read and write a u128 from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Balance(u128);

#[async_trait]
pub trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_account_balance(&self, address: &Address, denom: &str) -> Result<u128> {
        let Some(bytes) = self
            .get_raw(&balance_storage_key(address, denom))
            .await
            .context("failed reading account balance from state")?
        else {
            return Ok(0);
        };
        let Balance(balance) =
            Balance::try_from_slice(&bytes).context("invalid account balance bytes")?;
        Ok(balance)
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub trait StateWriteExt: StateWrite {
    #[instrument(skip_all)]
    fn put_account_balance(&mut self, address: &Address, denom: &str, balance: u128) -> Result<()> {
        let bytes = borsh::to_vec(&Balance(balance)).context("failed to serialize balance")?;
        self.put_raw(balance_storage_key(address, denom), bytes);
        Ok(())
    }

    #[instrument(skip_all)]
    async fn increase_balance(&mut self, address: &Address, denom: &str, amount: u128) -> Result<()> {
        let balance = self
            .get_account_balance(address, denom)
            .await
            .context("failed to get account balance")?;
        self.put_account_balance(
            address,
            denom,
            balance
                .checked_add(amount)
                .context("account balance overflow")?,
        )
        .context("failed to store updated account balance")?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn decrease_balance(&mut self, address: &Address, denom: &str, amount: u128) -> Result<()> {
        let balance = self
            .get_account_balance(address, denom)
            .await
            .context("failed to get account balance")?;
        let Some(remaining) = balance.checked_sub(amount) else {
            bail!("insufficient funds: balance {balance}, needed {amount}");
        };
        self.put_account_balance(address, denom, remaining)
            .context("failed to store updated account balance")?;
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}

#[cfg(test)]
mod tests {
    use cnidarium::StateDelta;

    use super::*;

    #[tokio::test]
    async fn balance_defaults_to_zero() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let state = StateDelta::new(snapshot);

        let address = Address::from([1; 20]);
        assert_eq!(state.get_account_balance(&address, "link").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increase_and_decrease() {
        let storage = cnidarium::TempStorage::new().await.unwrap();
        let snapshot = storage.latest_snapshot();
        let mut state = StateDelta::new(snapshot);

        let address = Address::from([1; 20]);
        state.increase_balance(&address, "link", 100).await.unwrap();
        state.decrease_balance(&address, "link", 30).await.unwrap();
        assert_eq!(
            state.get_account_balance(&address, "link").await.unwrap(),
            70
        );

        assert!(state.decrease_balance(&address, "link", 71).await.is_err());
    }
}
