//! Module-internal balance ledger, used for reward-pool funding,
//! withdrawals, and reward disbursement.

mod state_ext;

pub use state_ext::{
    StateReadExt,
    StateWriteExt,
};
