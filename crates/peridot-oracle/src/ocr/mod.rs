//! The off-chain-reporting component: feed configuration, the transmit
//! pipeline, reward accounting, and payeeship management.

pub mod action;
mod component;
pub mod genesis;
pub mod rewards;
mod state_ext;

pub use component::OcrComponent;
pub use state_ext::{
    StateReadExt,
    StateWriteExt,
};
