//! The price-oracle and off-chain-reporting state machine, running over a
//! [`cnidarium`] versioned key-value store.
//!
//! The crate is split into three components wired into the host ABCI
//! application: [`accounts`] (module-internal balance ledger),
//! [`oracle`] (the price adapters and the historical ledger), and
//! [`ocr`] (feed configuration, transmissions, and rewards).

pub mod accounts;
mod action_handler;
mod component;
pub mod genesis;
pub mod ocr;
pub mod oracle;
pub mod state_ext;

pub use action_handler::ActionHandler;
pub use component::Component;
