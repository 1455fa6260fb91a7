//! The application-level genesis document consumed by the components.

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub chain_id: String,
    pub oracle: peridot_core::oracle::GenesisState,
    pub ocr: peridot_core::ocr::GenesisState,
}
