//! Domain types for the peridot price-oracle subsystem.
//!
//! This crate carries the pure data model: primitives, the per-source price
//! states, the OCR feed/reporting types, message types with stateless
//! validation, and the secp256k1 recoverable-signature helpers. All state
//! access lives in `peridot-oracle`.

pub mod crypto;
pub mod error;
pub mod ocr;
pub mod oracle;
pub mod primitive;

pub use error::OracleError;
