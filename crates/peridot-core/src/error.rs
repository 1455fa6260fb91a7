/// The failure taxonomy shared by every oracle and OCR operation.
///
/// Handlers surface these through `anyhow::Error` so that callers (and
/// tests) can `downcast_ref::<OracleError>()` to branch on the kind. A
/// rejected message produces no state change; the host runtime discards the
/// state delta of any failed call.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Epoch/round pair or timestamp does not advance past the stored one.
    #[error("stale: {0}")]
    Stale(String),

    /// Transmission carries a config digest other than the latest.
    #[error("config digest does not match the latest feed config")]
    DigestMismatch,

    /// Signer, relayer, publisher, provider, or payee is not entitled.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Wrong signature count or too few observations to trust the median.
    #[error("quorum failure: {0}")]
    QuorumFailure(String),

    /// Median falls outside the feed's configured answer bounds.
    #[error("median value out of bounds")]
    OutOfBounds,

    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed address, mismatched batch lengths, non-positive amount.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored record failed to deserialize.
    #[error("corrupt state: {0}")]
    CorruptState(String),
}
