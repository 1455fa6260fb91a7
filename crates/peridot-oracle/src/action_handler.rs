use cnidarium::StateWrite;

/// Execution interface of every message the oracle and OCR components
/// accept.
///
/// `check_stateless` runs validation that needs nothing beyond the message
/// itself; `check_and_execute` performs all stateful checks and, only if
/// every one passes, writes the message's effects.
#[async_trait::async_trait]
pub trait ActionHandler {
    async fn check_stateless(&self) -> anyhow::Result<()>;

    async fn check_and_execute<S: StateWrite>(&self, mut state: S) -> anyhow::Result<()>;
}
