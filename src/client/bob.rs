use super::arena_client::{ArenaClient, CredentialPair};
use super::ClientError;
use bitcoin::ScriptBuf;

/// Registers outputs. Unlinkable to any Alice: all it shows the
/// coordinator is credentials.
pub struct BobClient {
    arena: ArenaClient,
}

impl BobClient {
    pub fn new(arena: ArenaClient) -> Self {
        Self { arena }
    }

    /// Spend `credentials` on an output of `value` to `script`; returns the
    /// change credentials.
    pub async fn register_output(
        &self,
        script: ScriptBuf,
        value: u64,
        credentials: &CredentialPair,
    ) -> Result<CredentialPair, ClientError> {
        let change = self.arena.register_output(script, value, credentials).await?;
        tracing::debug!(
            "Round {}: output of {} sat registered, change {} sat",
            self.arena.round_id(),
            value,
            change.amount_value()
        );
        Ok(change)
    }
}
