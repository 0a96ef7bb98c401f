use async_trait::async_trait;

use super::{TopicEntities, Turn};

/// Durable record of completed turns. Writes are best-effort: a failed write
/// is logged by the caller and never fails the turn.
#[async_trait]
pub trait ConversationJournal: Send + Sync {
    async fn record_turn(
        &self,
        session_id: &str,
        turn: &Turn,
        result_count: Option<usize>,
    ) -> anyhow::Result<()>;

    async fn save_context(
        &self,
        session_id: &str,
        entities: &TopicEntities,
        current_topic: Option<&str>,
    ) -> anyhow::Result<()>;
}
