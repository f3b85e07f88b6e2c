//! Per-message correlation context
//!
//! Intake builds one [`IngestContext`] per message and passes it down explicitly, so
//! every log line of a message can be tied back to its batch and queue message id.

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContext {
    pub batch_id: Uuid,
    /// Queue message id, or a generated id when the queue did not provide one.
    pub correlation_id: String,
    /// Position of the message inside its batch.
    pub position: usize,
}

impl IngestContext {
    pub fn new(batch_id: Uuid, message_id: Option<&str>, position: usize) -> Self {
        let correlation_id = message_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}", batch_id, position));

        Self {
            batch_id,
            correlation_id,
            position,
        }
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "ingest_message",
            batch_id = %self.batch_id,
            correlation_id = %self.correlation_id,
            position = self.position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_is_correlation_id() {
        let ctx = IngestContext::new(Uuid::nil(), Some("msg-1"), 3);
        assert_eq!(ctx.correlation_id, "msg-1");
        assert_eq!(ctx.position, 3);
    }

    #[test]
    fn test_missing_message_id_is_generated_from_position() {
        let batch_id = Uuid::new_v4();
        let ctx = IngestContext::new(batch_id, Some("  "), 2);
        assert_eq!(ctx.correlation_id, format!("{}-2", batch_id));
        assert_ne!(ctx.correlation_id, IngestContext::new(batch_id, None, 3).correlation_id);
    }
}
