//! Convenience macros for working with the outbox.

/// Enqueue an event in the outbox within a transaction.
///
/// This macro simplifies the common pattern of building an envelope and
/// enqueueing it alongside a business write. It evaluates to the store's
/// `OutboxResult<()>`.
///
/// # Usage
///
/// ```rust,no_run
/// use event_envelope::ExecutionContext;
/// use transactional_outbox::{enqueue_event, SqlxOutboxStore};
/// use serde_json::json;
///
/// # async fn example(store: SqlxOutboxStore) -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = ExecutionContext::new();
/// let mut tx = store.begin().await?;
///
/// // Business write
/// sqlx::query("UPDATE robots SET power_source = 'battery' WHERE id = $1")
///     .bind(123_i64)
///     .execute(&mut *tx)
///     .await?;
///
/// // Event (same transaction)
/// enqueue_event!(
///     &mut tx,
///     &store,
///     &ctx,
///     "demo.robot.123",
///     "PowerSourceChange",
///     json!({ "source": "battery" }),
///     key = 123
/// )?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
///
/// # Arguments
///
/// * `$tx` - Mutable reference to the open transaction
/// * `$store` - Reference to an `OutboxStore` implementation
/// * `$ctx` - Execution context (tenant id, clock)
/// * `$subject` - Hierarchical subject (e.g., "demo.robot.123")
/// * `$action` - Action name (e.g., "updated")
/// * `$payload` - JSON-serializable payload
/// * `key = $key` - Optional partition/correlation key
#[macro_export]
macro_rules! enqueue_event {
    ($tx:expr, $store:expr, $ctx:expr, $subject:expr, $action:expr, $payload:expr) => {{
        use $crate::OutboxStore;

        match $crate::Envelope::from_payload($subject, $action, &$payload) {
            Ok(envelope) => $store.enqueue($tx, $ctx, &envelope).await,
            Err(e) => Err($crate::OutboxError::from(e)),
        }
    }};
    ($tx:expr, $store:expr, $ctx:expr, $subject:expr, $action:expr, $payload:expr, key = $key:expr) => {{
        use $crate::OutboxStore;

        match $crate::Envelope::from_payload($subject, $action, &$payload) {
            Ok(envelope) => {
                let envelope = envelope.with_key($key);
                $store.enqueue($tx, $ctx, &envelope).await
            }
            Err(e) => Err($crate::OutboxError::from(e)),
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::{InMemoryOutboxStore, OutboxResult, PartitionScope, OutboxStore};
    use event_envelope::ExecutionContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_event_macro() -> OutboxResult<()> {
        let store = InMemoryOutboxStore::new();
        let ctx = ExecutionContext::new();
        let mut tx = store.begin();

        enqueue_event!(&mut tx, &store, &ctx, "demo.person.42", "updated", json!({"name": "Ada"}))?;
        enqueue_event!(
            &mut tx,
            &store,
            &ctx,
            "demo.robot.123",
            "PowerSourceChange",
            json!({"source": "battery"}),
            key = 123
        )?;
        tx.commit();

        let records = store.dequeue_batch(&PartitionScope::All, 10).await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].partition_key, None);
        assert_eq!(records[1].partition_key.as_deref(), Some("123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_enqueue_event_macro_rejects_blank_subject() {
        let store = InMemoryOutboxStore::new();
        let ctx = ExecutionContext::new();
        let mut tx = store.begin();

        let result = enqueue_event!(&mut tx, &store, &ctx, "", "updated", json!({}));
        assert!(result.is_err());
        assert_eq!(tx.staged(), 0);
    }
}
