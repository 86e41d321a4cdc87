//! `PostgreSQL` implementation of the `AggregationStore` trait.
//!
//! Every upsert is one `INSERT … ON CONFLICT DO UPDATE` statement. The row
//! lock `PostgreSQL` takes on conflict serializes concurrent writers to the
//! same key, so increments and list appends are never lost.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use tally_core::aggregation::{
    AggregationDocument, AggregationKey, AggregationStore, UpsertOutcome,
};
use tally_core::error::PipelineError;
use tally_core::event::{EventDetail, Outcome, ResolvedEvent};
use tracing::{debug, instrument};

// The VALUES row is the set-on-insert document with the update already
// applied; on conflict only the increment and the append are merged in.
const UPSERT_SQL: &str = r"
INSERT INTO aggregation_documents AS doc
    (store_id, client_id, bucket_date, count, list_success, list_failure)
VALUES (
    $1, $2, $3, $4,
    CASE WHEN $5 THEN jsonb_build_array($6::jsonb) ELSE '[]'::jsonb END,
    CASE WHEN $5 THEN '[]'::jsonb ELSE jsonb_build_array($6::jsonb) END
)
ON CONFLICT (store_id, client_id, bucket_date) DO UPDATE SET
    count = doc.count + EXCLUDED.count,
    list_success = doc.list_success || EXCLUDED.list_success,
    list_failure = doc.list_failure || EXCLUDED.list_failure,
    updated_at = NOW()
RETURNING (xmax = 0) AS inserted
";

const FIND_SQL: &str = r"
SELECT store_id, client_id, bucket_date, count, list_success, list_failure
FROM aggregation_documents
WHERE store_id = $1 AND client_id = $2 AND bucket_date = $3
";

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    store_id: String,
    client_id: String,
    bucket_date: i64,
    count: i64,
    list_success: Json<Vec<EventDetail>>,
    list_failure: Json<Vec<EventDetail>>,
}

impl From<DocumentRow> for AggregationDocument {
    fn from(row: DocumentRow) -> Self {
        Self {
            store_id: row.store_id,
            client_id: row.client_id,
            bucket_date: row.bucket_date,
            count: row.count,
            list_success: row.list_success.0,
            list_failure: row.list_failure.0,
        }
    }
}

/// `PostgreSQL`-backed aggregation store.
#[derive(Debug, Clone)]
pub struct PgAggregationStore {
    pool: PgPool,
}

impl PgAggregationStore {
    /// Creates a new `PgAggregationStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregationStore for PgAggregationStore {
    #[instrument(
        skip(self, event),
        fields(
            store_id = %event.tracking().store_id,
            client_id = %event.tracking().client_id,
            bucket_date = event.tracking().bucket_date,
            event_id = %event.tracking().event.event_id,
        )
    )]
    async fn upsert(&self, event: &ResolvedEvent) -> Result<UpsertOutcome, PipelineError> {
        let key = event.key();
        let detail = serde_json::to_value(event.detail())
            .map_err(|e| PipelineError::Store(format!("event detail serialization failed: {e}")))?;

        let inserted: bool = sqlx::query_scalar(UPSERT_SQL)
            .bind(&key.store_id)
            .bind(&key.client_id)
            .bind(key.bucket_date)
            .bind(event.count())
            .bind(event.outcome() == Outcome::Success)
            .bind(detail)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("upsert failed: {e}")))?;

        let outcome = if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        };
        debug!(?outcome, "aggregation document upserted");
        Ok(outcome)
    }

    async fn find(
        &self,
        key: &AggregationKey,
    ) -> Result<Option<AggregationDocument>, PipelineError> {
        let row: Option<DocumentRow> = sqlx::query_as(FIND_SQL)
            .bind(&key.store_id)
            .bind(&key.client_id)
            .bind(key.bucket_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("document lookup failed: {e}")))?;

        Ok(row.map(AggregationDocument::from))
    }
}
