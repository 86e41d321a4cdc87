//! `PostgreSQL` implementation of the transport traits.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tally_core::error::PipelineError;
use tally_core::transport::{Delivery, EventPublisher, ReceivedMessage, Subscription};
use tracing::{debug, instrument, warn};

/// Default time a claimed message stays invisible to the rest of its group.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Default pause between claim attempts while a poll is waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default age a message must reach before the committed offset may pass it.
pub const DEFAULT_COMMIT_GRACE: Duration = Duration::from_secs(5);

const PUBLISH_SQL: &str = r"
INSERT INTO transport_messages (topic, partition_key, payload)
VALUES ($1, $2, $3)
RETURNING id
";

// The DO UPDATE guard re-checks the lease against the latest committed claim,
// so two members racing on one message cannot both win it.
const CLAIM_SQL: &str = r"
WITH next AS (
    SELECT m.id, m.payload
    FROM transport_messages m
    LEFT JOIN transport_claims c
        ON c.message_id = m.id AND c.group_id = $2
    WHERE m.topic = $1
      AND m.id > COALESCE(
          (SELECT o.committed FROM transport_group_offsets o
           WHERE o.group_id = $2 AND o.topic = $1),
          0)
      AND (c.message_id IS NULL OR (c.acked_at IS NULL AND c.lease_until < NOW()))
    ORDER BY m.id
    LIMIT 1
    FOR UPDATE OF m SKIP LOCKED
),
claimed AS (
    INSERT INTO transport_claims AS c (group_id, message_id, consumer_id, lease_until)
    SELECT $2, next.id, $3, NOW() + make_interval(secs => $4)
    FROM next
    ON CONFLICT (group_id, message_id) DO UPDATE SET
        consumer_id = EXCLUDED.consumer_id,
        lease_until = EXCLUDED.lease_until,
        deliveries = c.deliveries + 1
    WHERE c.acked_at IS NULL AND c.lease_until < NOW()
    RETURNING c.message_id, c.deliveries
)
SELECT claimed.message_id, claimed.deliveries, next.payload
FROM claimed
JOIN next ON next.id = claimed.message_id
";

const ACK_SQL: &str = r"
UPDATE transport_claims
SET acked_at = NOW()
WHERE group_id = $1 AND message_id = $2 AND consumer_id = $3 AND acked_at IS NULL
";

// Moves the committed offset up to just below the first message that is
// unacknowledged or younger than the grace period. Ids are assigned before
// commit, so a young message may still be preceded by an invisible one.
const COMMIT_SQL: &str = r"
WITH cur AS (
    SELECT COALESCE(
        (SELECT committed FROM transport_group_offsets WHERE group_id = $1 AND topic = $2),
        0) AS committed
),
pending AS (
    SELECT m.id,
           (c.acked_at IS NOT NULL AND m.published_at < NOW() - make_interval(secs => $3)) AS settled
    FROM transport_messages m
    LEFT JOIN transport_claims c
        ON c.message_id = m.id AND c.group_id = $1
    WHERE m.topic = $2 AND m.id > (SELECT committed FROM cur)
),
frontier AS (
    SELECT COALESCE(
        (SELECT MIN(id) - 1 FROM pending WHERE NOT settled),
        (SELECT MAX(id) FROM pending),
        (SELECT committed FROM cur)) AS committed
)
INSERT INTO transport_group_offsets AS o (group_id, topic, committed)
SELECT $1, $2, frontier.committed
FROM frontier, cur
WHERE frontier.committed > cur.committed
ON CONFLICT (group_id, topic) DO UPDATE SET
    committed = GREATEST(o.committed, EXCLUDED.committed),
    updated_at = NOW()
";

const OFFSET_SQL: &str = r"
SELECT COALESCE(
    (SELECT committed FROM transport_group_offsets WHERE group_id = $1 AND topic = $2),
    0)
";

const SCHEMA_CHECK_SQL: &str = r"
SELECT COUNT(*) FROM transport_claims WHERE group_id = $1 AND acked_at IS NULL
";

fn transport_error(context: &str, err: &sqlx::Error) -> PipelineError {
    PipelineError::Transport(format!("{context}: {err}"))
}

/// `PostgreSQL`-backed publisher and subscription factory.
#[derive(Debug, Clone)]
pub struct PgTransport {
    pool: PgPool,
}

impl PgTransport {
    /// Creates a new `PgTransport`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Joins a consumer group. Queries the claim table so that a missing
    /// schema or unreachable database fails here rather than on first poll.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Transport` if the schema check fails.
    #[instrument(skip(self, config), fields(topic = %config.topic, group_id = %config.group_id))]
    pub async fn subscribe(
        &self,
        config: SubscriptionConfig,
    ) -> Result<PgSubscription, PipelineError> {
        let pending: i64 = sqlx::query_scalar(SCHEMA_CHECK_SQL)
            .bind(&config.group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| transport_error("subscription schema check failed", &e))?;
        debug!(pending, consumer_id = %config.consumer_id, "joined consumer group");

        Ok(PgSubscription {
            pool: self.pool.clone(),
            config,
        })
    }
}

#[async_trait]
impl EventPublisher for PgTransport {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, PipelineError> {
        let offset: i64 = sqlx::query_scalar(PUBLISH_SQL)
            .bind(topic)
            .bind(partition_key)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| transport_error("publish failed", &e))?;

        Ok(Delivery {
            topic: topic.to_owned(),
            offset,
        })
    }
}

/// Identity and timing of one consumer-group member.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Topic to consume.
    pub topic: String,
    /// Consumer group shared by cooperating forwarders.
    pub group_id: String,
    /// Identity of this member within the group.
    pub consumer_id: String,
    /// How long a claimed message stays invisible to other members.
    pub lease: Duration,
    /// Pause between claim attempts while waiting for a message.
    pub poll_interval: Duration,
    /// Minimum message age before the committed offset may move past it.
    pub commit_grace: Duration,
}

impl SubscriptionConfig {
    /// Creates a configuration with the default lease, poll interval and
    /// commit grace.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        group_id: impl Into<String>,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            consumer_id: consumer_id.into(),
            lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            commit_grace: DEFAULT_COMMIT_GRACE,
        }
    }
}

/// One member of a consumer group on a [`PgTransport`].
#[derive(Debug)]
pub struct PgSubscription {
    pool: PgPool,
    config: SubscriptionConfig,
}

impl PgSubscription {
    /// Highest offset below which this group has acknowledged everything.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Transport` if the query fails.
    pub async fn committed_offset(&self) -> Result<i64, PipelineError> {
        sqlx::query_scalar(OFFSET_SQL)
            .bind(&self.config.group_id)
            .bind(&self.config.topic)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| transport_error("offset lookup failed", &e))
    }

    async fn commit(&self) -> Result<(), PipelineError> {
        sqlx::query(COMMIT_SQL)
            .bind(&self.config.group_id)
            .bind(&self.config.topic)
            .bind(self.config.commit_grace.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|e| transport_error("offset commit failed", &e))?;
        Ok(())
    }

    async fn try_claim(&self) -> Result<Option<ReceivedMessage>, PipelineError> {
        let row: Option<(i64, i32, Vec<u8>)> = sqlx::query_as(CLAIM_SQL)
            .bind(&self.config.topic)
            .bind(&self.config.group_id)
            .bind(&self.config.consumer_id)
            .bind(self.config.lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| transport_error("claim failed", &e))?;

        Ok(row.map(|(offset, delivery_attempt, payload)| ReceivedMessage {
            topic: self.config.topic.clone(),
            offset,
            delivery_attempt,
            payload,
        }))
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>, PipelineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_claim().await? {
                return Ok(Some(message));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self, message), fields(offset = message.offset))]
    async fn acknowledge(&mut self, message: &ReceivedMessage) -> Result<(), PipelineError> {
        let result = sqlx::query(ACK_SQL)
            .bind(&self.config.group_id)
            .bind(message.offset)
            .bind(&self.config.consumer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| transport_error("acknowledge failed", &e))?;

        if result.rows_affected() == 0 {
            warn!(
                consumer_id = %self.config.consumer_id,
                "claim lapsed before acknowledgment; message may be delivered again"
            );
            return Ok(());
        }
        self.commit().await
    }
}
