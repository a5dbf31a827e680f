use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::entry::sort_for_replay;
use crate::{
    CompensationEntry, LedgerError, ParticipantId, Result, SequenceNumber, TransactionId,
    store::CompensationLedger,
};

/// Number of times an append is retried when its sequence number collides
/// with a row written outside the advisory lock.
const MAX_APPEND_ATTEMPTS: u32 = 5;

const PRIMARY_KEY_CONSTRAINT: &str = "compensation_entries_pkey";

/// PostgreSQL-backed compensation ledger.
///
/// Survives process restarts, so a rollback or watchdog decision that
/// arrives after a crash still finds the entries to replay.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to the given database URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<CompensationEntry> {
        Ok(CompensationEntry {
            participant_id: ParticipantId::from(row.try_get::<String, _>("participant_id")?),
            transaction_id: TransactionId::from(row.try_get::<String, _>("transaction_id")?),
            sequence: SequenceNumber::new(row.try_get("sequence")?),
            action: row.try_get("action")?,
            target_id: row.try_get("target_id")?,
            payload: row.try_get("payload")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    /// Appends under a transaction-scoped advisory lock on the pair, so
    /// concurrent appends to one ledger take sequence numbers in turn.
    async fn try_append(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
        action: &str,
        target_id: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(participant_id.as_str())
            .bind(transaction_id.as_str())
            .execute(&mut *tx)
            .await?;

        let sequence = sqlx::query_scalar(
            r#"
            INSERT INTO compensation_entries
                (participant_id, transaction_id, sequence, action, target_id, payload, recorded_at)
            SELECT $1, $2, COALESCE(MAX(sequence), 0) + 1, $3, $4, $5, NOW()
            FROM compensation_entries
            WHERE participant_id = $1 AND transaction_id = $2
            RETURNING sequence
            "#,
        )
        .bind(participant_id.as_str())
        .bind(transaction_id.as_str())
        .bind(action)
        .bind(target_id)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sequence)
    }
}

fn is_sequence_collision(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(PRIMARY_KEY_CONSTRAINT))
}

#[async_trait]
impl CompensationLedger for PostgresLedger {
    #[tracing::instrument(skip(self, payload), fields(%participant_id, %transaction_id))]
    async fn append(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
        action: &str,
        target_id: &str,
        payload: serde_json::Value,
    ) -> Result<SequenceNumber> {
        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            match self
                .try_append(participant_id, transaction_id, action, target_id, &payload)
                .await
            {
                Ok(sequence) => {
                    metrics::counter!("compensations_appended_total").increment(1);
                    return Ok(SequenceNumber::new(sequence));
                }
                Err(e) if is_sequence_collision(&e) => {
                    tracing::debug!(attempt, "sequence collision, retrying append");
                }
                Err(e) => return Err(LedgerError::Database(e)),
            }
        }

        Err(LedgerError::SequenceConflict {
            participant_id: participant_id.clone(),
            transaction_id: transaction_id.clone(),
            attempts: MAX_APPEND_ATTEMPTS,
        })
    }

    async fn entries_for(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<Vec<CompensationEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT participant_id, transaction_id, sequence, action, target_id, payload, recorded_at
            FROM compensation_entries
            WHERE participant_id = $1 AND transaction_id = $2
            ORDER BY sequence DESC
            "#,
        )
        .bind(participant_id.as_str())
        .bind(transaction_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .into_iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;
        sort_for_replay(&mut entries);
        Ok(entries)
    }

    async fn remove(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM compensation_entries WHERE participant_id = $1 AND transaction_id = $2",
        )
        .bind(participant_id.as_str())
        .bind(transaction_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM compensation_entries
                WHERE participant_id = $1 AND transaction_id = $2
            )
            "#,
        )
        .bind(participant_id.as_str())
        .bind(transaction_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn open_transactions(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<TransactionId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT transaction_id
            FROM compensation_entries
            WHERE participant_id = $1
            ORDER BY transaction_id
            "#,
        )
        .bind(participant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(TransactionId::from).collect())
    }
}
