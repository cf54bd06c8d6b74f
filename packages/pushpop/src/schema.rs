//! Table layout and SQL statements.
//!
//! One table holds every message. Two partial indexes keep the hot lookups
//! small: `pushpop_messages_ready` serves the claim scan and
//! `pushpop_messages_pending` serves the lease reclamation sweep.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

pub const TABLE: &str = "pushpop_messages";

/// Advisory lock key serializing schema provisioning across processes.
pub const PROVISION_LOCK_KEY: i64 = 0x7075_7368_706f_70;

pub(crate) const SQL_PROVISION_LOCK: &str = "SELECT pg_advisory_xact_lock($1)";

pub(crate) const SQL_TABLE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = current_schema()
          AND table_name = 'pushpop_messages'
    )
"#;

pub(crate) const SQL_CREATE_MESSAGES: &str = r#"
    CREATE TABLE IF NOT EXISTS pushpop_messages (
        id UUID PRIMARY KEY,
        topic TEXT NOT NULL,
        state SMALLINT NOT NULL,
        state_time TIMESTAMPTZ NOT NULL,
        payload BYTEA NOT NULL
    )
"#;

pub(crate) const SQL_INDEX_MESSAGES_READY: &str = r#"
    CREATE INDEX IF NOT EXISTS pushpop_messages_ready
    ON pushpop_messages (topic, state, state_time)
    WHERE state = 0
"#;

pub(crate) const SQL_INDEX_MESSAGES_PENDING: &str = r#"
    CREATE INDEX IF NOT EXISTS pushpop_messages_pending
    ON pushpop_messages (topic, state, state_time)
    WHERE state = 1
"#;

pub(crate) const SQL_PUSH_MESSAGE: &str = r#"
    INSERT INTO pushpop_messages (id, topic, state, state_time, payload)
    VALUES ($1, $2, 0, NOW() + ($3 || ' milliseconds')::INTERVAL, $4)
    RETURNING id, topic, state, state_time, payload
"#;

pub(crate) const SQL_SELECT_NEXT_READY: &str = r#"
    SELECT id
    FROM pushpop_messages
    WHERE topic = $1
      AND state = 0
      AND state_time <= NOW()
    ORDER BY state_time ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
"#;

pub(crate) const SQL_MARK_PENDING: &str = r#"
    UPDATE pushpop_messages
    SET state = 1,
        state_time = NOW() + ($2 || ' milliseconds')::INTERVAL
    WHERE id = $1
    RETURNING id, topic, state, state_time, payload
"#;

pub(crate) const SQL_FIND_MESSAGE: &str = r#"
    SELECT id, topic, state, state_time, payload
    FROM pushpop_messages
    WHERE id = $1
"#;

/// Compare-and-swap on the (state, state_time) pair observed by the caller.
pub(crate) const SQL_TRANSITION_MESSAGE: &str = r#"
    UPDATE pushpop_messages
    SET state = $2,
        state_time = NOW() + ($3 || ' milliseconds')::INTERVAL
    WHERE id = $1
      AND state = $4
      AND state_time = $5
    RETURNING id, topic, state, state_time, payload
"#;

pub(crate) const SQL_RECLAIM_EXPIRED: &str = r#"
    WITH expired AS (
        SELECT id
        FROM pushpop_messages
        WHERE state = 1
          AND state_time < NOW()
        ORDER BY state_time ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE pushpop_messages
    SET state = 0,
        state_time = NOW()
    WHERE id IN (SELECT id FROM expired)
    RETURNING id, topic, state, state_time, payload
"#;

pub(crate) const SQL_COUNT_BY_STATE: &str = r#"
    SELECT state, COUNT(*)
    FROM pushpop_messages
    WHERE topic = $1
    GROUP BY state
"#;

/// Create the message table and its indexes unless the table already exists.
///
/// `CREATE ... IF NOT EXISTS` is not atomic in Postgres, so provisioning runs
/// under a transaction-scoped advisory lock and re-checks for the table once
/// the lock is held. Concurrent connects wait for the first one and then see
/// the table.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    if table_exists(pool).await? {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    sqlx::query(SQL_PROVISION_LOCK)
        .bind(PROVISION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let exists: bool = sqlx::query_scalar(SQL_TABLE_EXISTS)
        .fetch_one(&mut *tx)
        .await?;
    if exists {
        tx.rollback().await?;
        return Ok(());
    }

    info!(table = TABLE, "creating message table and indexes");
    for statement in [
        SQL_CREATE_MESSAGES,
        SQL_INDEX_MESSAGES_READY,
        SQL_INDEX_MESSAGES_PENDING,
    ] {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(())
}

async fn table_exists(pool: &PgPool) -> Result<bool> {
    Ok(sqlx::query_scalar::<_, bool>(SQL_TABLE_EXISTS)
        .fetch_one(pool)
        .await?)
}
