use std::str::FromStr;
use std::sync::MutexGuard;

use rusqlite::{params, Connection};
use tracing::warn;

use super::database::{from_millis, to_millis, SqliteDatabase};
use crate::outbox::{
    NewOutboxRecord, OutboxId, OutboxRecord, OutboxStatus, OutboxStore, OutboxTransaction,
    StoreResult,
};

/// Outbox table in SQLite.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    db: SqliteDatabase,
}

impl SqliteOutboxStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &SqliteDatabase {
        &self.db
    }
}

type RawRow = (i64, String, String, String, String, i64);

fn into_record(raw: RawRow) -> StoreResult<OutboxRecord> {
    let (id, destination, routing_key, payload, status, created_at) = raw;
    Ok(OutboxRecord {
        id: OutboxId(id),
        destination,
        routing_key,
        payload,
        status: OutboxStatus::from_str(&status)?,
        created_at: from_millis(created_at)?,
    })
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

impl OutboxStore for SqliteOutboxStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn begin(&self) -> StoreResult<SqliteTransaction<'_>> {
        let conn = self.db.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTransaction {
            conn,
            db: &self.db,
            open: true,
        })
    }

    fn load_by_status(&self, status: OutboxStatus) -> StoreResult<Vec<OutboxRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, destination, routing_key, payload, status, created_at
             FROM outbox_records WHERE status = ?1 ORDER BY id",
        )?;
        let raw = stmt
            .query_map(params![status.as_str()], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(into_record).collect()
    }

    fn find(&self, id: OutboxId) -> StoreResult<Option<OutboxRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, destination, routing_key, payload, status, created_at
             FROM outbox_records WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.0], read_row)?;
        match rows.next() {
            Some(raw) => Ok(Some(into_record(raw?)?)),
            None => Ok(None),
        }
    }
}

/// An open `BEGIN IMMEDIATE` transaction.
///
/// Business statements run through [`SqliteTransaction::connection`] commit
/// or roll back together with the outbox rows. Dropping without `commit`
/// rolls back.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    db: &'a SqliteDatabase,
    open: bool,
}

impl SqliteTransaction<'_> {
    /// The connection inside this transaction.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn transition(&mut self, ids: &[OutboxId], to: OutboxStatus) -> StoreResult<usize> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE outbox_records SET status = ?1 WHERE id = ?2 AND status = 'PENDING'",
        )?;
        let mut changed = 0;
        for id in ids {
            changed += stmt.execute(params![to.as_str(), id.0])?;
        }
        Ok(changed)
    }
}

impl OutboxTransaction for SqliteTransaction<'_> {
    fn insert(&mut self, record: NewOutboxRecord) -> StoreResult<OutboxId> {
        let created_at = to_millis(self.db.now());
        self.conn.execute(
            "INSERT INTO outbox_records (destination, routing_key, payload, status, created_at)
             VALUES (?1, ?2, ?3, 'PENDING', ?4)",
            params![record.destination, record.routing_key, record.payload, created_at],
        )?;
        Ok(OutboxId(self.conn.last_insert_rowid()))
    }

    fn mark_sent(&mut self, ids: &[OutboxId]) -> StoreResult<usize> {
        self.transition(ids, OutboxStatus::Sent)
    }

    fn mark_failed(&mut self, ids: &[OutboxId]) -> StoreResult<usize> {
        self.transition(ids, OutboxStatus::Failed)
    }

    fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    fn rollback(mut self) -> StoreResult<()> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "failed to roll back outbox transaction");
            }
        }
    }
}
