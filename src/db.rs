use crate::error::Result;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Append-only record of (taxi, plate) pairs that have been reported.
///
/// The table layout matches ledgers written by earlier deployments, so an
/// existing `processed_cars.db` is picked up as is.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: impl AsRef<Path>) -> Result<Ledger> {
        let path = path.as_ref();
        info!("Opening ledger at {}", path.display());
        Ledger::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Ledger> {
        Ledger::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Ledger> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_cars (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                taxi TEXT,
                carnum TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS processed_cars_pair ON processed_cars(taxi, carnum)",
            [],
        )?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn exists(&self, plate: &str, taxi: &str) -> Result<bool> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_cars WHERE carnum = ?1 AND taxi = ?2 LIMIT 1",
                params![plate, taxi],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Records the pair; a pair that is already present is left alone.
    /// Outside tests the watcher goes through `claim`, which needs the
    /// outcome.
    #[cfg(test)]
    pub fn record(&self, taxi: &str, plate: &str) -> Result<()> {
        self.claim(taxi, plate).map(|_| ())
    }

    /// `exists` and `record` in one immediate transaction; this is how the
    /// dispatch path writes the ledger. Returns `true` only for the caller
    /// whose insert created the row, across threads and across connections
    /// to the same file. Repeated calls leave a single row.
    pub fn claim(&self, taxi: &str, plate: &str) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO processed_cars (taxi, carnum)
             SELECT ?1, ?2
             WHERE NOT EXISTS (SELECT 1 FROM processed_cars WHERE taxi = ?1 AND carnum = ?2)",
            params![taxi, plate],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    #[cfg(test)]
    pub fn count(&self, taxi: &str, plate: &str) -> Result<u64> {
        let conn = self.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM processed_cars WHERE taxi = ?1 AND carnum = ?2",
            params![taxi, plate],
            |row| row.get(0),
        )?)
    }
}
