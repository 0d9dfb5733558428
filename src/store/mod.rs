//! The per-user relational store (spec §3, §4.3, §6.4).
//!
//! One SQLite database per user. `Store` wraps the connection behind a
//! mutex so every access serializes, matching the coordinator's
//! single-writer actor model (spec §5): callers never interleave reads
//! between each other's writes.

pub mod account;
pub mod calendars;
pub mod canonical;
pub mod constraints;
pub mod journal;
pub mod mirrors;
pub mod policy;
pub mod scheduling;
pub mod schema;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Runs `f` with exclusive access to the connection. All store
    /// operations go through this so the actor's serialization guarantee
    /// extends to storage.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        f(&guard)
    }
}

pub(crate) fn bool_to_sql(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

pub(crate) fn sql_to_bool(v: i64) -> bool {
    v != 0
}
