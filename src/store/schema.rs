//! Per-user schema and forward migrations (spec §4.3 "Schema migration",
//! §6.4). The coordinator checks `schema_meta` on first write and applies
//! migrations idempotently; later instantiations see the schema as-is.

use rusqlite::Connection;

use crate::error::Result;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS canonical_events (
    canonical_event_id TEXT PRIMARY KEY,
    origin_account_id TEXT NOT NULL,
    origin_event_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    location TEXT NOT NULL,
    start_ts TEXT NOT NULL,
    end_ts TEXT NOT NULL,
    timezone TEXT NOT NULL,
    all_day INTEGER NOT NULL,
    status TEXT NOT NULL,
    visibility TEXT NOT NULL,
    transparency TEXT NOT NULL,
    recurrence_rule TEXT,
    source TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    constraint_id TEXT,
    UNIQUE (origin_account_id, origin_event_id)
);

CREATE INDEX IF NOT EXISTS idx_canonical_events_window ON canonical_events (start_ts, end_ts);
CREATE INDEX IF NOT EXISTS idx_canonical_events_constraint ON canonical_events (constraint_id);

CREATE TABLE IF NOT EXISTS event_mirrors (
    canonical_event_id TEXT NOT NULL,
    target_account_id TEXT NOT NULL,
    target_calendar_id TEXT NOT NULL,
    provider_event_id TEXT,
    last_projected_hash TEXT NOT NULL,
    last_write_ts TEXT,
    state TEXT NOT NULL,
    error_message TEXT,
    PRIMARY KEY (canonical_event_id, target_account_id)
);

CREATE TABLE IF NOT EXISTS journal (
    journal_id TEXT PRIMARY KEY,
    canonical_event_id TEXT,
    ts TEXT NOT NULL,
    actor TEXT NOT NULL,
    change_type TEXT NOT NULL,
    patch_json TEXT NOT NULL,
    reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_journal_ts ON journal (ts DESC);
CREATE INDEX IF NOT EXISTS idx_journal_canonical ON journal (canonical_event_id);

CREATE TABLE IF NOT EXISTS policies (
    policy_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS policy_edges (
    policy_id TEXT NOT NULL,
    from_account_id TEXT NOT NULL,
    to_account_id TEXT NOT NULL,
    detail_level TEXT NOT NULL,
    calendar_kind TEXT NOT NULL,
    PRIMARY KEY (policy_id, from_account_id, to_account_id)
);

CREATE TABLE IF NOT EXISTS constraints (
    constraint_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    config_json TEXT NOT NULL,
    active_from TEXT,
    active_to TEXT
);

CREATE TABLE IF NOT EXISTS calendars (
    calendar_id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    external_calendar_id TEXT NOT NULL,
    calendar_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scheduling_sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidates (
    session_id TEXT NOT NULL,
    candidate_index INTEGER NOT NULL,
    start_ts TEXT NOT NULL,
    end_ts TEXT NOT NULL,
    score REAL NOT NULL,
    explanation TEXT NOT NULL,
    PRIMARY KEY (session_id, candidate_index)
);

CREATE TABLE IF NOT EXISTS holds (
    hold_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    candidate_index INTEGER NOT NULL,
    state TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_holds_session ON holds (session_id);

-- Declared per spec §1 but their logic is deferred to a later milestone;
-- kept here so storage migrations don't need to revisit this schema twice.
CREATE TABLE IF NOT EXISTS time_accounts (
    account_id TEXT PRIMARY KEY,
    balance_minutes INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationship_edges (
    from_account_id TEXT NOT NULL,
    to_account_id TEXT NOT NULL,
    relationship TEXT NOT NULL,
    PRIMARY KEY (from_account_id, to_account_id)
);

CREATE TABLE IF NOT EXISTS account_state (
    account_id TEXT PRIMARY KEY,
    wrapped_dek_nonce_b64 TEXT NOT NULL,
    wrapped_dek_ciphertext_b64 TEXT NOT NULL,
    sealed_tokens_nonce_b64 TEXT NOT NULL,
    sealed_tokens_ciphertext_b64 TEXT NOT NULL,
    token_expires_at TEXT NOT NULL,
    sync_cursor TEXT,
    last_success_ts TEXT,
    channel_id TEXT,
    resource_id TEXT,
    channel_expires_at TEXT,
    active INTEGER NOT NULL DEFAULT 1
);
";

/// Applies the DDL (idempotent via `CREATE TABLE IF NOT EXISTS`) and stamps
/// `schema_meta` with the current version if absent. Also sets WAL mode for
/// concurrent-reader-friendly single-writer access.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(DDL)?;

    let version: Option<i64> = conn
        .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |row| row.get(0))
        .ok();
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (id, version) VALUES (1, ?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
        }
        Some(v) if v < CURRENT_SCHEMA_VERSION => {
            // No migrations beyond v1 exist yet; future forward migrations
            // go here, gated on the stored version.
            conn.execute("UPDATE schema_meta SET version = ?1 WHERE id = 1", [CURRENT_SCHEMA_VERSION])?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}
