//! Per-account state storage: encrypted tokens, sync cursor, notification
//! channel lifecycle (spec §3 "Per-account state", §6.4).
//!
//! Kept in the same per-user database as everything else rather than a
//! separate store, since this implementation runs one actor (and one
//! SQLite file) per user and accounts are sub-entities of that user.

use rusqlite::{params, OptionalExtension, Row};

use crate::crypto::{EncryptedTokenBundle, Sealed};
use crate::error::Result;
use crate::ids::AccountId;

use super::Store;

pub struct AccountRow {
    pub account_id: AccountId,
    pub bundle: EncryptedTokenBundle,
    pub token_expires_at: String,
    pub sync_cursor: Option<String>,
    pub last_success_ts: Option<String>,
    pub channel_id: Option<String>,
    pub resource_id: Option<String>,
    pub channel_expires_at: Option<String>,
    pub active: bool,
}

fn row_to_account(row: &Row) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        account_id: AccountId::from(row.get::<_, String>("account_id")?),
        bundle: EncryptedTokenBundle {
            wrapped_dek: Sealed {
                nonce_b64: row.get("wrapped_dek_nonce_b64")?,
                ciphertext_b64: row.get("wrapped_dek_ciphertext_b64")?,
            },
            sealed_tokens: Sealed {
                nonce_b64: row.get("sealed_tokens_nonce_b64")?,
                ciphertext_b64: row.get("sealed_tokens_ciphertext_b64")?,
            },
        },
        token_expires_at: row.get("token_expires_at")?,
        sync_cursor: row.get("sync_cursor")?,
        last_success_ts: row.get("last_success_ts")?,
        channel_id: row.get("channel_id")?,
        resource_id: row.get("resource_id")?,
        channel_expires_at: row.get("channel_expires_at")?,
        active: super::sql_to_bool(row.get("active")?),
    })
}

const COLUMNS: &str = "account_id, wrapped_dek_nonce_b64, wrapped_dek_ciphertext_b64, \
    sealed_tokens_nonce_b64, sealed_tokens_ciphertext_b64, token_expires_at, sync_cursor, \
    last_success_ts, channel_id, resource_id, channel_expires_at, active";

impl Store {
    pub fn upsert_account_tokens(
        &self,
        account_id: &AccountId,
        bundle: &EncryptedTokenBundle,
        token_expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO account_state (account_id, wrapped_dek_nonce_b64, wrapped_dek_ciphertext_b64, \
                     sealed_tokens_nonce_b64, sealed_tokens_ciphertext_b64, token_expires_at, active) \
                 VALUES (?1,?2,?3,?4,?5,?6,1) \
                 ON CONFLICT(account_id) DO UPDATE SET \
                     wrapped_dek_nonce_b64 = excluded.wrapped_dek_nonce_b64, \
                     wrapped_dek_ciphertext_b64 = excluded.wrapped_dek_ciphertext_b64, \
                     sealed_tokens_nonce_b64 = excluded.sealed_tokens_nonce_b64, \
                     sealed_tokens_ciphertext_b64 = excluded.sealed_tokens_ciphertext_b64, \
                     token_expires_at = excluded.token_expires_at",
                params![
                    account_id.as_str(),
                    bundle.wrapped_dek.nonce_b64,
                    bundle.wrapped_dek.ciphertext_b64,
                    bundle.sealed_tokens.nonce_b64,
                    bundle.sealed_tokens.ciphertext_b64,
                    token_expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM account_state WHERE account_id = ?1"))?;
            Ok(stmt.query_row(params![account_id.as_str()], row_to_account).optional()?)
        })
    }

    pub fn set_account_active(&self, account_id: &AccountId, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE account_state SET active = ?2 WHERE account_id = ?1",
                params![account_id.as_str(), super::bool_to_sql(active)],
            )?;
            Ok(())
        })
    }

    pub fn set_sync_cursor(&self, account_id: &AccountId, token: &str, success_ts: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE account_state SET sync_cursor = ?2, last_success_ts = ?3 WHERE account_id = ?1",
                params![account_id.as_str(), token, success_ts],
            )?;
            Ok(())
        })
    }

    pub fn register_channel(
        &self,
        account_id: &AccountId,
        channel_id: &str,
        resource_id: &str,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE account_state SET channel_id = ?2, resource_id = ?3, channel_expires_at = ?4 WHERE account_id = ?1",
                params![account_id.as_str(), channel_id, resource_id, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn clear_channel(&self, account_id: &AccountId) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE account_state SET channel_id = NULL, resource_id = NULL, channel_expires_at = NULL WHERE account_id = ?1",
                params![account_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Every account currently held, active or not. Consumers and the
    /// reconciliation driver use this to discover what to poll; callers
    /// that only want live accounts filter on `AccountRow::active`.
    pub fn list_account_ids(&self) -> Result<Vec<AccountId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT account_id FROM account_state ORDER BY account_id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(AccountId::from(row?));
            }
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt_tokens, MasterKey, TokenPair};

    #[test]
    fn round_trips_token_bundle_and_cursor() {
        let store = Store::open_in_memory().unwrap();
        let master = MasterKey::generate();
        let account_id = AccountId::from("acc_1");
        let tokens = TokenPair {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: "2026-02-15T10:00:00Z".into(),
        };
        let bundle = encrypt_tokens(&master, &tokens).unwrap();
        store.upsert_account_tokens(&account_id, &bundle, &tokens.expires_at).unwrap();
        store.set_sync_cursor(&account_id, "cursor-1", "2026-02-15T10:05:00Z").unwrap();
        store.register_channel(&account_id, "chan_1", "res_1", "2026-02-16T10:00:00Z").unwrap();

        let row = store.get_account(&account_id).unwrap().unwrap();
        assert_eq!(row.sync_cursor.as_deref(), Some("cursor-1"));
        assert_eq!(row.channel_id.as_deref(), Some("chan_1"));

        store.clear_channel(&account_id).unwrap();
        let row = store.get_account(&account_id).unwrap().unwrap();
        assert!(row.channel_id.is_none());
    }
}
