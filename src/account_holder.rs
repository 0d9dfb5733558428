//! Per-account state holder (spec §4.6).
//!
//! Owns encrypted OAuth tokens, the provider sync cursor, and the active
//! notification-channel descriptor for one external account. Consumers
//! never touch token material directly; they call through here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::crypto::{decrypt_tokens, encrypt_tokens, MasterKey, TokenPair};
use crate::error::{Error, Result};
use crate::ids::AccountId;
use crate::store::Store;

/// How far ahead of expiry a token is treated as needing refresh.
const REFRESH_SKEW: chrono::Duration = chrono::Duration::minutes(5);

/// Performs the actual OAuth refresh call against a provider. The HTTP
/// client and OAuth handshake are external collaborators (spec §1); the
/// holder only needs a pluggable seam to call through.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, account_id: &AccountId, refresh_token: &str) -> Result<TokenPair>;
}

/// A refresher that always fails; useful where no OAuth client is wired up
/// (tests, or accounts that are intentionally read-only).
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh(&self, account_id: &AccountId, _refresh_token: &str) -> Result<TokenPair> {
        Err(Error::AuthRevoked(format!("no refresher configured for {account_id}")))
    }
}

#[derive(Clone, Copy)]
pub struct RateLimitConfig {
    pub max_cost: u32,
    pub window: Duration,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_cost: 100,
            window: Duration::from_secs(60),
            burst: 20,
        }
    }
}

struct RateLimitEntry {
    spent: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

/// Per-account provider-API quota gate (spec §4.6 `rateLimit(cost)`,
/// §5 "shared resources"). One call can cost more than one unit of quota,
/// unlike a flat per-request HTTP limiter.
struct QuotaLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<AccountId, RateLimitEntry>>,
}

impl QuotaLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, account_id: &AccountId, cost: u32) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(account_id.clone()).or_insert(RateLimitEntry {
            spent: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.spent = 0;
            entry.window_start = now;
        }

        entry.spent += cost;

        let limit = self.config.max_cost + self.config.burst;
        let remaining = limit.saturating_sub(entry.spent);
        let reset_at = entry.window_start + self.config.window;

        if entry.spent > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.duration_since(now),
            }
        } else if entry.spent > self.config.max_cost {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed { remaining }
        }
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

pub struct AccountHolder {
    store: Store,
    master_key: MasterKey,
    refresher: Arc<dyn TokenRefresher>,
    quota: QuotaLimiter,
}

impl AccountHolder {
    pub fn new(store: Store, master_key: MasterKey, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_rate_limit(store, master_key, refresher, RateLimitConfig::default())
    }

    pub fn with_rate_limit(
        store: Store,
        master_key: MasterKey,
        refresher: Arc<dyn TokenRefresher>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            master_key,
            refresher,
            quota: QuotaLimiter::new(rate_limit),
        }
    }

    /// Seeds or replaces an account's token bundle (onboarding, re-link).
    pub fn link_account(&self, account_id: &AccountId, tokens: TokenPair) -> Result<()> {
        let bundle = encrypt_tokens(&self.master_key, &tokens)?;
        self.store.upsert_account_tokens(account_id, &bundle, &tokens.expires_at)?;
        self.store.set_account_active(account_id, true)?;
        Ok(())
    }

    /// Decrypts the stored tokens, refreshing first if the access token is
    /// expired or within `REFRESH_SKEW` of expiring. Returns only the
    /// short-lived access token; the refresh token never leaves this call.
    pub fn get_access_token(&self, account_id: &AccountId) -> Result<String> {
        let row = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| Error::not_found(format!("no account state for {account_id}")))?;
        if !row.active {
            return Err(Error::AuthRevoked(format!("{account_id} is deactivated")));
        }

        let mut tokens = decrypt_tokens(&self.master_key, &row.bundle)?;
        if Self::needs_refresh(&tokens.expires_at) {
            let refreshed = self.refresher.refresh(account_id, &tokens.refresh_token).map_err(|e| {
                let _ = self.store.set_account_active(account_id, false);
                e
            })?;
            let bundle = encrypt_tokens(&self.master_key, &refreshed)?;
            self.store.upsert_account_tokens(account_id, &bundle, &refreshed.expires_at)?;
            tokens = refreshed;
        }
        Ok(tokens.access_token)
    }

    fn needs_refresh(expires_at: &str) -> bool {
        match DateTime::parse_from_rfc3339(expires_at) {
            Ok(ts) => ts.with_timezone(&Utc) - Utc::now() < REFRESH_SKEW,
            Err(_) => true,
        }
    }

    pub fn get_sync_cursor(&self, account_id: &AccountId) -> Result<Option<String>> {
        Ok(self.store.get_account(account_id)?.and_then(|row| row.sync_cursor))
    }

    pub fn set_sync_cursor(&self, account_id: &AccountId, token: &str, success_ts: &str) -> Result<()> {
        self.store.set_sync_cursor(account_id, token, success_ts)
    }

    pub fn register_channel(
        &self,
        account_id: &AccountId,
        channel_id: &str,
        resource_id: &str,
        expires_at: &str,
    ) -> Result<()> {
        self.store.register_channel(account_id, channel_id, resource_id, expires_at)
    }

    /// Renewal replaces the same channel's expiry; it does not mint a new
    /// channel id, since cron-driven renewal targets an existing channel.
    pub fn renew_channel(&self, account_id: &AccountId, expires_at: &str) -> Result<()> {
        let row = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| Error::not_found(format!("no account state for {account_id}")))?;
        let channel_id = row.channel_id.ok_or_else(|| Error::not_found("no active channel to renew"))?;
        let resource_id = row.resource_id.unwrap_or_default();
        self.store.register_channel(account_id, &channel_id, &resource_id, expires_at)
    }

    pub fn expire_channel(&self, account_id: &AccountId) -> Result<()> {
        self.store.clear_channel(account_id)
    }

    /// Gates an outbound provider call of the given cost against the
    /// account's shared quota (spec §5 "Provider API quota is shared
    /// across an account").
    pub fn rate_limit(&self, account_id: &AccountId, cost: u32) -> RateLimitResult {
        self.quota.check(account_id, cost)
    }

    /// Periodic sweep dropping idle quota entries; call from a background
    /// task alongside channel renewal.
    pub fn cleanup_rate_limit_state(&self) {
        self.quota.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tokens(expires_at: &str) -> TokenPair {
        TokenPair {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_at: expires_at.into(),
        }
    }

    struct StubRefresher;
    impl TokenRefresher for StubRefresher {
        fn refresh(&self, _account_id: &AccountId, _refresh_token: &str) -> Result<TokenPair> {
            Ok(TokenPair {
                access_token: "at-2".into(),
                refresh_token: "rt-1".into(),
                expires_at: "2099-01-01T00:00:00Z".into(),
            })
        }
    }

    fn holder(refresher: Arc<dyn TokenRefresher>) -> AccountHolder {
        AccountHolder::new(Store::open_in_memory().unwrap(), MasterKey::generate(), refresher)
    }

    #[test]
    fn returns_access_token_without_refresh_when_far_from_expiry() {
        let h = holder(Arc::new(NoRefresh));
        let account_id = AccountId::from("acc_1");
        h.link_account(&account_id, sample_tokens("2099-01-01T00:00:00Z")).unwrap();
        assert_eq!(h.get_access_token(&account_id).unwrap(), "at-1");
    }

    #[test]
    fn refreshes_when_expired_and_persists_new_tokens() {
        let h = holder(Arc::new(StubRefresher));
        let account_id = AccountId::from("acc_1");
        h.link_account(&account_id, sample_tokens("2020-01-01T00:00:00Z")).unwrap();
        assert_eq!(h.get_access_token(&account_id).unwrap(), "at-2");
        // second call should not need the refresher again since tokens are now fresh
        assert_eq!(h.get_access_token(&account_id).unwrap(), "at-2");
    }

    #[test]
    fn terminal_refresh_failure_deactivates_account() {
        let h = holder(Arc::new(NoRefresh));
        let account_id = AccountId::from("acc_1");
        h.link_account(&account_id, sample_tokens("2020-01-01T00:00:00Z")).unwrap();
        assert!(matches!(h.get_access_token(&account_id), Err(Error::AuthRevoked(_))));
        assert!(matches!(h.get_access_token(&account_id), Err(Error::AuthRevoked(_))));
    }

    #[test]
    fn channel_lifecycle_register_renew_expire() {
        let h = holder(Arc::new(NoRefresh));
        let account_id = AccountId::from("acc_1");
        h.link_account(&account_id, sample_tokens("2099-01-01T00:00:00Z")).unwrap();
        h.register_channel(&account_id, "chan_1", "res_1", "2026-02-16T00:00:00Z").unwrap();
        h.renew_channel(&account_id, "2026-02-17T00:00:00Z").unwrap();
        h.expire_channel(&account_id).unwrap();
        assert!(matches!(h.renew_channel(&account_id, "2026-02-18T00:00:00Z"), Err(Error::NotFound(_))));
    }

    #[test]
    fn rate_limit_allows_then_bursts_then_exceeds() {
        let account_id = AccountId::from("acc_1");
        let h = AccountHolder::with_rate_limit(
            Store::open_in_memory().unwrap(),
            MasterKey::generate(),
            Arc::new(NoRefresh),
            RateLimitConfig { max_cost: 10, window: Duration::from_secs(60), burst: 5 },
        );
        assert!(matches!(h.rate_limit(&account_id, 10), RateLimitResult::Allowed { .. }));
        assert!(matches!(h.rate_limit(&account_id, 5), RateLimitResult::BurstUsed { .. }));
        assert!(matches!(h.rate_limit(&account_id, 1), RateLimitResult::Exceeded { .. }));
    }
}
