//! Blocklist service: privacy gating for the capture tick plus CRUD used by
//! the IPC surface.
//!
//! Matching is cheap and cached: entries reload from the store at most once
//! per TTL. App patterns match the bundle id exactly; domain patterns match
//! by suffix, so blocking `example.com` also blocks `sub.example.com`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use trace_domain::types::{BlockKind, BlocklistEntry};
use trace_domain::utils::normalize::{domain_matches, extract_domain};
use trace_domain::{Result, TraceError};
use uuid::Uuid;

use super::ports::BlocklistStore;

const CACHE_TTL: Duration = Duration::from_secs(5);

struct Cache {
    loaded_at: Option<Instant>,
    entries: Vec<BlocklistEntry>,
}

/// Blocklist reads and writes over a [`BlocklistStore`].
pub struct BlocklistService {
    store: std::sync::Arc<dyn BlocklistStore>,
    cache: Mutex<Cache>,
}

impl BlocklistService {
    pub fn new(store: std::sync::Arc<dyn BlocklistStore>) -> Self {
        Self { store, cache: Mutex::new(Cache { loaded_at: None, entries: Vec::new() }) }
    }

    /// Whether capture should be blocked for the given context. Returns the
    /// human-readable reason when blocked.
    pub fn should_block(&self, bundle_id: Option<&str>, url: Option<&str>) -> Option<String> {
        if let Some(bundle_id) = bundle_id {
            if self.is_app_blocked(bundle_id) {
                return Some(format!("app blocked: {bundle_id}"));
            }
        }
        if let Some(url) = url {
            if let Some(domain) = extract_domain(url) {
                if self.is_domain_blocked(&domain) {
                    return Some(format!("domain blocked: {domain}"));
                }
            }
        }
        None
    }

    pub fn is_app_blocked(&self, bundle_id: &str) -> bool {
        self.with_entries(|entries| {
            entries.iter().any(|e| {
                e.enabled && e.block_type == BlockKind::App && e.pattern == bundle_id
            })
        })
    }

    pub fn is_domain_blocked(&self, domain: &str) -> bool {
        self.with_entries(|entries| {
            entries.iter().any(|e| {
                e.enabled
                    && e.block_type == BlockKind::Domain
                    && domain_matches(domain, &e.pattern)
            })
        })
    }

    /// Add an app rule. Repeated adds for the same bundle id are a no-op
    /// beyond refreshing the display name.
    pub fn add_app(&self, bundle_id: &str, display_name: Option<&str>) -> Result<BlocklistEntry> {
        self.add_entry(BlockKind::App, bundle_id, display_name)
    }

    /// Add a domain rule. The pattern is normalized to its bare host form.
    pub fn add_domain(&self, domain: &str, display_name: Option<&str>) -> Result<BlocklistEntry> {
        let normalized = extract_domain(domain)
            .or_else(|| {
                let trimmed = domain.trim().to_lowercase();
                trimmed.contains('.').then_some(trimmed)
            })
            .ok_or_else(|| TraceError::Validation(format!("not a domain: {domain}")))?;
        self.add_entry(BlockKind::Domain, &normalized, display_name)
    }

    pub fn remove(&self, blocklist_id: &str) -> Result<bool> {
        let removed = self.store.remove_entry(blocklist_id)?;
        self.invalidate();
        Ok(removed)
    }

    pub fn set_enabled(&self, blocklist_id: &str, enabled: bool) -> Result<bool> {
        let updated = self.store.set_enabled(blocklist_id, enabled)?;
        self.invalidate();
        Ok(updated)
    }

    pub fn list(&self, include_disabled: bool) -> Result<Vec<BlocklistEntry>> {
        self.store.list_entries(include_disabled)
    }

    fn add_entry(
        &self,
        block_type: BlockKind,
        pattern: &str,
        display_name: Option<&str>,
    ) -> Result<BlocklistEntry> {
        let now = Local::now().naive_local();
        let entry = BlocklistEntry {
            blocklist_id: Uuid::new_v4().to_string(),
            block_type,
            pattern: pattern.to_string(),
            display_name: display_name.map(str::to_string),
            enabled: true,
            block_screenshots: true,
            block_events: true,
            created_ts: now,
            updated_ts: now,
        };
        let stored = self.store.upsert_entry(&entry)?;
        self.invalidate();
        Ok(stored)
    }

    fn with_entries<T>(&self, f: impl FnOnce(&[BlocklistEntry]) -> T) -> T {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let stale = cache.loaded_at.map_or(true, |at| at.elapsed() > CACHE_TTL);
        if stale {
            match self.store.list_entries(false) {
                Ok(entries) => {
                    cache.entries = entries;
                    cache.loaded_at = Some(Instant::now());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "blocklist reload failed, using stale cache");
                }
            }
        }

        f(&cache.entries)
    }

    fn invalidate(&self) {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.loaded_at = None;
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::tests_support::MemoryBlocklist;
    use super::*;

    fn service() -> BlocklistService {
        BlocklistService::new(Arc::new(MemoryBlocklist::default()))
    }

    #[test]
    fn app_blocking_is_exact() {
        let service = service();
        service.add_app("com.1password.1password", Some("1Password")).unwrap();

        assert!(service.is_app_blocked("com.1password.1password"));
        assert!(!service.is_app_blocked("com.1password"));
        assert_eq!(
            service.should_block(Some("com.1password.1password"), None),
            Some("app blocked: com.1password.1password".to_string())
        );
    }

    #[test]
    fn domain_blocking_uses_suffix_rule() {
        let service = service();
        service.add_domain("example.com", None).unwrap();

        assert!(service.is_domain_blocked("example.com"));
        assert!(service.is_domain_blocked("sub.example.com"));
        assert!(!service.is_domain_blocked("notexample.com"));
        assert!(service.should_block(None, Some("https://sub.example.com/page")).is_some());
        assert!(service.should_block(None, Some("https://other.com")).is_none());
    }

    #[test]
    fn add_domain_normalizes_urls() {
        let service = service();
        let entry = service.add_domain("https://www.Bank.example/login", None).unwrap();
        assert_eq!(entry.pattern, "bank.example");
    }

    #[test]
    fn repeated_add_app_is_idempotent() {
        let service = service();
        service.add_app("com.apple.Passwords", None).unwrap();
        service.add_app("com.apple.Passwords", Some("Passwords")).unwrap();

        let entries = service.list(true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name.as_deref(), Some("Passwords"));
    }

    #[test]
    fn disabled_entries_do_not_block() {
        let service = service();
        let entry = service.add_domain("example.com", None).unwrap();
        service.set_enabled(&entry.blocklist_id, false).unwrap();
        assert!(!service.is_domain_blocked("example.com"));
    }
}
