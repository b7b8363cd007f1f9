//! Remote override subsystem.
//!
//! # Responsibilities
//! - Poll DNS TXT records for `name=disabled` pairs on a fixed interval
//! - Keep a TTL cache of forced-healthy check names
//! - Answer the masking lookup done after every raw evaluation
//!
//! Publishing `foo=disabled` in a polled TXT record silences the check named
//! `foo` network-wide without redeploying configuration. The pollers are
//! deliberately resilient: lookup failures are logged and retried forever,
//! never propagated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::broadcast;

use crate::lifecycle::Shutdown;

/// Lifetime of an override entry; a record must be re-observed within this
/// window to keep masking.
pub const OVERRIDE_TTL: Duration = Duration::from_secs(5 * 60);

/// Pause between consecutive lookups of one record.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Bound on a single TXT lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

struct OverrideEntry {
    record: String,
    refreshed_at: Instant,
}

/// TTL cache of remotely disabled check names. Cheap to clone; all clones
/// share the same entries.
#[derive(Clone)]
pub struct OverrideCache {
    entries: Arc<DashMap<String, OverrideEntry>>,
    ttl: Duration,
}

impl OverrideCache {
    pub fn new() -> Self {
        Self::with_ttl(OVERRIDE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Insert or refresh an override for `name`, recording which DNS record
    /// asserted it.
    pub fn insert(&self, name: &str, record: &str) {
        self.entries.insert(
            name.to_owned(),
            OverrideEntry {
                record: record.to_owned(),
                refreshed_at: Instant::now(),
            },
        );
    }

    /// Source record of a live override for `name`, if one exists. Expired
    /// entries are dropped on the way.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.entries
            .remove_if(name, |_, entry| entry.refreshed_at.elapsed() >= self.ttl);
        self.entries.get(name).map(|entry| entry.record.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OverrideCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Ingest the TXT values of one lookup: comma-separated `key=value` entries,
/// where a value of `disabled` (any case) asserts an override for `key`.
fn apply_txt_values<I>(cache: &OverrideCache, record: &str, values: I)
where
    I: IntoIterator<Item = String>,
{
    for value in values {
        for entry in value.split(',') {
            let Some((key, flag)) = entry.split_once('=') else {
                tracing::debug!(record = %record, entry = %entry, "skipping malformed override entry");
                continue;
            };
            if flag.trim().eq_ignore_ascii_case("disabled") {
                tracing::debug!(record = %record, check = %key.trim(), "override asserted");
                cache.insert(key.trim(), record);
            }
        }
    }
}

/// Background poller feeding an [`OverrideCache`] from DNS TXT records.
pub struct OverridePoller {
    cache: OverrideCache,
    resolver: TokioAsyncResolver,
    interval: Duration,
    lookup_timeout: Duration,
}

impl OverridePoller {
    /// Build a poller using the system resolver configuration.
    pub fn from_system_conf(cache: OverrideCache) -> Result<Self, ResolveError> {
        Ok(Self {
            cache,
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
            interval: POLL_INTERVAL,
            lookup_timeout: LOOKUP_TIMEOUT,
        })
    }

    /// Spawn one polling task per record, each running until the shutdown
    /// signal fires.
    pub fn spawn(self, records: Vec<String>, shutdown: &Shutdown) {
        let poller = Arc::new(self);
        for record in records {
            let poller = poller.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move {
                poller.poll_record(record, rx).await;
            });
        }
    }

    async fn poll_record(&self, record: String, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(record = %record, "override poller starting");
        loop {
            self.poll_once(&record).await;

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!(record = %record, "override poller stopped");
    }

    async fn poll_once(&self, record: &str) {
        let lookup = tokio::time::timeout(self.lookup_timeout, self.resolver.txt_lookup(record));
        match lookup.await {
            Err(_) => {
                tracing::warn!(record = %record, "DNS TXT lookup timed out");
            }
            Ok(Err(err)) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    tracing::debug!(record = %record, "no TXT records published");
                }
                _ => {
                    tracing::warn!(record = %record, error = %err, "DNS TXT lookup failed");
                }
            },
            Ok(Ok(lookup)) => {
                let values = lookup.iter().map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|segment| String::from_utf8_lossy(segment))
                        .collect::<String>()
                });
                apply_txt_values(&self.cache, record, values.collect::<Vec<_>>());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_entries_are_inserted() {
        let cache = OverrideCache::new();
        apply_txt_values(
            &cache,
            "healthz.example.com",
            vec!["foo=disabled,bar=enabled,baz = disabled".to_owned()],
        );

        assert_eq!(
            cache.lookup("foo").as_deref(),
            Some("healthz.example.com")
        );
        assert!(cache.lookup("bar").is_none());
        assert_eq!(
            cache.lookup("baz").as_deref(),
            Some("healthz.example.com")
        );
    }

    #[test]
    fn disabled_matches_case_insensitively() {
        let cache = OverrideCache::new();
        apply_txt_values(
            &cache,
            "healthz.example.com",
            vec!["foo=Disabled,bar=DISABLED".to_owned()],
        );
        assert!(cache.lookup("foo").is_some());
        assert!(cache.lookup("bar").is_some());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let cache = OverrideCache::new();
        apply_txt_values(
            &cache,
            "healthz.example.com",
            vec!["just-a-flag,=disabled,foo=disabled".to_owned()],
        );

        // Only the well-formed pair landed; the empty key from "=disabled"
        // is technically valid key=value and harmless.
        assert!(cache.lookup("foo").is_some());
        assert!(cache.lookup("just-a-flag").is_none());
    }

    #[test]
    fn values_spanning_multiple_txt_records_all_apply() {
        let cache = OverrideCache::new();
        apply_txt_values(
            &cache,
            "healthz.example.com",
            vec!["foo=disabled".to_owned(), "bar=disabled".to_owned()],
        );
        assert!(cache.lookup("foo").is_some());
        assert!(cache.lookup("bar").is_some());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = OverrideCache::with_ttl(Duration::from_millis(20));
        cache.insert("foo", "healthz.example.com");
        assert!(cache.lookup("foo").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.lookup("foo").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn refresh_extends_the_ttl() {
        let cache = OverrideCache::with_ttl(Duration::from_millis(60));
        cache.insert("foo", "healthz.example.com");

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert("foo", "healthz.example.com");
        tokio::time::sleep(Duration::from_millis(40)).await;

        // 80ms after the first insert, but only 40ms after the refresh.
        assert!(cache.lookup("foo").is_some());
    }
}
