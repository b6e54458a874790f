//! TTL file cache for forecasts with in-flight request deduplication.
//!
//! One JSON file per `(zone, hours)` key under the cache directory:
//!
//! ```json
//! { "fetched_at": "2026-01-01T10:00:00Z", "forecast": [ { "timestamp": "...", "ci": 0.2 } ] }
//! ```
//!
//! Concurrent callers for the same key share a single upstream fetch.
//! Across processes, the fetching caller holds `<cachefile>.lock`, created
//! exclusively and reclaimed once older than [`LOCK_STALE_AFTER`]. Cache
//! files are written to a temp file and renamed into place.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use carbon_core::{Clock, ForecastPoint, SystemClock};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderFuture, SharedProvider};

pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: DateTime<Utc>,
    forecast: Vec<ForecastPoint>,
}

type InflightSlot = Option<ProviderResult<Vec<ForecastPoint>>>;
type InflightMap = Mutex<HashMap<String, watch::Receiver<InflightSlot>>>;

enum Role {
    Leader(watch::Sender<InflightSlot>),
    Follower(watch::Receiver<InflightSlot>),
}

/// Publishes the leader's result and unregisters the key, even if the
/// leader's future is dropped mid-fetch.
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    key: String,
    tx: watch::Sender<InflightSlot>,
}

impl InflightGuard<'_> {
    fn finish(self, result: &ProviderResult<Vec<ForecastPoint>>) {
        self.tx.send_replace(Some(result.clone()));
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
        if self.tx.borrow().is_none() {
            self.tx.send_replace(Some(Err(ProviderError::Cancelled)));
        }
    }
}

/// Removes the lock file when dropped.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "failed to remove cache lock");
        }
    }
}

pub struct CachedProvider {
    next: SharedProvider,
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inflight: InflightMap,
}

impl CachedProvider {
    /// A `ttl` of zero disables the file cache but keeps deduplication.
    pub fn new(next: SharedProvider, dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            next,
            dir: dir.into(),
            ttl,
            clock: Arc::new(SystemClock),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_path(&self, zone: &str, hours: u32) -> PathBuf {
        self.dir
            .join(format!("forecast_{}_{hours}.json", sanitize_cache_token(zone)))
    }

    fn caching_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    async fn forecast(
        &self,
        ctx: &CallContext,
        zone: &str,
        hours: u32,
    ) -> ProviderResult<Vec<ForecastPoint>> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let path = self.cache_path(zone, hours);
        if let Some(points) = self.read_fresh(&path).await {
            debug!(zone, hours, "forecast cache hit");
            return Ok(points);
        }

        let key = format!("{}:{hours}", sanitize_cache_token(zone));
        let tx = match self.join_inflight(&key) {
            Role::Leader(tx) => tx,
            Role::Follower(rx) => {
                debug!(zone, hours, "joining in-flight forecast fetch");
                return await_leader(ctx, rx).await;
            }
        };
        let guard = InflightGuard {
            inflight: &self.inflight,
            key,
            tx,
        };

        debug!(zone, hours, "forecast cache miss");
        let result = self.fetch_as_leader(ctx, zone, hours, &path).await;
        guard.finish(&result);
        result
    }

    fn join_inflight(&self, key: &str) -> Role {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rx) = inflight.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(key.to_string(), rx);
        Role::Leader(tx)
    }

    async fn fetch_as_leader(
        &self,
        ctx: &CallContext,
        zone: &str,
        hours: u32,
        path: &Path,
    ) -> ProviderResult<Vec<ForecastPoint>> {
        let _lock = if self.caching_enabled() {
            let lock = acquire_lock(ctx, &lock_path(path)).await?;
            // Another process may have filled the cache while we waited.
            if let Some(points) = self.read_fresh(path).await {
                debug!(zone, hours, "forecast cache filled while waiting for lock");
                return Ok(points);
            }
            lock
        } else {
            None
        };

        let points = self.next.get_forecast_ci(ctx, zone, hours).await?;
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        if self.caching_enabled() {
            if let Err(err) = self.write(path, &points).await {
                warn!(path = %path.display(), error = %err, "failed to write forecast cache");
            }
        }
        Ok(points)
    }

    async fn read_fresh(&self, path: &Path) -> Option<Vec<ForecastPoint>> {
        if !self.caching_enabled() {
            return None;
        }
        let data = tokio::fs::read(path).await.ok()?;
        let file: CacheFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "ignoring unreadable cache file");
                return None;
            }
        };
        let ttl = TimeDelta::from_std(self.ttl).ok()?;
        (self.clock.now() - file.fetched_at < ttl).then_some(file.forecast)
    }

    async fn write(&self, path: &Path, points: &[ForecastPoint]) -> ProviderResult<()> {
        let payload = CacheFile {
            fetched_at: self.clock.now(),
            forecast: points.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&payload).map_err(|e| ProviderError::Cache(e.to_string()))?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| ProviderError::Cache(e.to_string()))?
    }
}

impl Provider for CachedProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        self.next.get_current_ci(ctx, zone)
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(self.forecast(ctx, zone, hours))
    }
}

async fn await_leader(
    ctx: &CallContext,
    mut rx: watch::Receiver<InflightSlot>,
) -> ProviderResult<Vec<ForecastPoint>> {
    let slot = match ctx.run(rx.wait_for(Option::is_some)).await? {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };
    slot.unwrap_or(Err(ProviderError::Cancelled))
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Take the cross-process lock, waiting for a live holder and reclaiming
/// a stale one. `None` means locking is unavailable and the caller
/// proceeds unlocked.
async fn acquire_lock(ctx: &CallContext, path: &Path) -> ProviderResult<Option<LockFile>> {
    if let Some(dir) = path.parent() {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %err, "cannot create cache directory");
            return Ok(None);
        }
    }

    loop {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        let attempt = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;
        match attempt {
            Ok(mut file) => {
                let stamp = Utc::now().to_rfc3339();
                if let Err(err) = file.write_all(stamp.as_bytes()).await {
                    debug!(path = %path.display(), error = %err, "failed to stamp cache lock");
                }
                return Ok(Some(LockFile {
                    path: path.to_path_buf(),
                }));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(path).await {
                    warn!(path = %path.display(), "reclaiming stale cache lock");
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        debug!(path = %path.display(), error = %err, "stale lock already gone");
                    }
                    continue;
                }
                ctx.sleep(LOCK_POLL_INTERVAL).await?;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot create cache lock, continuing unlocked");
                return Ok(None);
            }
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

fn write_atomic(path: &Path, data: &[u8]) -> ProviderResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(cache_io)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(cache_io)?;
    tmp.write_all(data).map_err(cache_io)?;
    tmp.as_file().sync_all().map_err(cache_io)?;
    tmp.persist(path).map_err(|e| cache_io(e.error))?;
    Ok(())
}

fn cache_io(err: std::io::Error) -> ProviderError {
    ProviderError::Cache(err.to_string())
}

/// Uppercase, keep `[A-Z0-9_-]`, replace anything else with `_`.
pub fn sanitize_cache_token(zone: &str) -> String {
    let token: String = zone
        .trim()
        .to_ascii_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if token.is_empty() {
        "UNKNOWN".to_string()
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample() -> Vec<ForecastPoint> {
        vec![
            ForecastPoint::new(t0(), 0.3),
            ForecastPoint::new(t0() + TimeDelta::hours(1), 0.2),
        ]
    }

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn failing(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Provider for CountingProvider {
        fn get_current_ci<'a>(&'a self, _ctx: &'a CallContext, _zone: &'a str) -> ProviderFuture<'a, f64> {
            Box::pin(async { Ok(0.4) })
        }

        fn get_forecast_ci<'a>(
            &'a self,
            _ctx: &'a CallContext,
            _zone: &'a str,
            _hours: u32,
        ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    Err(ProviderError::HttpStatus {
                        status: 502,
                        body: "bad gateway".into(),
                    })
                } else {
                    Ok(sample())
                }
            })
        }
    }

    async fn fan_out(provider: Arc<CachedProvider>, n: usize) -> Vec<ProviderResult<Vec<ForecastPoint>>> {
        let mut set = JoinSet::new();
        for _ in 0..n {
            let provider = provider.clone();
            set.spawn(async move {
                provider
                    .get_forecast_ci(&CallContext::background(), "DE", 24)
                    .await
            });
        }
        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::from_millis(100));
        let cached = Arc::new(CachedProvider::new(
            inner.clone(),
            dir.path(),
            Duration::from_secs(600),
        ));

        let results = fan_out(cached, 8).await;
        assert_eq!(inner.calls(), 1);
        assert_eq!(results.len(), 8);
        for res in results {
            assert_eq!(res.unwrap(), sample());
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::failing(Duration::from_millis(100));
        let cached = Arc::new(CachedProvider::new(inner.clone(), dir.path(), Duration::ZERO));

        let results = fan_out(cached, 5).await;
        assert_eq!(inner.calls(), 1);
        for res in results {
            assert!(matches!(
                res,
                Err(ProviderError::HttpStatus { status: 502, .. })
            ));
        }
    }

    #[tokio::test]
    async fn zone_spellings_share_one_inflight_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::from_millis(100));
        let cached = Arc::new(CachedProvider::new(inner.clone(), dir.path(), Duration::ZERO));

        let mut set = JoinSet::new();
        for zone in ["DE", "de", " DE "] {
            let cached = cached.clone();
            set.spawn(async move {
                cached
                    .get_forecast_ci(&CallContext::background(), zone, 24)
                    .await
            });
        }
        while let Some(res) = set.join_next().await {
            assert_eq!(res.unwrap().unwrap(), sample());
        }
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_file_is_served_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(first.clone(), dir.path(), Duration::from_secs(600));
        let ctx = CallContext::background();

        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        assert_eq!(first.calls(), 1);

        // A second instance sharing the directory stands in for another process.
        let second = CountingProvider::new(Duration::ZERO);
        let other = CachedProvider::new(second.clone(), dir.path(), Duration::from_secs(600));
        assert_eq!(other.get_forecast_ci(&ctx, "DE", 24).await.unwrap(), sample());
        assert_eq!(second.calls(), 0);

        // Different horizon, different key.
        cached.get_forecast_ci(&ctx, "DE", 48).await.unwrap();
        assert_eq!(first.calls(), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(t0());
        let inner = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(inner.clone(), dir.path(), Duration::from_secs(600))
            .with_clock(Arc::new(clock.clone()));
        let ctx = CallContext::background();

        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        clock.advance(Duration::from_secs(599));
        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        assert_eq!(inner.calls(), 1);

        clock.advance(Duration::from_secs(1));
        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn zero_ttl_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(inner.clone(), dir.path(), Duration::ZERO);
        let ctx = CallContext::background();

        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap();
        assert_eq!(inner.calls(), 2);
        assert!(!cached.cache_path("DE", 24).exists());
    }

    #[tokio::test]
    async fn cache_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedProvider::new(
            CountingProvider::new(Duration::ZERO),
            dir.path(),
            Duration::from_secs(600),
        )
        .with_clock(Arc::new(ManualClock::new(t0())));

        cached
            .get_forecast_ci(&CallContext::background(), "de", 24)
            .await
            .unwrap();

        let path = dir.path().join("forecast_DE_24.json");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["fetched_at"], "2026-01-01T10:00:00Z");
        assert_eq!(json["forecast"].as_array().unwrap().len(), 2);
        assert_eq!(json["forecast"][0]["ci"], 0.3);
        assert!(!lock_path(&path).exists());
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(inner.clone(), dir.path(), Duration::from_secs(600));
        let lock = lock_path(&cached.cache_path("DE", 24));

        let file = std::fs::File::create(&lock).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(180))
            .unwrap();
        drop(file);

        let points = cached
            .get_forecast_ci(&CallContext::background(), "DE", 24)
            .await
            .unwrap();
        assert_eq!(points, sample());
        assert_eq!(inner.calls(), 1);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn held_lock_waits_and_honours_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(inner.clone(), dir.path(), Duration::from_secs(600));
        let lock = lock_path(&cached.cache_path("DE", 24));
        std::fs::write(&lock, "held").unwrap();

        let ctx = CallContext::background().with_timeout(Duration::from_millis(250));
        let err = cached.get_forecast_ci(&ctx, "DE", 24).await.unwrap_err();
        assert_eq!(err, ProviderError::DeadlineExceeded);
        assert_eq!(inner.calls(), 0);
        assert!(lock.exists());
    }

    #[tokio::test]
    async fn waiter_reads_cache_written_by_lock_holder() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingProvider::new(Duration::ZERO);
        let cached = CachedProvider::new(inner.clone(), dir.path(), Duration::from_secs(600));
        let path = cached.cache_path("DE", 24);
        let lock = lock_path(&path);
        std::fs::write(&lock, "held").unwrap();

        let holder = tokio::spawn({
            let path = path.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let payload = CacheFile {
                    fetched_at: Utc::now(),
                    forecast: sample(),
                };
                std::fs::write(&path, serde_json::to_vec(&payload).unwrap()).unwrap();
                std::fs::remove_file(&lock).unwrap();
            }
        });

        let points = cached
            .get_forecast_ci(&CallContext::background(), "DE", 24)
            .await
            .unwrap();
        holder.await.unwrap();
        assert_eq!(points, sample());
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn current_ci_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedProvider::new(
            CountingProvider::new(Duration::ZERO),
            dir.path(),
            Duration::from_secs(600),
        );
        let ci = cached
            .get_current_ci(&CallContext::background(), "DE")
            .await
            .unwrap();
        assert_eq!(ci, 0.4);
    }

    #[test]
    fn cache_tokens_are_sanitized() {
        assert_eq!(sanitize_cache_token(" us-caiso "), "US-CAISO");
        assert_eq!(sanitize_cache_token("DK_DK1"), "DK_DK1");
        assert_eq!(sanitize_cache_token("../etc/passwd"), "___ETC_PASSWD");
        assert_eq!(sanitize_cache_token("   "), "UNKNOWN");
    }
}
