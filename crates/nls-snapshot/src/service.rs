//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Snapshot cache shared by the scrape and push paths."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use nls_cls::Snapshot;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::SnapshotError;
use crate::fetcher::SnapshotFetcher;

/// TTL applied when a zero TTL is configured.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
/// Refresh bound applied when a zero timeout is configured.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(20);

type RefreshOutcome = Result<(Arc<Snapshot>, Meta), SnapshotError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Bookkeeping published alongside each snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Meta {
    /// `1.0` when the last refresh succeeded, `0.0` otherwise.
    pub up: f64,
    /// Latency of the last refresh attempt; `0.0` on a cache hit.
    pub duration_seconds: f64,
    /// Collection time of the snapshot being served, or the failure time when
    /// no snapshot exists. `None` until a refresh has settled.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the value came from the cache without a refresh.
    pub cache_hit: bool,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    meta: Meta,
    cached_at: Option<Instant>,
}

struct Inner {
    fetcher: Arc<dyn SnapshotFetcher>,
    ttl: Duration,
    refresh_timeout: Duration,
    state: RwLock<CacheState>,
    in_flight: Mutex<Option<PendingRefresh>>,
}

/// Cheaply cloneable handle to the process-wide snapshot cache.
///
/// A coalesced refresh runs in its own task, bounded only by the refresh
/// timeout. Callers that give up or time out never cancel it, and callers
/// arriving while it runs await the same outcome.
#[derive(Clone)]
pub struct SnapshotService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotService")
            .field("ttl", &self.inner.ttl)
            .field("refresh_timeout", &self.inner.refresh_timeout)
            .field("meta", &self.meta())
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight slot when the refresh task ends, including by panic.
struct ClearInFlight(Arc<Inner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        self.0.in_flight.lock().take();
    }
}

impl SnapshotService {
    /// Build the cache. Zero durations fall back to [`DEFAULT_CACHE_TTL`] and
    /// [`DEFAULT_REFRESH_TIMEOUT`].
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>, ttl: Duration, refresh_timeout: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl };
        let refresh_timeout = if refresh_timeout.is_zero() {
            DEFAULT_REFRESH_TIMEOUT
        } else {
            refresh_timeout
        };
        Self {
            inner: Arc::new(Inner {
                fetcher,
                ttl,
                refresh_timeout,
                state: RwLock::new(CacheState::default()),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Effective cache TTL.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Effective bound on one refresh.
    pub fn refresh_timeout(&self) -> Duration {
        self.inner.refresh_timeout
    }

    /// Serve the cached snapshot while it is younger than the TTL, otherwise
    /// refresh.
    pub async fn get(&self) -> RefreshOutcome {
        {
            let state = self.inner.state.read();
            if let (Some(snapshot), Some(cached_at)) = (&state.snapshot, state.cached_at) {
                if cached_at.elapsed() < self.inner.ttl {
                    let meta = Meta {
                        cache_hit: true,
                        duration_seconds: 0.0,
                        ..state.meta
                    };
                    return Ok((Arc::clone(snapshot), meta));
                }
            }
        }
        self.refresh().await
    }

    /// Fetch a new snapshot, joining the refresh already in flight if any.
    ///
    /// On failure the previous snapshot is returned with `up = 0` and its
    /// original timestamp. An error is returned only when nothing was cached.
    pub async fn refresh(&self) -> RefreshOutcome {
        let pending = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight snapshot refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Current cached snapshot and meta without blocking on a refresh.
    pub fn latest(&self) -> Option<(Arc<Snapshot>, Meta)> {
        let state = self.inner.state.read();
        state
            .snapshot
            .as_ref()
            .map(|snapshot| (Arc::clone(snapshot), state.meta))
    }

    /// Current meta only.
    pub fn meta(&self) -> Meta {
        self.inner.state.read().meta
    }

    fn spawn_refresh(&self) -> PendingRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _clear = ClearInFlight(Arc::clone(&inner));
            inner.run_refresh().await
        });
        async move {
            task.await
                .unwrap_or_else(|err| Err(SnapshotError::Aborted(err.to_string())))
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run_refresh(&self) -> RefreshOutcome {
        let started = Instant::now();
        let fetched =
            match tokio::time::timeout(self.refresh_timeout, self.fetcher.fetch_snapshot()).await {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(err)) => Err(SnapshotError::Fetch(Arc::new(err))),
                Err(_) => Err(SnapshotError::Timeout(self.refresh_timeout)),
            };
        let duration_seconds = started.elapsed().as_secs_f64();

        let mut state = self.state.write();
        match fetched {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let meta = Meta {
                    up: 1.0,
                    duration_seconds,
                    timestamp: Some(snapshot.collected_at),
                    cache_hit: false,
                };
                state.snapshot = Some(Arc::clone(&snapshot));
                state.meta = meta;
                state.cached_at = Some(Instant::now());
                debug!(duration_seconds, "snapshot refreshed");
                Ok((snapshot, meta))
            }
            Err(err) => match state.snapshot.clone() {
                Some(stale) => {
                    let meta = Meta {
                        up: 0.0,
                        duration_seconds,
                        timestamp: Some(stale.collected_at),
                        cache_hit: false,
                    };
                    state.meta = meta;
                    warn!(
                        error = %err,
                        duration_seconds,
                        stale_since = %stale.collected_at,
                        "snapshot refresh failed; serving stale snapshot"
                    );
                    Ok((stale, meta))
                }
                None => {
                    state.meta = Meta {
                        up: 0.0,
                        duration_seconds,
                        timestamp: Some(Utc::now()),
                        cache_hit: false,
                    };
                    error!(error = %err, duration_seconds, "snapshot refresh failed with nothing cached");
                    Err(err)
                }
            },
        }
    }
}
