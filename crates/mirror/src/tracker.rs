//! Single-order trackers for card purchase providers.
//!
//! Unlike the swap ledger these providers only ever have one interesting order per wallet:
//! the most recent one. What is persisted is the last status seen and which order was already
//! reported, so a completion popup is shown at most once per order even across restarts.
//!
//! A terminal order is reported only when the wallet has evidence the user is waiting on it:
//! either a pending status for it was seen earlier, or it was created after the user last
//! opened the provider flow. Old history found on a fresh install stays quiet.

use crate::{
    errors::MirrorError,
    notify::{Completion, CompletionState, NotificationKind, Notifier},
    paths::MirrorPaths,
    providers::{LatestOrderSource, ProviderOrder, RemoteStatus},
};
use chrono::{DateTime, Utc};
use eyre::Context as _;
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::PathBuf,
    sync::{Arc, Mutex},
};

pub const TRACKER_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub last_order_id: Option<String>,
    /// Last non-terminal status observed. Cleared once a completion is reported.
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub last_notified_order_id: Option<String>,
    /// When the user last launched the provider flow.
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    /// Provider order to poll, for providers that look orders up by id.
    #[serde(default)]
    pub watched_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackerOutcome {
    NoOrder,
    /// The fetch failed; nothing was changed and the next check retries.
    FetchFailed,
    Pending { order_id: String, status: String },
    Notified { order_id: String, state: CompletionState },
    /// Terminal, but already reported or never awaited.
    Quiet { order_id: String },
}

struct TrackerLock(File);

impl Drop for TrackerLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.0) {
            tracing::debug!(error = %e, "tracker unlock failed");
        }
    }
}

/// Persisted state for one provider, with the same locking discipline as the offer ledger.
#[derive(Debug, Clone)]
pub struct TrackerStore {
    provider: String,
    path: PathBuf,
    lock_path: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl TrackerStore {
    pub fn open(paths: &MirrorPaths, provider: &str) -> Self {
        Self {
            provider: provider.to_owned(),
            path: paths.tracker_file(provider),
            lock_path: paths.tracker_lock(provider),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn load(&self) -> eyre::Result<TrackerState> {
        let state = crate::fsutil::load_json::<TrackerState>(&self.path, "tracker state")?
            .unwrap_or_default();
        if state.version > TRACKER_VERSION {
            return Err(MirrorError::CorruptRecord(format!(
                "{} tracker version {} is newer than supported",
                self.provider, state.version
            ))
            .into());
        }
        Ok(state)
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut TrackerState) -> eyre::Result<(T, bool)>,
    ) -> eyre::Result<T> {
        let _inproc = self
            .guard
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        let f_lock = crate::fsutil::open_lock_file(&self.lock_path)?;
        f_lock
            .lock_exclusive()
            .with_context(|| format!("lock {} tracker", self.provider))?;
        let _flock = TrackerLock(f_lock);

        let mut state = self.load()?;
        let (out, changed) = f(&mut state)?;
        if changed {
            state.version = TRACKER_VERSION;
            crate::fsutil::save_json(&self.path, &state, "tracker state")?;
        }
        Ok(out)
    }

    /// Record that the user just launched the provider flow, optionally naming the order
    /// to watch.
    pub fn mark_opened(&self, watch: Option<String>) -> eyre::Result<()> {
        self.mutate(|s| {
            s.opened_at = Some(Utc::now());
            if watch.is_some() {
                s.watched_order_id = watch;
            }
            Ok(((), true))
        })?;
        tracing::info!(provider = %self.provider, "provider flow opened");
        Ok(())
    }

    /// Apply one fetched order. `notify` runs only for the caller whose write recorded the
    /// report, after the new state is on disk.
    fn apply(
        &self,
        order: &ProviderOrder,
        status: RemoteStatus,
        notify: impl FnOnce(CompletionState),
    ) -> eyre::Result<TrackerOutcome> {
        let order_id = order.order_id.clone();
        self.mutate(|s| {
            let state = match status {
                RemoteStatus::Pending => {
                    let changed = s.last_order_id.as_deref() != Some(order_id.as_str())
                        || s.last_status.as_deref() != Some(order.status.as_str());
                    s.last_order_id = Some(order_id.clone());
                    s.last_status = Some(order.status.clone());
                    let outcome = TrackerOutcome::Pending {
                        order_id: order_id.clone(),
                        status: order.status.clone(),
                    };
                    return Ok((outcome, changed));
                }
                RemoteStatus::Completed => CompletionState::Completed,
                RemoteStatus::Failed => CompletionState::Failed,
            };

            let already = s.last_notified_order_id.as_deref() == Some(order_id.as_str());
            let awaited = s.last_status.as_deref().is_some_and(|st| !st.is_empty());
            let created_after_open = s
                .opened_at
                .zip(order.created_at)
                .is_some_and(|(opened, created)| created > opened);
            let id_changed = s.last_order_id.as_deref() != Some(order_id.as_str());
            s.last_order_id = Some(order_id.clone());

            if already || !(awaited || created_after_open) {
                return Ok((TrackerOutcome::Quiet { order_id: order_id.clone() }, id_changed));
            }
            s.last_notified_order_id = Some(order_id.clone());
            s.last_status = None;
            s.opened_at = None;
            Ok((
                TrackerOutcome::Notified {
                    order_id: order_id.clone(),
                    state,
                },
                true,
            ))
        })
        .map(|outcome| {
            if let TrackerOutcome::Notified { state, .. } = &outcome {
                notify(*state);
            }
            outcome
        })
    }
}

/// Drives one provider: fetch the latest order, update the stored state, report once.
pub struct SingleOrderTracker {
    store: TrackerStore,
    kind: NotificationKind,
    source: Arc<dyn LatestOrderSource>,
}

impl std::fmt::Debug for SingleOrderTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleOrderTracker")
            .field("provider", &self.source.provider())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SingleOrderTracker {
    pub fn new(
        paths: &MirrorPaths,
        kind: NotificationKind,
        source: Arc<dyn LatestOrderSource>,
    ) -> Self {
        Self {
            store: TrackerStore::open(paths, source.provider()),
            kind,
            source,
        }
    }

    pub const fn store(&self) -> &TrackerStore {
        &self.store
    }

    pub fn mark_opened(&self) -> eyre::Result<()> {
        self.store.mark_opened(None)
    }

    pub async fn check(&self, notifier: &dyn Notifier) -> eyre::Result<TrackerOutcome> {
        let provider = self.source.provider();
        let order = match self.source.latest_order().await {
            Ok(Some(o)) => o,
            Ok(None) => return Ok(TrackerOutcome::NoOrder),
            Err(e) => {
                tracing::warn!(provider, error = %e, "order status fetch failed");
                return Ok(TrackerOutcome::FetchFailed);
            }
        };
        let status = self.source.classify(&order.status);
        tracing::debug!(
            provider,
            order_id = %order.order_id,
            status = %order.status,
            "tracker check"
        );

        let kind = self.kind;
        self.store.apply(&order, status, |state| {
            notifier.notify(kind, &completion_for(provider, &order, state));
        })
    }
}

fn completion_for(provider: &str, order: &ProviderOrder, state: CompletionState) -> Completion {
    Completion {
        key: provider.to_owned(),
        order_id: order.order_id.clone(),
        from: order.from_currency.clone().unwrap_or_default(),
        to: order.to_currency.clone().unwrap_or_default(),
        from_amount: order.from_amount.clone().unwrap_or_default(),
        to_amount: order.to_amount.clone().unwrap_or_default(),
        state,
        reason: order.reason.clone(),
    }
}

/// Forget every provider's tracker state.
pub fn clear_all(paths: &MirrorPaths) -> eyre::Result<()> {
    let dir = paths.trackers_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("read {}", dir.display()))),
    };
    for entry in entries {
        let path = entry.with_context(|| format!("read {}", dir.display()))?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            crate::fsutil::remove_if_exists(&path)?;
        }
    }
    Ok(())
}
