//! Persisted list of outstanding swap orders, one live entry per trading pair.
//!
//! Every operation is a read-modify-write of the whole list. Writers are serialized twice: an
//! in-process mutex for clones of one `OfferLedger`, and an `fs2` lock file for everything else
//! (other processes, or independently opened ledgers).

use crate::{errors::MirrorError, paths::MirrorPaths, providers::SwitchainOrder};
use eyre::Context as _;
use fs2::FileExt as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    path::PathBuf,
    str::FromStr as _,
    sync::{Arc, Mutex},
};

pub const LEDGER_VERSION: u32 = 1;

/// Quote currency every pair is traded against.
pub const BASE_DENOM: &str = "UST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    Progress,
    Completed,
    Failed,
    Done,
}

impl Progress {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Progress)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub pair_key: String,
    pub order: SwitchainOrder,
    pub progress: Progress,
}

/// `"{DENOM}-UST"` for purchases, `"UST-{DENOM}"` for withdrawals.
pub fn pair_key(denom: &str, withdraw: bool) -> String {
    if withdraw {
        format!("{BASE_DENOM}-{denom}")
    } else {
        format!("{denom}-{BASE_DENOM}")
    }
}

/// `("BTC", "UST")` for `"BTC-UST"`. A key without a separator is all `from`.
pub fn split_pair(key: &str) -> (&str, &str) {
    key.split_once('-').unwrap_or((key, ""))
}

/// What the UI lists for an entry: pending rows and completion popups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferView {
    pub key: String,
    pub from: String,
    pub to: String,
    pub from_amount: String,
    pub to_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Progress>,
}

impl OfferView {
    fn of(offer: &Offer) -> Self {
        let (from, to) = split_pair(&offer.pair_key);
        Self {
            key: offer.pair_key.clone(),
            from: from.to_owned(),
            to: to.to_owned(),
            from_amount: offer.order.from_amount.clone(),
            to_amount: offer.order.rate.clone(),
            state: offer.progress.is_terminal().then_some(offer.progress),
        }
    }

    /// Expected receive amount after shaving `slippage_percent`. `None` if the quoted amount
    /// does not parse.
    pub fn to_amount_after_slippage(&self, slippage_percent: Decimal) -> Option<Decimal> {
        let quoted = Decimal::from_str(self.to_amount.trim()).ok()?;
        let keep = Decimal::ONE_HUNDRED.checked_sub(slippage_percent)?;
        quoted
            .checked_mul(keep)?
            .checked_div(Decimal::ONE_HUNDRED)
            .map(|d| d.normalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEnvelope {
    version: u32,
    offers: Vec<Offer>,
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyEntry {
    order: SwitchainOrder,
    progress: Progress,
}

/// On-disk shapes: the versioned envelope, or the unversioned list of single-key maps
/// (`[{"BTC-UST": {order, progress}}]`, possibly with `null` holes) older app versions stored.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerFile {
    Envelope(LedgerEnvelope),
    Legacy(Vec<Option<BTreeMap<String, LegacyEntry>>>),
}

impl LedgerFile {
    fn into_offers(self) -> Result<Vec<Offer>, MirrorError> {
        match self {
            Self::Envelope(env) if env.version <= LEDGER_VERSION => Ok(env.offers),
            Self::Envelope(env) => Err(MirrorError::CorruptRecord(format!(
                "offer ledger version {} is newer than supported",
                env.version
            ))),
            Self::Legacy(list) => Ok(list
                .into_iter()
                .flatten()
                .flat_map(BTreeMap::into_iter)
                .map(|(pair_key, e)| Offer {
                    pair_key,
                    order: e.order,
                    progress: e.progress,
                })
                .collect()),
        }
    }
}

struct LedgerLock(File);

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.0) {
            tracing::debug!(error = %e, "ledger unlock failed");
        }
    }
}

#[derive(Debug, Clone)]
pub struct OfferLedger {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl OfferLedger {
    pub fn open(paths: &MirrorPaths) -> Self {
        Self {
            path: paths.offers_file(),
            lock_path: paths.offers_lock(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    fn read(&self) -> eyre::Result<Vec<Offer>> {
        let Some(file) = crate::fsutil::load_json::<LedgerFile>(&self.path, "offer ledger")? else {
            return Ok(vec![]);
        };
        Ok(file.into_offers()?)
    }

    fn write(&self, offers: Vec<Offer>) -> eyre::Result<()> {
        let env = LedgerEnvelope {
            version: LEDGER_VERSION,
            offers,
        };
        crate::fsutil::save_json(&self.path, &env, "offer ledger")
    }

    /// Run one read-modify-write cycle with both locks held. The list is written back only
    /// when `f` reports a change.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<Offer>) -> eyre::Result<(T, bool)>,
    ) -> eyre::Result<T> {
        let _inproc = self
            .guard
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        let f_lock = crate::fsutil::open_lock_file(&self.lock_path)?;
        f_lock.lock_exclusive().context("lock offer ledger")?;
        let _flock = LedgerLock(f_lock);

        let mut offers = self.read()?;
        let (out, changed) = f(&mut offers)?;
        if changed {
            self.write(offers)?;
        }
        Ok(out)
    }

    pub fn list(&self) -> eyre::Result<Vec<Offer>> {
        self.read()
    }

    /// Run ledger work on the blocking pool. The file lock may be held by another process.
    pub async fn offload<T, F>(&self, f: F) -> eyre::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> eyre::Result<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .context("ledger task panicked")?
    }

    pub fn get(&self, pair_key: &str) -> eyre::Result<Option<Offer>> {
        Ok(self.read()?.into_iter().find(|o| o.pair_key == pair_key))
    }

    /// Fails with `OrderAlreadyInProgress` when `pair_key` has an order still settling.
    pub fn ensure_can_open(&self, pair_key: &str) -> eyre::Result<()> {
        match self.get(pair_key)? {
            Some(o) if o.progress == Progress::Progress => {
                Err(MirrorError::OrderAlreadyInProgress(pair_key.to_owned()).into())
            }
            Some(_) | None => Ok(()),
        }
    }

    /// Record a freshly submitted order in `progress`. A terminal entry for the same pair is
    /// replaced; an entry still in progress is not.
    pub fn upsert(&self, pair_key: &str, order: SwitchainOrder) -> eyre::Result<()> {
        self.mutate(|offers| {
            if offers
                .iter()
                .any(|o| o.pair_key == pair_key && o.progress == Progress::Progress)
            {
                return Err(MirrorError::OrderAlreadyInProgress(pair_key.to_owned()).into());
            }
            offers.retain(|o| o.pair_key != pair_key);
            offers.push(Offer {
                pair_key: pair_key.to_owned(),
                order,
                progress: Progress::Progress,
            });
            Ok(((), true))
        })?;
        tracing::debug!(pair_key, "offer recorded");
        Ok(())
    }

    /// Unconditional overwrite of the entry for `pair_key`.
    pub fn replace(
        &self,
        pair_key: &str,
        order: SwitchainOrder,
        progress: Progress,
    ) -> eyre::Result<()> {
        self.mutate(|offers| {
            offers.retain(|o| o.pair_key != pair_key);
            offers.push(Offer {
                pair_key: pair_key.to_owned(),
                order,
                progress,
            });
            Ok(((), true))
        })
    }

    /// Partial update. Returns `false` when there is no entry for `pair_key`.
    pub fn set_progress(
        &self,
        pair_key: &str,
        order: Option<SwitchainOrder>,
        progress: Option<Progress>,
    ) -> eyre::Result<bool> {
        self.mutate(|offers| {
            let Some(entry) = offers.iter_mut().find(|o| o.pair_key == pair_key) else {
                return Ok((false, false));
            };
            if let Some(order) = order {
                entry.order = order;
            }
            if let Some(progress) = progress {
                entry.progress = progress;
            }
            Ok((true, true))
        })
    }

    /// Compare-and-set used by reconciliation: moves the entry to `progress` only if it is still
    /// in `progress` for `order_id`. Exactly one caller wins per transition; the winner gets the
    /// updated entry back.
    pub fn settle(
        &self,
        pair_key: &str,
        order_id: &str,
        snapshot: SwitchainOrder,
        progress: Progress,
    ) -> eyre::Result<Option<Offer>> {
        self.mutate(|offers| {
            let Some(entry) = offers.iter_mut().find(|o| {
                o.pair_key == pair_key
                    && o.progress == Progress::Progress
                    && o.order.order_id == order_id
            }) else {
                return Ok((None, false));
            };
            entry.order = snapshot;
            entry.progress = progress;
            Ok((Some(entry.clone()), true))
        })
    }

    pub fn remove(&self, pair_key: &str) -> eyre::Result<bool> {
        self.mutate(|offers| {
            let before = offers.len();
            offers.retain(|o| o.pair_key != pair_key);
            let removed = offers.len() != before;
            Ok((removed, removed))
        })
    }

    /// Mark a completed or failed entry as seen by the user. Entries still in progress are left
    /// alone and reported as `false`.
    pub fn acknowledge(&self, pair_key: &str) -> eyre::Result<bool> {
        self.mutate(|offers| {
            let Some(entry) = offers.iter_mut().find(|o| {
                o.pair_key == pair_key
                    && matches!(o.progress, Progress::Completed | Progress::Failed)
            }) else {
                return Ok((false, false));
            };
            entry.progress = Progress::Done;
            Ok((true, true))
        })
    }

    /// Drop acknowledged entries. Returns how many were removed.
    pub fn prune_done(&self) -> eyre::Result<usize> {
        self.mutate(|offers| {
            let before = offers.len();
            offers.retain(|o| o.progress != Progress::Done);
            let n = before.saturating_sub(offers.len());
            Ok((n, n > 0))
        })
    }

    pub fn clear(&self) -> eyre::Result<()> {
        self.mutate(|offers| {
            offers.clear();
            crate::fsutil::remove_if_exists(&self.path)?;
            Ok(((), false))
        })
    }

    pub fn pending(&self) -> eyre::Result<Vec<OfferView>> {
        Ok(self
            .read()?
            .iter()
            .filter(|o| o.progress == Progress::Progress)
            .map(OfferView::of)
            .collect())
    }

    /// Completed or failed entries not yet acknowledged.
    pub fn completed(&self) -> eyre::Result<Vec<OfferView>> {
        Ok(self
            .read()?
            .iter()
            .filter(|o| matches!(o.progress, Progress::Completed | Progress::Failed))
            .map(OfferView::of)
            .collect())
    }
}

#[cfg(test)]
pub(crate) fn sample_order(order_id: &str, pair: &str, status: &str) -> SwitchainOrder {
    SwitchainOrder {
        order_id: order_id.to_owned(),
        pair: pair.to_owned(),
        status: status.to_owned(),
        from_amount: "0.01".to_owned(),
        rate: "500".to_owned(),
        exchange_address: "bc1qexchange".to_owned(),
        exchange_address_tag: None,
        to_address: "terra1to".to_owned(),
        to_address_tag: None,
        refund_address: "bc1qrefund".to_owned(),
        refund_address_tag: None,
        created_at: "2021-05-01T00:00:00Z".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    fn ledger_in(root: &std::path::Path) -> OfferLedger {
        OfferLedger::open(&MirrorPaths::under(root))
    }

    #[test]
    fn pair_naming_follows_direction() {
        assert_eq!(pair_key("BTC", false), "BTC-UST");
        assert_eq!(pair_key("BTC", true), "UST-BTC");
        assert_eq!(split_pair("UST-ETH"), ("UST", "ETH"));
        assert_eq!(split_pair("odd"), ("odd", ""));
    }

    #[test]
    fn terminal_entries_are_replaced_in_progress_rejected() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let l = ledger_in(td.path());
        l.upsert("BTC-UST", sample_order("o1", "BTC-UST", "waiting"))?;

        let err = l
            .upsert("BTC-UST", sample_order("o2", "BTC-UST", "waiting"))
            .err()
            .context("second in-flight order")?;
        assert!(matches!(
            crate::errors::mirror_error(&err),
            Some(MirrorError::OrderAlreadyInProgress(p)) if p == "BTC-UST"
        ));

        l.set_progress("BTC-UST", None, Some(Progress::Completed))?;
        l.upsert("BTC-UST", sample_order("o2", "BTC-UST", "waiting"))?;
        let all = l.list()?;
        assert_eq!(all.len(), 1);
        assert_eq!(
            all.first().map(|o| o.order.order_id.as_str()),
            Some("o2")
        );
        Ok(())
    }

    #[test]
    fn replace_overwrites_and_list_counts_distinct_pairs() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let l = ledger_in(td.path());
        l.replace("BTC-UST", sample_order("o1", "BTC-UST", "waiting"), Progress::Progress)?;
        l.replace("BTC-UST", sample_order("o2", "BTC-UST", "waiting"), Progress::Progress)?;
        l.upsert("ETH-UST", sample_order("o3", "ETH-UST", "waiting"))?;
        l.upsert("UST-ETH", sample_order("o4", "UST-ETH", "waiting"))?;
        assert_eq!(l.list()?.len(), 3);
        assert_eq!(
            l.get("BTC-UST")?.map(|o| o.order.order_id),
            Some("o2".to_owned())
        );

        assert!(l.remove("ETH-UST")?);
        assert!(!l.remove("ETH-UST")?);
        assert_eq!(l.list()?.len(), 2);
        Ok(())
    }

    #[test]
    fn set_progress_is_partial() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let l = ledger_in(td.path());
        assert!(!l.set_progress("BTC-UST", None, Some(Progress::Failed))?);

        l.upsert("BTC-UST", sample_order("o1", "BTC-UST", "waiting"))?;
        l.set_progress(
            "BTC-UST",
            Some(sample_order("o1", "BTC-UST", "exchanging")),
            None,
        )?;
        let e = l.get("BTC-UST")?.context("entry")?;
        assert_eq!(e.progress, Progress::Progress);
        assert_eq!(e.order.status, "exchanging");
        Ok(())
    }

    #[test]
    fn settle_wins_once_and_checks_order_id() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let l = ledger_in(td.path());
        l.upsert("BTC-UST", sample_order("o1", "BTC-UST", "waiting"))?;

        let stale = l.settle(
            "BTC-UST",
            "other",
            sample_order("other", "BTC-UST", "confirmed"),
            Progress::Completed,
        )?;
        assert!(stale.is_none());

        let snap = sample_order("o1", "BTC-UST", "confirmed");
        let first = l.settle("BTC-UST", "o1", snap.clone(), Progress::Completed)?;
        assert_eq!(first.map(|o| o.progress), Some(Progress::Completed));
        let second = l.settle("BTC-UST", "o1", snap, Progress::Completed)?;
        assert!(second.is_none());
        Ok(())
    }

    #[test]
    fn acknowledge_and_prune_only_touch_terminal_entries() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let l = ledger_in(td.path());
        l.upsert("BTC-UST", sample_order("o1", "BTC-UST", "waiting"))?;
        l.upsert("ETH-UST", sample_order("o2", "ETH-UST", "waiting"))?;
        l.set_progress("ETH-UST", None, Some(Progress::Failed))?;

        assert!(!l.acknowledge("BTC-UST")?);
        assert_eq!(l.pending()?.len(), 1);
        let done = l.completed()?;
        assert_eq!(done.len(), 1);
        assert_eq!(done.first().and_then(|v| v.state), Some(Progress::Failed));

        assert!(l.acknowledge("ETH-UST")?);
        assert!(l.completed()?.is_empty());
        assert_eq!(l.prune_done()?, 1);
        assert_eq!(l.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn legacy_list_shape_is_readable() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = MirrorPaths::under(td.path());
        let legacy = serde_json::json!([
            {
                "BTC-UST": {
                    "order": sample_order("o1", "BTC-UST", "waiting"),
                    "progress": "progress",
                }
            },
            null,
            {
                "UST-ETH": {
                    "order": sample_order("o2", "UST-ETH", "confirmed"),
                    "progress": "completed",
                }
            },
        ]);
        crate::fsutil::write_atomic_private(&paths.offers_file(), legacy.to_string().as_bytes())?;

        let l = OfferLedger::open(&paths);
        assert_eq!(l.list()?.len(), 2);
        assert!(l.acknowledge("UST-ETH")?);

        // The next write upgrades the file to the versioned envelope.
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(paths.offers_file())?)?;
        assert_eq!(raw.get("version"), Some(&serde_json::json!(LEDGER_VERSION)));
        Ok(())
    }

    #[test]
    fn future_version_is_corrupt() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = MirrorPaths::under(td.path());
        crate::fsutil::write_atomic_private(
            &paths.offers_file(),
            br#"{"version": 99, "offers": []}"#,
        )?;
        let err = OfferLedger::open(&paths).list().err().context("v99")?;
        assert!(matches!(
            crate::errors::mirror_error(&err),
            Some(MirrorError::CorruptRecord(_))
        ));
        Ok(())
    }

    #[test]
    fn slippage_display_amount() {
        let view = OfferView {
            key: "BTC-UST".to_owned(),
            from: "BTC".to_owned(),
            to: "UST".to_owned(),
            from_amount: "0.01".to_owned(),
            to_amount: "500".to_owned(),
            state: None,
        };
        assert_eq!(
            view.to_amount_after_slippage(Decimal::new(25, 1)),
            Some(Decimal::new(4875, 1))
        );
    }

    #[test]
    fn concurrent_writers_lose_no_updates() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = MirrorPaths::under(td.path());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                // Separate ledgers so only the file lock serializes them.
                let l = OfferLedger::open(&paths);
                std::thread::spawn(move || {
                    let pair = format!("T{i}-UST");
                    l.upsert(&pair, sample_order(&format!("o{i}"), &pair, "waiting"))
                })
            })
            .collect();
        for h in handles {
            h.join().map_err(|_e| eyre::eyre!("writer thread panicked"))??;
        }
        assert_eq!(OfferLedger::open(&paths).list()?.len(), 8);
        Ok(())
    }
}
