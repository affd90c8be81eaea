//! Security and reconciliation core of the Mirror wallet.
//!
//! Two halves share one persisted-state-and-polling pattern:
//!
//! - [`keystore::CredentialStore`] keeps the single wallet credential, a private key encrypted
//!   under a password-derived key, and manages its password and biometric lifecycle.
//! - [`ledger::OfferLedger`] records external swap orders; [`poller::ReconciliationPoller`] and
//!   [`tracker::SingleOrderTracker`] reconcile them against the providers and report each
//!   terminal transition once.
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod audit;
pub mod biometric;
pub mod config;
pub mod errors;
pub mod fsutil;
pub mod keystore;
pub mod ledger;
pub mod notify;
pub mod paths;
pub mod poller;
pub mod prefs;
pub mod providers;
pub mod store;
pub mod tracker;
pub mod wallet;
