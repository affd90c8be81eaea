#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use mirror::{
    audit::AuditLog,
    biometric::NoBiometrics,
    config::MirrorConfig,
    errors,
    keystore::CredentialStore,
    ledger::{self, OfferLedger, OfferView},
    notify::{ChannelNotifier, FanoutNotifier, NotificationKind, RecordingNotifier, TracingNotifier},
    paths::MirrorPaths,
    poller::ReconciliationPoller,
    providers::{
        moonpay::MoonpayClient,
        switchain::{self, OrderRequest, SwitchainClient},
        transak::TransakClient,
        LatestOrderSource,
    },
    store::ConfigStore,
    tracker::{SingleOrderTracker, TrackerStore},
    wallet,
};
use secrecy::ExposeSecret as _;
use serde_json::json;
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::prelude::*;
use zeroize::Zeroizing;

mod cli_output;

use cli_output::{print_json, SecretInput};

#[derive(Parser, Debug)]
#[command(name = "mirror", version)]
struct Cli {
    /// Read secrets (private key, passwords, recovery phrase) from stdin, one per line,
    /// instead of prompting on the terminal.
    #[arg(long, global = true, default_value_t = false)]
    password_stdin: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Manage the encrypted wallet credential.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCommand,
    },

    /// Inspect and manage the swap order ledger.
    Offers {
        #[command(subcommand)]
        cmd: OffersCommand,
    },

    /// Reconcile pending swap orders against Switchain.
    Poll {
        #[command(subcommand)]
        cmd: PollCommand,
    },

    /// Track the latest card purchase with Moonpay or Transak.
    Tracker {
        #[command(subcommand)]
        cmd: TrackerCommand,
    },
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    /// Whether a wallet exists, and its address.
    Status,

    /// Store a wallet from a private key (hex), or generate a new one.
    Create {
        /// Generate a fresh 24-word recovery phrase instead of reading a private key.
        #[arg(long, default_value_t = false)]
        generate: bool,
    },

    /// Store a wallet recovered from a 24-word phrase.
    Recover {
        /// BIP44 coin type: 330 for current wallets, 118 for wallets made by early builds.
        #[arg(long, default_value_t = wallet::COIN_TYPE_TERRA)]
        coin_type: u32,
    },

    /// Print the wallet address.
    Address,

    /// Verify the password by decrypting the key.
    Unlock {
        /// Print the private key (hex) to stdout.
        #[arg(long, default_value_t = false)]
        reveal: bool,
    },

    /// Check a password without failing on a mismatch.
    Check,

    /// Re-encrypt the key under a new password.
    ChangePassword,

    /// Re-encrypt the key under the configured default KDF if it uses another one.
    MigrateKdf,

    /// Delete the wallet, pending orders, trackers and settings.
    Reset {
        /// Skip the confirmation prompt (required for non-interactive shells).
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum OffersCommand {
    /// Every ledger entry, raw.
    List,

    /// Entries still in progress, with the expected receive amount after slippage.
    Pending,

    /// Completed or failed entries awaiting acknowledgement.
    Completed,

    /// Quote and place a Switchain order, then record it.
    Submit {
        /// Asset swapped against UST, e.g. `BTC`.
        #[arg(long)]
        denom: String,
        /// Swap UST into `denom` instead of `denom` into UST.
        #[arg(long, default_value_t = false)]
        withdraw: bool,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        to_address: String,
        #[arg(long)]
        refund_address: String,
    },

    /// Mark a completed or failed entry as seen.
    Ack { pair: String },

    /// Drop an entry regardless of its state.
    Remove { pair: String },

    /// Drop every acknowledged entry.
    Prune,
}

#[derive(Subcommand, Debug)]
enum PollCommand {
    /// Run one reconciliation sweep and print what settled.
    Once,

    /// Keep polling until interrupted, printing each completion as it happens.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliProvider {
    Moonpay,
    Transak,
}

impl CliProvider {
    const fn name(self) -> &'static str {
        match self {
            Self::Moonpay => "moonpay",
            Self::Transak => "transak",
        }
    }

    const fn kind(self) -> NotificationKind {
        match self {
            Self::Moonpay => NotificationKind::Moonpay,
            Self::Transak => NotificationKind::Transak,
        }
    }
}

#[derive(Subcommand, Debug)]
enum TrackerCommand {
    /// Record that the provider flow was just opened.
    Open {
        #[arg(value_enum)]
        provider: CliProvider,
        /// Provider order id to watch (Transak).
        #[arg(long)]
        order_id: Option<String>,
    },

    /// Fetch the latest order and report a completion once.
    Check {
        #[arg(value_enum)]
        provider: CliProvider,
    },

    /// Print the persisted tracker state.
    Show {
        #[arg(value_enum)]
        provider: CliProvider,
    },
}

fn init_logging(paths: &MirrorPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("mirror.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

struct Ctx {
    paths: MirrorPaths,
    cfg: MirrorConfig,
    input: SecretInput,
}

impl Ctx {
    fn credentials(&self) -> eyre::Result<CredentialStore> {
        CredentialStore::open(self.paths.clone(), &self.cfg, Arc::new(NoBiometrics))
    }
}

async fn run_wallet(ctx: &mut Ctx, cmd: WalletCommand) -> eyre::Result<()> {
    let ks = ctx.credentials()?;
    match cmd {
        WalletCommand::Status => {
            let has_wallet = ks.has_wallet()?;
            let address = has_wallet.then(|| ks.address()).transpose()?;
            print_json(&json!({ "has_wallet": has_wallet, "address": address }))
        }
        WalletCommand::Create { generate } => {
            let key_hex = if generate {
                let phrase = wallet::generate_mnemonic()?;
                let key = wallet::private_key_from_mnemonic(&phrase, wallet::COIN_TYPE_TERRA)?;
                cli_output::print_mnemonic_notice(&phrase);
                Zeroizing::new(hex::encode(key.as_slice()))
            } else {
                let typed = ctx.input.line("Private key (hex): ")?;
                Zeroizing::new(typed.trim().to_owned())
            };
            let password = ctx.input.new_secret("New password: ")?;
            let address = ks
                .offload(move |s| s.create(&key_hex, &password))
                .await
                .context("create wallet")?;
            print_json(&json!({ "address": address }))
        }
        WalletCommand::Recover { coin_type } => {
            let phrase = ctx.input.line("Recovery phrase: ")?;
            let password = ctx.input.new_secret("New password: ")?;
            let address = ks
                .offload(move |s| s.recover(&phrase, coin_type, &password))
                .await
                .context("recover wallet")?;
            print_json(&json!({ "address": address }))
        }
        WalletCommand::Address => print_json(&json!({ "address": ks.address()? })),
        WalletCommand::Unlock { reveal } => {
            let password = ctx.input.secret("Password: ")?;
            let key = ks
                .offload(move |s| s.unlock(&password))
                .await
                .context("unlock wallet")?;
            let address = ks.address()?;
            if reveal {
                print_json(&json!({ "address": address, "private_key": key.expose_secret() }))
            } else {
                print_json(&json!({ "address": address, "unlocked": true }))
            }
        }
        WalletCommand::Check => {
            let password = ctx.input.secret("Password: ")?;
            let matches = ks.offload(move |s| s.check_password(&password)).await?;
            print_json(&json!({ "matches": matches }))
        }
        WalletCommand::ChangePassword => {
            let old = ctx.input.secret("Current password: ")?;
            let new = ctx.input.new_secret("New password: ")?;
            ks.offload(move |s| s.change_password(&old, &new))
                .await
                .context("change password")?;
            print_json(&json!({ "changed": true }))
        }
        WalletCommand::MigrateKdf => {
            let password = ctx.input.secret("Password: ")?;
            let migrated = ks
                .offload(move |s| s.migrate_kdf(&password))
                .await
                .context("migrate kdf")?;
            print_json(&json!({ "migrated": migrated }))
        }
        WalletCommand::Reset { yes } => {
            cli_output::confirm_reset_or_bail(yes)?;
            ks.reset().context("reset wallet")?;
            print_json(&json!({ "reset": true }))
        }
    }
}

fn view_json(v: &OfferView, cfg: &MirrorConfig) -> serde_json::Value {
    let expected = v
        .to_amount_after_slippage(cfg.switchain.slippage_percent)
        .map(|d| d.to_string());
    json!({ "offer": v, "to_amount_expected": expected })
}

async fn run_offers(ctx: &Ctx, cmd: OffersCommand) -> eyre::Result<()> {
    let ledger = OfferLedger::open(&ctx.paths);
    match cmd {
        OffersCommand::List => print_json(&ledger.list()?),
        OffersCommand::Pending => {
            let rows: Vec<_> = ledger
                .pending()?
                .iter()
                .map(|v| view_json(v, &ctx.cfg))
                .collect();
            print_json(&rows)
        }
        OffersCommand::Completed => print_json(&ledger.completed()?),
        OffersCommand::Submit {
            denom,
            withdraw,
            amount,
            to_address,
            refund_address,
        } => {
            let pair = ledger::pair_key(&denom.to_ascii_uppercase(), withdraw);
            let client = SwitchainClient::new(&ctx.cfg)?;
            let quote = client.pair_offer(&pair).await.context("fetch quote")?;
            let req = OrderRequest {
                pair,
                from_amount: amount,
                to_amount: None,
                to_address,
                to_address_tag: None,
                refund_address,
                refund_address_tag: None,
                signature: Some(quote.signature),
                slippage: ctx.cfg.switchain.slippage_percent.to_string(),
            };
            let order = switchain::submit_order(&client, &ledger, &req).await?;
            print_json(&order)
        }
        OffersCommand::Ack { pair } => {
            print_json(&json!({ "acknowledged": ledger.acknowledge(&pair)? }))
        }
        OffersCommand::Remove { pair } => {
            print_json(&json!({ "removed": ledger.remove(&pair)? }))
        }
        OffersCommand::Prune => print_json(&json!({ "pruned": ledger.prune_done()? })),
    }
}

async fn run_poll(ctx: &Ctx, cmd: PollCommand) -> eyre::Result<()> {
    let ledger = OfferLedger::open(&ctx.paths);
    let source = Arc::new(SwitchainClient::new(&ctx.cfg)?);
    match cmd {
        PollCommand::Once => {
            let rec = RecordingNotifier::new();
            let fan = FanoutNotifier::default()
                .with(Arc::new(rec.clone()))
                .with(Arc::new(TracingNotifier));
            let poller = ReconciliationPoller::new(ledger, source, Arc::new(fan))
                .with_audit(AuditLog::new(&ctx.paths));
            let report = poller.poll_once().await?;
            let completions: Vec<_> = rec.take()?.into_iter().map(|(_, c)| c).collect();
            print_json(&json!({ "report": report, "completions": completions }))
        }
        PollCommand::Watch => {
            let (notifier, mut rx) = ChannelNotifier::new();
            let fan = FanoutNotifier::default()
                .with(Arc::new(notifier))
                .with(Arc::new(TracingNotifier));
            let handle = ReconciliationPoller::new(ledger, source, Arc::new(fan))
                .with_audit(AuditLog::new(&ctx.paths))
                .with_interval(ctx.cfg.poll_interval())
                .spawn();
            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        let Some((kind, completion)) = msg else { break };
                        print_json(&json!({ "kind": kind, "completion": completion }))?;
                    }
                    r = tokio::signal::ctrl_c() => {
                        r.context("listen for ctrl-c")?;
                        break;
                    }
                }
            }
            handle.shutdown().await
        }
    }
}

async fn run_tracker(ctx: &Ctx, cmd: TrackerCommand) -> eyre::Result<()> {
    match cmd {
        TrackerCommand::Open { provider, order_id } => {
            TrackerStore::open(&ctx.paths, provider.name()).mark_opened(order_id)?;
            print_json(&json!({ "provider": provider.name(), "opened": true }))
        }
        TrackerCommand::Show { provider } => {
            print_json(&TrackerStore::open(&ctx.paths, provider.name()).load()?)
        }
        TrackerCommand::Check { provider } => {
            let source: Arc<dyn LatestOrderSource> = match provider {
                CliProvider::Moonpay => {
                    let address = ctx.credentials()?.address()?;
                    Arc::new(MoonpayClient::new(&ctx.cfg, &address)?)
                }
                CliProvider::Transak => {
                    let state = TrackerStore::open(&ctx.paths, provider.name()).load()?;
                    Arc::new(TransakClient::new(&ctx.cfg, state.watched_order_id)?)
                }
            };
            let tracker = SingleOrderTracker::new(&ctx.paths, provider.kind(), source);
            let rec = RecordingNotifier::new();
            let fan = FanoutNotifier::default()
                .with(Arc::new(rec.clone()))
                .with(Arc::new(TracingNotifier));
            let outcome = tracker.check(&fan).await?;
            let completion = rec.take()?.into_iter().next().map(|(_, c)| c);
            print_json(&json!({ "result": outcome, "completion": completion }))
        }
    }
}

async fn run(cli: Cli, paths: MirrorPaths) -> eyre::Result<()> {
    let cfg = ConfigStore::new(&paths).load_or_init_default()?;
    let mut ctx = Ctx {
        paths,
        cfg,
        input: SecretInput::new(cli.password_stdin),
    };
    match cli.cmd {
        Command::Paths => print_json(&json!({
            "config_dir": ctx.paths.config_dir,
            "data_dir": ctx.paths.data_dir,
            "log_file": ctx.paths.log_file,
        })),
        Command::Wallet { cmd } => run_wallet(&mut ctx, cmd).await,
        Command::Offers { cmd } => run_offers(&ctx, cmd).await,
        Command::Poll { cmd } => run_poll(&ctx, cmd).await,
        Command::Tracker { cmd } => run_tracker(&ctx, cmd).await,
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = MirrorPaths::discover()?;
    paths.ensure_private_dirs().context("create data dirs")?;
    let _log_guard = init_logging(&paths);

    match run(cli, paths).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(report) => {
            let err = errors::cli_error(&report);
            tracing::debug!(code = err.code, error = ?report, "command failed");
            cli_output::print_error(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}
