use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use drive_permissions::apply::{CancelFlag, Mode};
use drive_permissions::auth::{AuthError, CredentialProvider, CredentialSource, TokenFileProvider};
use drive_permissions::commands::{self, RunSummary};
use drive_permissions::config::Settings;
use drive_permissions::retry::RetryPolicy;
use drive_permissions::store::{DriveStore, StoreError};

#[derive(Parser, Debug)]
#[command(
    name = "drive-permissions",
    version,
    about = "Fetch, edit, apply and roll back Google Drive folder permissions"
)]
struct Cli {
    /// Directory holding logs/, archives/ and reports/
    #[arg(long, env = "DRIVE_PERMISSIONS_WORKDIR", default_value = ".", global = true)]
    workdir: PathBuf,

    /// URL-safe base64 service account key
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_KEY", hide_env_values = true, global = true)]
    service_account_key: Option<String>,

    /// OAuth client secret for the installed-app flow, used when no service account key is set
    #[arg(long, env = "GOOGLE_CLIENT_SECRET_FILE", global = true)]
    client_secret: Option<PathBuf>,

    /// Cached OAuth token
    #[arg(long, env = "DRIVE_PERMISSIONS_TOKEN_FILE", default_value = "token.json", global = true)]
    token_file: PathBuf,

    /// Retries for rate-limited or timed-out Drive calls
    #[arg(long, env = "DRIVE_PERMISSIONS_MAX_RETRIES", default_value_t = 5, global = true)]
    max_retries: u32,

    /// First retry delay; doubled on each further retry
    #[arg(long, env = "DRIVE_PERMISSIONS_RETRY_BASE_MS", default_value_t = 1000, global = true)]
    retry_base_ms: u64,

    #[arg(long, env = "DRIVE_PERMISSIONS_RETRY_JITTER_MS", default_value_t = 1000, global = true)]
    retry_jitter_ms: u64,

    /// Timeout of a single Drive call
    #[arg(long, env = "DRIVE_PERMISSIONS_CALL_TIMEOUT_SECS", default_value_t = 30, global = true)]
    call_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot a folder tree into an editor sheet
    Fetch {
        #[arg(long)]
        root: String,

        /// Only keep items on which this address holds a grant
        #[arg(long)]
        email: Option<String>,
    },

    /// Apply an edited sheet (dry run unless --live)
    Apply {
        #[arg(long)]
        input: PathBuf,

        /// Overrides the root folder named in the sheet
        #[arg(long)]
        root: Option<String>,

        #[arg(long, default_value_t = false)]
        live: bool,

        /// Skip the confirmation prompt of a live run
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Undo the applied actions of an audit log (dry run unless --live)
    Rollback {
        #[arg(long = "from-log")]
        from_log: PathBuf,

        #[arg(long)]
        root: Option<String>,

        #[arg(long, default_value_t = false)]
        live: bool,

        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// Print one item and its grants as JSON
    Inspect {
        #[arg(long)]
        file: String,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            workdir: self.workdir.clone(),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_ms),
                max_jitter: Duration::from_millis(self.retry_jitter_ms),
            },
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    fn credential_source(&self) -> Result<CredentialSource, AuthError> {
        match (&self.service_account_key, &self.client_secret) {
            (Some(key), _) => Ok(CredentialSource::ServiceAccount {
                encoded_key: key.clone(),
            }),
            (None, Some(secret)) => Ok(CredentialSource::InstalledApp {
                client_secret: secret.clone(),
            }),
            (None, None) => Err(AuthError::NotConfigured),
        }
    }

    /// The live flag and confirmation state of mutating commands.
    fn live_run(&self) -> Option<(bool, bool)> {
        match &self.command {
            Command::Apply { live, yes, .. } | Command::Rollback { live, yes, .. } => {
                Some((*live, *yes))
            }
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mutating = cli.live_run();
    if let Some((true, false)) = mutating {
        if !confirm_live()? {
            tracing::warn!("live run not confirmed, nothing was changed");
            return Ok(false);
        }
    }

    let settings = cli.settings();
    let provider = TokenFileProvider::new(cli.credential_source()?, &cli.token_file);

    // Only apply and rollback stop cleanly on Ctrl-C; other commands keep the
    // default handler and exit at once.
    let cancel = CancelFlag::new();
    if mutating.is_some() {
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current call");
                on_signal.cancel();
            }
        });
    }

    let mut refreshed = false;
    loop {
        let credential = provider.acquire().await.context("failed to acquire credentials")?;
        let store = DriveStore::new(credential);
        match run_command(&store, &settings, &cli.command, cancel.clone()).await {
            Err(err) if !refreshed && is_auth_error(&err) => {
                tracing::warn!("{err:#}; discarding cached token and retrying once");
                provider.invalidate()?;
                refreshed = true;
            }
            result => return result,
        }
    }
}

async fn run_command(
    store: &DriveStore,
    settings: &Settings,
    command: &Command,
    cancel: CancelFlag,
) -> Result<bool> {
    match command {
        Command::Fetch { root, email } => {
            let summary = commands::fetch(store, settings, root, email.as_deref()).await?;
            println!("{}", summary.sheet.display());
            Ok(true)
        }
        Command::Apply {
            input, root, live, ..
        } => {
            let summary = commands::apply_sheet(
                store,
                settings,
                input,
                root.as_deref(),
                Mode::from_live_flag(*live),
                cancel,
            )
            .await?;
            Ok(report(&summary))
        }
        Command::Rollback {
            from_log, root, live, ..
        } => {
            let summary = commands::rollback_log(
                store,
                settings,
                from_log,
                root.as_deref(),
                Mode::from_live_flag(*live),
                cancel,
            )
            .await?;
            Ok(report(&summary))
        }
        Command::Inspect { file } => {
            let inspection = commands::inspect(store, settings, file).await?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
            Ok(true)
        }
    }
}

fn report(summary: &RunSummary) -> bool {
    if let Some(log) = &summary.audit_log {
        println!("{}", log.display());
    }
    if summary.failed > 0 {
        tracing::error!(
            failed = summary.failed,
            "some actions failed, check the audit log for FAILED entries"
        );
    }
    if summary.cancelled {
        tracing::warn!("run was cancelled before all actions were attempted");
    }
    summary.succeeded()
}

fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::Auth(_))))
}

fn confirm_live() -> Result<bool> {
    print!("This is a LIVE run and will change Drive permissions. Type 'yes' to continue: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(answer.trim() == "yes")
}
