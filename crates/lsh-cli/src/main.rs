//! lsh - client CLI for the lsh job daemon and secret sync.
//!
//! Job commands talk to a running `lshd` over its per-user unix socket;
//! secret commands drive the sync engine directly against the local
//! store and the IPFS daemon/gateways.

mod client;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use lsh_core::{
    init_tracing, CronExpr, Error, JobId, JobSpec, JobStatus, Schedule, Settings,
};
use lsh_daemon::protocol::{JobFilter, Op};
use lsh_secrets::{Secret, SecretSync, SecretsError, SyncScope};

use crate::client::DaemonClient;

#[derive(Parser)]
#[command(name = "lsh")]
#[command(version = lsh_core::VERSION)]
#[command(about = "Job daemon client and secret sync", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,

    /// List jobs known to the daemon
    List {
        /// Filter by status (created, scheduled, running, ...)
        #[arg(long)]
        status: Option<JobStatus>,

        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Show one job
    Get {
        id: String,
    },

    /// Create a job
    Create {
        /// Job id (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Human-readable name
        #[arg(long)]
        name: String,

        /// Shell command line to run
        #[arg(long)]
        command: String,

        /// Run every N milliseconds
        #[arg(long, conflicts_with = "cron")]
        interval: Option<u64>,

        /// Five-field cron expression
        #[arg(long)]
        cron: Option<String>,

        /// Working directory (absolute)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Environment overlay entries, KEY=VALUE
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Tags
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Priority (lower = later; default 5)
        #[arg(long)]
        priority: Option<i32>,

        /// Retries for failed executions
        #[arg(long, default_value_t = 0)]
        max_retries: u32,

        /// Per-execution timeout in milliseconds (0 = none)
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,

        /// Run as this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Arm a job's schedule (or run a one-shot job)
    Start {
        id: String,
    },

    /// Unschedule a job and stop its live execution
    Stop {
        id: String,

        /// Signal to deliver (default SIGTERM)
        #[arg(long)]
        signal: Option<String>,
    },

    /// Run a job immediately and wait for it
    Trigger {
        id: String,
    },

    /// Remove a job
    Remove {
        id: String,

        /// Kill a live execution instead of refusing
        #[arg(long)]
        force: bool,
    },

    /// Pause a job's schedule
    Pause {
        id: String,
    },

    /// Resume a paused job
    Resume {
        id: String,
    },

    /// Show execution history
    History {
        /// Job id (all jobs when omitted)
        id: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show job statistics
    Stats {
        /// Job id (all jobs when omitted)
        id: Option<String>,
    },

    /// Daemon lifecycle
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Encrypted secret bundles
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Stop the running daemon
    Stop,
    /// Restart the running daemon
    Restart,
}

#[derive(Subcommand)]
enum SecretsAction {
    /// Encrypt and upload a bundle for an environment
    Push {
        /// Environment name (dev, staging, prod, ...)
        #[arg(long)]
        env: String,

        /// Git repository scope
        #[arg(long)]
        repo: Option<String>,

        /// Git branch recorded in metadata
        #[arg(long)]
        branch: Option<String>,

        /// Read the secret list from a JSON file
        #[arg(long, conflicts_with = "set")]
        file: Option<PathBuf>,

        /// Inline secrets, KEY=VALUE (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Bundle key (falls back to LSH_MASTER_KEY / LSH_SECRETS_KEY)
        #[arg(long)]
        key: Option<String>,
    },

    /// Download and decrypt the latest bundle
    Pull {
        #[arg(long)]
        env: String,

        #[arg(long)]
        repo: Option<String>,

        #[arg(long)]
        key: Option<String>,

        /// Print KEY=VALUE lines instead of JSON
        #[arg(long)]
        env_format: bool,
    },

    /// List known bundles
    List,

    /// Show the sync history
    History,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::WARN });

    if let Err(error) = run(cli.command).await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run(command: Commands) -> Result<(), Error> {
    let settings = Settings::from_env()?;
    let client = DaemonClient::new(settings.socket_path());

    match command {
        Commands::Status => print_value(client.call(Op::GetStatus).await?),
        Commands::List { status, tag } => {
            let filter = JobFilter {
                status,
                tag,
                name_contains: None,
            };
            print_value(client.call(Op::ListJobs { filter: Some(filter) }).await?);
        }
        Commands::Get { id } => {
            print_value(client.call(Op::GetJob { id: JobId(id) }).await?)
        }
        Commands::Create {
            id,
            name,
            command,
            interval,
            cron,
            cwd,
            env,
            tags,
            priority,
            max_retries,
            timeout_ms,
            user,
        } => {
            let id = id.unwrap_or_else(|| JobId::generate().to_string());
            let mut spec = JobSpec::new(id, name, command);
            spec.schedule = match (interval, cron) {
                (Some(ms), None) => Schedule::Interval(ms),
                (None, Some(expr)) => Schedule::Cron(
                    CronExpr::parse(&expr).map_err(|e| Error::InvalidInput(e.to_string()))?,
                ),
                (None, None) => Schedule::None,
                (Some(_), Some(_)) => unreachable!("clap conflicts_with"),
            };
            spec.cwd = cwd;
            spec.env = parse_pairs(&env)?;
            spec.tags = tags;
            if let Some(priority) = priority {
                spec.priority = priority;
            }
            spec.max_retries = max_retries;
            spec.timeout_ms = timeout_ms;
            spec.user = user;

            print_value(client.call(Op::CreateJob { spec }).await?);
        }
        Commands::Start { id } => {
            print_value(client.call(Op::StartJob { id: JobId(id) }).await?)
        }
        Commands::Stop { id, signal } => {
            print_value(client.call(Op::StopJob { id: JobId(id), signal }).await?)
        }
        Commands::Trigger { id } => {
            let value = client.call(Op::TriggerJob { id: JobId(id) }).await?;
            if let Some(output) = value["output"].as_str() {
                print!("{output}");
            }
            let exit_code = value["exitCode"].as_i64().unwrap_or(-1);
            if exit_code != 0 {
                // The job itself failed; that is a generic failure, not
                // a usage error.
                eprintln!("job exited with code {exit_code}");
                std::process::exit(1);
            }
        }
        Commands::Remove { id, force } => {
            print_value(client.call(Op::RemoveJob { id: JobId(id), force }).await?)
        }
        Commands::Pause { id } => {
            print_value(client.call(Op::PauseJob { id: JobId(id) }).await?)
        }
        Commands::Resume { id } => {
            print_value(client.call(Op::ResumeJob { id: JobId(id) }).await?)
        }
        Commands::History { id, limit } => print_value(
            client
                .call(Op::GetJobHistory {
                    job_id: id.map(JobId),
                    limit: Some(limit),
                })
                .await?,
        ),
        Commands::Stats { id } => print_value(
            client
                .call(Op::GetJobStatistics {
                    job_id: id.map(JobId),
                })
                .await?,
        ),
        Commands::Daemon { action } => match action {
            DaemonAction::Stop => print_value(client.call(Op::StopDaemon).await?),
            DaemonAction::Restart => print_value(client.call(Op::RestartDaemon).await?),
        },
        Commands::Secrets { action } => run_secrets(action, &settings).await?,
    }
    Ok(())
}

async fn run_secrets(action: SecretsAction, settings: &Settings) -> Result<(), Error> {
    let sync = SecretSync::open(&settings.home).map_err(secrets_error)?;

    match action {
        SecretsAction::Push {
            env,
            repo,
            branch,
            file,
            set,
            key,
        } => {
            let key = resolve_key(key, settings)?;
            let secrets = if let Some(path) = file {
                let bytes = std::fs::read(&path).map_err(|e| {
                    Error::InvalidInput(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_slice::<Vec<Secret>>(&bytes)
                    .map_err(|e| Error::InvalidInput(format!("bad secret file: {e}")))?
            } else if !set.is_empty() {
                parse_pairs(&set)?
                    .into_iter()
                    .map(|(k, v)| Secret::new(k, v))
                    .collect()
            } else {
                return Err(Error::InvalidInput(
                    "provide secrets via --file or --set".into(),
                ));
            };

            let scope = SyncScope {
                environment: env,
                git_repo: repo,
                git_branch: branch,
            };
            let outcome = sync.push(&secrets, &scope, &key).await.map_err(secrets_error)?;
            if outcome.uploaded {
                println!("pushed {} keys as {}", outcome.keys_count, outcome.cid);
            } else {
                println!(
                    "pushed {} keys as {} (local only; ipfs daemon unreachable)",
                    outcome.keys_count, outcome.cid
                );
            }
        }
        SecretsAction::Pull {
            env,
            repo,
            key,
            env_format,
        } => {
            let key = resolve_key(key, settings)?;
            let scope = SyncScope {
                environment: env,
                git_repo: repo,
                git_branch: None,
            };
            let secrets = sync.pull(&scope, &key).await.map_err(secrets_error)?;
            if env_format {
                for secret in &secrets {
                    println!("{}={}", secret.key, secret.value);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&secrets).unwrap_or_default());
            }
        }
        SecretsAction::List => {
            print_value(serde_json::to_value(sync.list()).unwrap_or_default())
        }
        SecretsAction::History => {
            print_value(serde_json::to_value(sync.history()).unwrap_or_default())
        }
    }
    Ok(())
}

fn resolve_key(flag: Option<String>, settings: &Settings) -> Result<String, Error> {
    flag.or_else(|| settings.master_key.clone()).ok_or_else(|| {
        Error::InvalidInput("no bundle key: pass --key or set LSH_MASTER_KEY".into())
    })
}

/// Map secret-sync errors onto the daemon taxonomy for exit codes.
fn secrets_error(error: SecretsError) -> Error {
    match error {
        SecretsError::InvalidKey(message) => Error::InvalidInput(message),
        SecretsError::InvalidEnvelope(_) | SecretsError::DecryptFailed => {
            Error::DecryptionFailure(error.to_string())
        }
        SecretsError::MalformedPayload(message) => Error::DecryptionFailure(message),
        SecretsError::NotFound(scope) => Error::NotFound(format!("secret bundle {scope}")),
        SecretsError::NetworkUnavailable(message) => Error::NetworkUnavailable(message),
        SecretsError::Io(e) => Error::StorageFailure(e.to_string()),
        SecretsError::Serialization(e) => Error::StorageFailure(e.to_string()),
    }
}

fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, String>, Error> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!("expected KEY=VALUE, got {pair:?}"))
        })?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

fn print_value(value: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
}
