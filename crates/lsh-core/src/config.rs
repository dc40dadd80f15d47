//! Environment-driven daemon configuration and on-disk layout.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Environment variables the daemon recognizes.
pub const ENV_MASTER_KEY: &str = "LSH_MASTER_KEY";
pub const ENV_SECRETS_KEY: &str = "LSH_SECRETS_KEY";
pub const ENV_API_KEY: &str = "LSH_API_KEY";
pub const ENV_JWT_SECRET: &str = "LSH_JWT_SECRET";
pub const ENV_API_ENABLED: &str = "LSH_API_ENABLED";
pub const ENV_API_PORT: &str = "LSH_API_PORT";
pub const ENV_ALLOW_DANGEROUS: &str = "LSH_ALLOW_DANGEROUS_COMMANDS";
pub const ENV_DEBUG: &str = "LSH_DEBUG";
pub const ENV_FORCE_HTTP: &str = "LSH_FORCE_HTTP";
pub const ENV_MODE: &str = "LSH_ENV";

/// Resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub user: String,
    pub api_enabled: bool,
    pub api_port: u16,
    pub api_key: Option<String>,
    pub jwt_secret: Option<String>,
    pub master_key: Option<String>,
    pub allow_dangerous_commands: bool,
    pub force_http: bool,
    pub debug: bool,
    pub production: bool,
}

impl Settings {
    /// Read settings from a snapshot of environment variables.
    ///
    /// In production mode (`LSH_ENV=production`) the dangerous toggles
    /// are rejected outright rather than ignored.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let truthy = |key: &str| {
            vars.get(key)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };

        let production = vars
            .get(ENV_MODE)
            .map(|v| v == "production")
            .unwrap_or(false);
        let allow_dangerous_commands = truthy(ENV_ALLOW_DANGEROUS);
        let force_http = truthy(ENV_FORCE_HTTP);

        if production && allow_dangerous_commands {
            return Err(Error::InvalidInput(format!(
                "{ENV_ALLOW_DANGEROUS}=true is not permitted in production"
            )));
        }
        if production && force_http {
            return Err(Error::InvalidInput(format!(
                "{ENV_FORCE_HTTP}=true is not permitted in production"
            )));
        }

        let home = vars
            .get("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".lsh");
        let user = vars
            .get("USER")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let api_port = vars
            .get(ENV_API_PORT)
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| Error::InvalidInput(format!("bad {ENV_API_PORT}: {v}")))
            })
            .transpose()?
            .unwrap_or(3030);

        Ok(Settings {
            home,
            user,
            api_enabled: truthy(ENV_API_ENABLED),
            api_port,
            api_key: vars.get(ENV_API_KEY).cloned(),
            jwt_secret: vars.get(ENV_JWT_SECRET).cloned(),
            master_key: vars
                .get(ENV_MASTER_KEY)
                .or_else(|| vars.get(ENV_SECRETS_KEY))
                .cloned(),
            allow_dangerous_commands,
            force_http,
            debug: truthy(ENV_DEBUG),
            production,
        })
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Per-user IPC socket path.
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/lsh-job-daemon-{}.sock", self.user))
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.home)
    }
}

/// Per-user on-disk layout under `~/.lsh/`.
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub storage: PathBuf,
    pub registry: PathBuf,
    pub logs_dir: PathBuf,
    pub secrets_cache: PathBuf,
    pub secrets_metadata: PathBuf,
    pub sync_history: PathBuf,
    pub pid_file: PathBuf,
    pub audit_log: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Paths {
            storage: root.join("storage.json"),
            registry: root.join("registry.json"),
            logs_dir: root.join("logs"),
            secrets_cache: root.join("secrets-cache"),
            secrets_metadata: root.join("secrets-metadata.json"),
            sync_history: root.join("sync-history.json"),
            pid_file: root.join("daemon.pid"),
            audit_log: root.join("audit.log"),
            root,
        }
    }
}

/// Command prefixes refused unless `LSH_ALLOW_DANGEROUS_COMMANDS` is set.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=",
    ":(){ :|:& };:",
    "chmod -R 777 /",
];

/// Whether a command line matches the dangerous-command denylist.
pub fn is_dangerous_command(command: &str) -> bool {
    let trimmed = command.trim();
    DANGEROUS_PATTERNS.iter().any(|p| trimmed.contains(p))
}
