//! Process supervisor: owns one child process per execution.
//!
//! Spawns the job's command under `sh -c` in its own process group,
//! streams stdout/stderr into the registry, enforces the per-execution
//! timeout, applies the retry policy, and honours cooperative
//! cancellation (signal, 5 s grace, then SIGKILL to the group).

pub mod resource;

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{ExecutionRecord, ExecutionStatus, JobSpec};
use crate::error::{Error, Result};
use crate::registry::{ExecutionRegistry, OutputStream};

/// Environment keys inherited by every child; everything else comes
/// from the job's own `env` overlay.
const BASE_ENV_KEYS: &[&str] = &["PATH", "HOME", "USER", "SHELL", "LANG", "TZ"];

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grace between SIGTERM and SIGKILL on stop or timeout.
    pub term_grace: Duration,
    /// Resource sampling cadence while the child runs.
    pub sample_interval: Duration,
    /// Base of the retry backoff: `2^retry * base`, capped below.
    pub retry_base: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            term_grace: Duration::from_secs(5),
            sample_interval: Duration::from_secs(1),
            retry_base: Duration::from_millis(250),
            max_retry_backoff: Duration::from_secs(60),
        }
    }
}

/// A cancellation request delivered to a running execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    /// Signal name, e.g. `SIGTERM`; defaults to SIGTERM when omitted.
    pub signal: Option<String>,
}

/// Map a signal name to its number. Accepts the `SIG` prefix or not.
pub fn signal_number(name: &str) -> Option<i32> {
    let bare = name.strip_prefix("SIG").unwrap_or(name);
    match bare {
        "HUP" => Some(libc::SIGHUP),
        "INT" => Some(libc::SIGINT),
        "QUIT" => Some(libc::SIGQUIT),
        "KILL" => Some(libc::SIGKILL),
        "USR1" => Some(libc::SIGUSR1),
        "USR2" => Some(libc::SIGUSR2),
        "TERM" => Some(libc::SIGTERM),
        _ => None,
    }
}

/// Send `signal` to the child's whole process group.
fn kill_group(pid: u32, signal: i32) {
    // SAFETY: killpg on a pid we spawned; a stale pid yields ESRCH,
    // which is ignored.
    unsafe {
        libc::killpg(pid as i32, signal);
    }
}

/// Resolve a user name to (uid, gid) from the passwd database.
fn resolve_user(name: &str) -> Option<(u32, u32)> {
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    for line in passwd.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some(name) {
            continue;
        }
        let _password = fields.next()?;
        let uid = fields.next()?.parse().ok()?;
        let gid = fields.next()?.parse().ok()?;
        return Some((uid, gid));
    }
    None
}

enum Outcome {
    Exited(std::process::ExitStatus),
    Stopped(String),
    TimedOut,
}

/// The supervisor. One instance serves the whole daemon; each call to
/// [`Supervisor::run`] owns a single child for its duration.
pub struct Supervisor {
    registry: Arc<ExecutionRegistry>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(registry: Arc<ExecutionRegistry>, config: SupervisorConfig) -> Self {
        Supervisor { registry, config }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Run one execution with the job's retry policy applied: `failed`
    /// outcomes re-run with exponential backoff until `max_retries`;
    /// `killed` and `timeout` never retry.
    pub async fn run_with_retries(
        &self,
        spec: &JobSpec,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
    ) -> Result<ExecutionRecord> {
        let mut retry_count = 0u32;
        loop {
            let record = self.run_attempt(spec, stop_rx, retry_count).await?;
            if record.status != ExecutionStatus::Failed || retry_count >= spec.max_retries {
                return Ok(record);
            }
            retry_count += 1;
            let backoff = self
                .config
                .retry_base
                .saturating_mul(2u32.saturating_pow(retry_count))
                .min(self.config.max_retry_backoff);
            debug!(job_id = %spec.id, retry_count, backoff_ms = backoff.as_millis() as u64, "retrying failed execution");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                Some(_) = stop_rx.recv() => return Ok(record),
            }
        }
    }

    /// Run a single attempt: spawn, stream, wait, seal.
    pub async fn run(
        &self,
        spec: &JobSpec,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
    ) -> Result<ExecutionRecord> {
        self.run_attempt(spec, stop_rx, 0).await
    }

    async fn run_attempt(
        &self,
        spec: &JobSpec,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
        retry_count: u32,
    ) -> Result<ExecutionRecord> {
        let record = self.registry.record_start(spec, None)?;
        let execution_id = record.execution_id.clone();
        self.registry.record_retry(&execution_id, retry_count);

        let mut child = match self.spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                let message = e.to_string();
                return self
                    .registry
                    .record_completion(
                        &execution_id,
                        ExecutionStatus::Failed,
                        None,
                        None,
                        Some(message),
                    )
                    .await;
            }
        };
        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.record_pid(&execution_id, pid);
        }
        debug!(job_id = %spec.id, execution_id = %execution_id, pid, "child spawned");

        // Stream pumps own the pipes; they finish on EOF.
        let stdout_pump = child.stdout.take().map(|out| {
            tokio::spawn(pump(out, Arc::clone(&self.registry), execution_id.clone(), OutputStream::Stdout))
        });
        let stderr_pump = child.stderr.take().map(|err| {
            tokio::spawn(pump(err, Arc::clone(&self.registry), execution_id.clone(), OutputStream::Stderr))
        });

        let outcome = self.watch(&mut child, pid, spec, stop_rx, &execution_id).await;

        // Drain captured output before sealing the record.
        if let Some(pump) = stdout_pump {
            let _ = pump.await;
        }
        if let Some(pump) = stderr_pump {
            let _ = pump.await;
        }

        let sealed = match outcome {
            Outcome::Exited(status) => {
                if let Some(code) = status.code() {
                    let (exec_status, error) = if code == 0 {
                        (ExecutionStatus::Completed, None)
                    } else {
                        (
                            ExecutionStatus::Failed,
                            Some(format!("command exited with code {code}")),
                        )
                    };
                    self.registry
                        .record_completion(&execution_id, exec_status, Some(code), None, error)
                        .await?
                } else {
                    use std::os::unix::process::ExitStatusExt;
                    let signal = status.signal().map(signal_name);
                    self.registry
                        .record_completion(&execution_id, ExecutionStatus::Killed, None, signal, None)
                        .await?
                }
            }
            Outcome::Stopped(signal) => {
                self.registry
                    .record_completion(
                        &execution_id,
                        ExecutionStatus::Killed,
                        None,
                        Some(signal),
                        None,
                    )
                    .await?
            }
            Outcome::TimedOut => {
                self.registry
                    .record_completion(
                        &execution_id,
                        ExecutionStatus::Timeout,
                        None,
                        Some("SIGTERM".to_string()),
                        Some(format!("timed out after {}ms", spec.timeout_ms)),
                    )
                    .await?
            }
        };
        Ok(sealed)
    }

    /// Wait for exit, a stop request, or the timeout, sampling resources
    /// along the way.
    async fn watch(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        spec: &JobSpec,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
        execution_id: &str,
    ) -> Outcome {
        let started = Utc::now();
        let mut sample_tick = tokio::time::interval(self.config.sample_interval);
        sample_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sample_tick.tick().await; // first tick is immediate

        let timeout = async {
            if spec.timeout_ms > 0 {
                tokio::time::sleep(Duration::from_millis(spec.timeout_ms)).await
            } else {
                futures::future::pending::<()>().await
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(status) => Outcome::Exited(status),
                        Err(e) => {
                            warn!(execution_id, error = %e, "wait failed; treating as killed");
                            Outcome::Stopped("SIGKILL".to_string())
                        }
                    };
                }
                Some(request) = stop_rx.recv() => {
                    let name = request.signal.unwrap_or_else(|| "SIGTERM".to_string());
                    let number = signal_number(&name).unwrap_or(libc::SIGTERM);
                    self.terminate(child, pid, number).await;
                    return Outcome::Stopped(name);
                }
                _ = &mut timeout => {
                    self.terminate(child, pid, libc::SIGTERM).await;
                    return Outcome::TimedOut;
                }
                _ = sample_tick.tick() => {
                    if let Some(pid) = pid {
                        if let Some(sample) = resource::sample(pid) {
                            let elapsed = (Utc::now() - started).num_milliseconds().max(1) as f64 / 1000.0;
                            let cpu_secs = sample.cpu_ticks as f64 / resource::clock_ticks_per_sec();
                            self.registry.record_resources(
                                execution_id,
                                Some(sample.peak_rss_mb),
                                Some(cpu_secs / elapsed * 100.0),
                            );
                        }
                    }
                }
            }
        }
    }

    /// Cooperative-then-forceful: `signal`, grace, SIGKILL to the group.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>, signal: i32) {
        let Some(pid) = pid else {
            let _ = child.kill().await;
            return;
        };
        kill_group(pid, signal);
        tokio::select! {
            _ = child.wait() => {}
            _ = tokio::time::sleep(self.config.term_grace) => {
                kill_group(pid, libc::SIGKILL);
                let _ = child.wait().await;
            }
        }
    }

    /// Build the child command: `sh -c` over a minimal inherited env
    /// with the job's overlay. The daemon's own environment is never
    /// mutated.
    fn spawn(&self, spec: &JobSpec) -> Result<Child> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        cmd.env_clear();
        for key in BASE_ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(&spec.env);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(user) = &spec.user {
            let current = std::env::var("USER").unwrap_or_default();
            if *user != current {
                let (uid, gid) = resolve_user(user).ok_or_else(|| {
                    Error::InvalidInput(format!("unknown user: {user}"))
                })?;
                cmd.uid(uid).gid(gid);
            }
        }

        cmd.spawn()
            .map_err(|e| Error::InvalidInput(format!("failed to spawn command: {e}")))
    }
}

fn signal_name(number: i32) -> String {
    match number {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        other => format!("SIG{other}"),
    }
}

async fn pump(
    mut reader: impl AsyncReadExt + Unpin,
    registry: Arc<ExecutionRegistry>,
    execution_id: String,
    stream: OutputStream,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if registry.record_output(&execution_id, stream, &buf[..n]).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;

    fn supervisor() -> Supervisor {
        let registry = Arc::new(ExecutionRegistry::new(RegistryConfig::default(), None));
        Supervisor::new(registry, SupervisorConfig::default())
    }

    fn stop_channel() -> (mpsc::Sender<StopRequest>, mpsc::Receiver<StopRequest>) {
        mpsc::channel(4)
    }

    #[tokio::test]
    async fn echo_completes_with_captured_stdout() {
        let supervisor = supervisor();
        let spec = JobSpec::new("j1", "greet", "echo hi");
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.exit_code, Some(0));
        assert!(record.stdout.starts_with("hi"));
        assert!(record.pid.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let supervisor = supervisor();
        let spec = JobSpec::new("j1", "fail", "exit 3");
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.exit_code, Some(3));
        assert!(record.error_message.unwrap().contains("code 3"));
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let supervisor = supervisor();
        let spec = JobSpec::new("j1", "noise", "echo out; echo err >&2");
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert!(record.stdout.contains("out"));
        assert!(record.stderr.contains("err"));
    }

    #[tokio::test]
    async fn job_env_overlays_base() {
        let supervisor = supervisor();
        let mut spec = JobSpec::new("j1", "env", "echo $LSH_TEST_MARKER");
        spec.env.insert("LSH_TEST_MARKER".into(), "overlaid".into());
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert!(record.stdout.starts_with("overlaid"));
        // The daemon's own environment was not touched.
        assert!(std::env::var("LSH_TEST_MARKER").is_err());
    }

    #[tokio::test]
    async fn stop_kills_within_grace() {
        let registry = Arc::new(ExecutionRegistry::new(RegistryConfig::default(), None));
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            SupervisorConfig {
                term_grace: Duration::from_secs(2),
                ..SupervisorConfig::default()
            },
        );
        let spec = JobSpec::new("j1", "sleeper", "sleep 60");
        let (tx, mut rx) = stop_channel();

        let started = std::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(StopRequest {
                signal: Some("SIGTERM".into()),
            })
            .await
            .unwrap();
        });

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Killed);
        assert_eq!(record.signal.as_deref(), Some("SIGTERM"));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn timeout_seals_as_timeout() {
        let registry = Arc::new(ExecutionRegistry::new(RegistryConfig::default(), None));
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            SupervisorConfig {
                term_grace: Duration::from_millis(500),
                ..SupervisorConfig::default()
            },
        );
        let mut spec = JobSpec::new("j1", "slow", "sleep 30");
        spec.timeout_ms = 300;
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Timeout);
        assert!(record.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn failed_attempts_retry_up_to_max() {
        let registry = Arc::new(ExecutionRegistry::new(RegistryConfig::default(), None));
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            SupervisorConfig {
                retry_base: Duration::from_millis(5),
                ..SupervisorConfig::default()
            },
        );
        let mut spec = JobSpec::new("j1", "flaky", "false");
        spec.max_retries = 2;
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run_with_retries(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.retry_count, 2);
        assert_eq!(registry.get_history(&spec.id, 10).len(), 3);
    }

    #[tokio::test]
    async fn successful_run_does_not_retry() {
        let registry = Arc::new(ExecutionRegistry::new(RegistryConfig::default(), None));
        let supervisor = Supervisor::new(Arc::clone(&registry), SupervisorConfig::default());
        let mut spec = JobSpec::new("j1", "fine", "true");
        spec.max_retries = 3;
        let (_tx, mut rx) = stop_channel();

        let record = supervisor.run_with_retries(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(registry.get_history(&spec.id, 10).len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_is_invalid_input() {
        let supervisor = supervisor();
        let mut spec = JobSpec::new("j1", "who", "id");
        spec.user = Some("no-such-user-zzz".into());
        let (_tx, mut rx) = stop_channel();

        // Spawn failure is attached to the record, not surfaced as a
        // daemon error.
        let record = supervisor.run(&spec, &mut rx).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error_message.unwrap().contains("unknown user"));
    }

    #[test]
    fn signal_parsing() {
        assert_eq!(signal_number("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(signal_number("TERM"), Some(libc::SIGTERM));
        assert_eq!(signal_number("KILL"), Some(libc::SIGKILL));
        assert_eq!(signal_number("SIGWINCH"), None);
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
    }
}
