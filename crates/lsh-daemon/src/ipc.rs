//! Unix-domain-socket control plane.
//!
//! One accept loop; one task per connection; each connection carries a
//! sequence of length-prefixed request/response frames.

use std::sync::Arc;

use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use lsh_core::{Error, METRICS};

use crate::daemon::JobDaemon;
use crate::protocol::{self, Op, ProtocolError, Request, Response};

/// The IPC server; owns the bound listener.
pub struct IpcServer {
    listener: UnixListener,
    daemon: Arc<JobDaemon>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, daemon: Arc<JobDaemon>) -> Self {
        IpcServer { listener, daemon }
    }

    /// Accept connections until the daemon shuts down.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let daemon = Arc::clone(&self.daemon);
                            tokio::spawn(handle_connection(stream, daemon));
                        }
                        Err(e) => {
                            warn!(error = %e, "ipc accept failed");
                        }
                    }
                }
                _ = shutdown_watch(&self.daemon) => {
                    debug!("ipc listener closing");
                    break;
                }
            }
        }
    }
}

async fn shutdown_watch(daemon: &Arc<JobDaemon>) {
    while !daemon.is_shutting_down() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

async fn handle_connection(mut stream: UnixStream, daemon: Arc<JobDaemon>) {
    loop {
        let frame = match protocol::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(ProtocolError::ConnectionClosed) => return,
            Err(e) => {
                debug!(error = %e, "ipc read failed; dropping connection");
                return;
            }
        };
        let request: Request = match protocol::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "undecodable ipc request; dropping connection");
                return;
            }
        };
        METRICS.inc_ipc_requests();

        let response = dispatch(&daemon, &request).await;
        let bytes = match protocol::encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode ipc response");
                return;
            }
        };
        if protocol::write_frame(&mut stream, &bytes).await.is_err() {
            return;
        }
    }
}

/// Map one request to a daemon operation.
pub async fn dispatch(daemon: &Arc<JobDaemon>, request: &Request) -> Response {
    // Requests racing a shutdown get a deterministic error instead of a
    // half-applied operation; shutdown itself must still go through.
    if daemon.is_shutting_down()
        && !matches!(request.op, Op::GetStatus | Op::StopDaemon | Op::RestartDaemon)
    {
        return Response::failure(&request.id, &Error::ServiceShutdown);
    }

    let result = run_op(daemon, &request.op).await;
    match result {
        Ok(value) => Response::success(&request.id, value),
        Err(error) => Response::failure(&request.id, &error),
    }
}

async fn run_op(daemon: &Arc<JobDaemon>, op: &Op) -> lsh_core::Result<serde_json::Value> {
    match op {
        Op::GetStatus => to_value(daemon.status()),
        Op::ListJobs { filter } => to_value(daemon.list_jobs(filter.as_ref())),
        Op::GetJob { id } => to_value(daemon.get_job(id)?),
        Op::CreateJob { spec } => to_value(daemon.create_job(spec.clone()).await?),
        Op::StartJob { id } => to_value(daemon.start_job(id).await?),
        Op::StopJob { id, signal } => to_value(daemon.stop_job(id, signal.clone()).await?),
        Op::TriggerJob { id } => to_value(daemon.trigger_job(id).await?),
        Op::RemoveJob { id, force } => to_value(daemon.remove_job(id, *force).await?),
        Op::PauseJob { id } => to_value(daemon.pause_job(id).await?),
        Op::ResumeJob { id } => to_value(daemon.resume_job(id).await?),
        Op::GetJobHistory { job_id, limit } => {
            to_value(daemon.get_history(job_id.as_ref(), limit.unwrap_or(20)))
        }
        Op::GetJobStatistics { job_id } => {
            let stats = daemon.get_statistics(job_id.as_ref())?;
            match job_id {
                Some(_) => to_value(&stats[0]),
                None => to_value(stats),
            }
        }
        Op::StopDaemon => {
            daemon.begin_shutdown(false);
            Ok(json!({"stopping": true}))
        }
        Op::RestartDaemon => {
            daemon.begin_shutdown(true);
            Ok(json!({"restarting": true}))
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> lsh_core::Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::StorageFailure(e.to_string()))
}

/// Typed helper used by tests and the CLI client crate: issue one op on
/// a fresh connection.
pub async fn call(
    stream: &mut UnixStream,
    request: &Request,
) -> Result<Response, ProtocolError> {
    let bytes = protocol::encode(request)?;
    protocol::write_frame(stream, &bytes).await?;
    let frame = protocol::read_frame(stream).await?;
    protocol::decode(&frame)
}
