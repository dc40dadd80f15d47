//! lsh daemon library
//!
//! The `lshd` binary lives in `main.rs`; this library exposes the
//! daemon service and the IPC protocol so the `lsh` CLI can speak to a
//! running daemon.

pub mod audit;
pub mod daemon;
pub mod http;
pub mod ipc;
pub mod lifecycle;
pub mod protocol;

pub use audit::{AuditEvent, AuditLogger};
pub use daemon::{DaemonStatus, JobDaemon, TriggerResult};
pub use protocol::{ErrorBody, JobFilter, Op, ProtocolError, Request, Response};
