//! Background sessions for transports.
//!
//! The session runs on its own task and writes progress into a bounded
//! channel; the transport drains the receiver and awaits the handle for the
//! outcome. Concurrent sessions only share the agent's stores.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::progress::ProgressUpdate;
use super::session::SuspendedSession;
use super::{Agent, AgentOutcome, QueryRequest};

pub type SessionHandle = (mpsc::Receiver<ProgressUpdate>, JoinHandle<AgentOutcome>);

pub fn spawn_session(agent: Arc<Agent>, request: QueryRequest, capacity: usize) -> SessionHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move { agent.run(&request, &tx).await });
    (rx, handle)
}

pub fn spawn_resume(agent: Arc<Agent>, suspended: SuspendedSession, capacity: usize) -> SessionHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move { agent.resume(suspended, &tx).await });
    (rx, handle)
}
