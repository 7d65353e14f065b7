// src/communication/mod.rs - Remote execution boundary between panel and rig host
pub mod protocol;
pub mod server;
pub mod session;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatch::{DispatchResult, Dispatcher};

pub use server::RigServer;
pub use session::{RemoteSession, TcpConnector};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Session closed by peer")]
    Closed,
    #[error("Not connected")]
    NotConnected,
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Protocol(e.to_string())
    }
}

/// The two text streams an operation produced on the rig host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
}

impl From<DispatchResult> for RemoteOutput {
    fn from(result: DispatchResult) -> Self {
        Self {
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }
}

/// "Execute operation O with parameter P on the actuator host."
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, operation: &str, scale: f64) -> Result<RemoteOutput, TransportError>;
    /// Interrupt whatever the host is running.
    async fn cancel(&self) -> Result<(), TransportError>;
    async fn close(&self);
}

/// Opens executor sessions to a host.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn RemoteExecutor>, TransportError>;
}

/// Executes on a dispatcher in this process.
#[derive(Clone)]
pub struct LocalExecutor {
    dispatcher: Arc<Dispatcher>,
}

impl LocalExecutor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn execute(&self, operation: &str, scale: f64) -> Result<RemoteOutput, TransportError> {
        let outcome = self
            .dispatcher
            .dispatch_blocking(operation.to_string(), scale)
            .await;
        Ok(DispatchResult::from_outcome(outcome).into())
    }

    async fn cancel(&self) -> Result<(), TransportError> {
        self.dispatcher.cancel();
        Ok(())
    }

    async fn close(&self) {}
}

#[async_trait]
impl Connector for LocalExecutor {
    async fn connect(&self, _host: &str) -> Result<Box<dyn RemoteExecutor>, TransportError> {
        Ok(Box::new(self.clone()))
    }
}
