// src/communication/server.rs - TCP endpoint that runs operations on the rig host
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::protocol::{decode_request, write_message, Request, Response};
use super::TransportError;
use crate::dispatch::{DispatchResult, Dispatcher};

/// Accepts panel sessions and feeds their requests to one dispatcher.
pub struct RigServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl RigServer {
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { listener, dispatcher })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve sessions until `shutdown` resolves. A running operation is
    /// interrupted on shutdown.
    pub async fn run<F>(self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Rig server listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Rig server shutting down");
                    if self.dispatcher.is_busy() {
                        self.dispatcher.cancel();
                    }
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("Session opened from {}", peer);
                        let dispatcher = Arc::clone(&self.dispatcher);
                        tokio::spawn(async move {
                            if let Err(e) = serve_session(stream, dispatcher).await {
                                tracing::warn!("Session {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept failed: {}", e),
                }
            }
        }
        Ok(())
    }
}

async fn serve_session(stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<(), TransportError> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = stream.into_split();
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            if let Err(e) = write_message(&mut write_half, &response).await {
                tracing::error!("Write to session failed: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match decode_request(&line) {
            Ok(Request::Execute { id, operation, scale }) => {
                tracing::debug!("{} -> execute '{}' scale={}", peer, operation, scale);
                let dispatcher = Arc::clone(&dispatcher);
                let response_tx = response_tx.clone();
                tokio::spawn(async move {
                    let outcome = dispatcher.dispatch_blocking(operation, scale).await;
                    if let Err(e) = &outcome {
                        tracing::warn!("Operation failed: {}", e);
                    }
                    let _ = response_tx.send(Response::new(id, DispatchResult::from_outcome(outcome)));
                });
            }
            Ok(Request::Cancel { id }) => {
                dispatcher.cancel();
                let ack = DispatchResult::completed("cancel requested".to_string());
                let _ = response_tx.send(Response::new(id, ack));
            }
            Err(e) => {
                tracing::warn!("Malformed request from {}: {}", peer, e);
                let _ = response_tx.send(Response::malformed(e.to_string()));
            }
        }
    }

    tracing::info!("Session {} closed", peer);
    drop(response_tx);
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::hardware::sim::SimulatedBackend;
    use crate::scheduler::InstantClock;
    use crate::communication::protocol::decode_response;
    use tokio::io::AsyncWriteExt;

    async fn spawn_server() -> SocketAddr {
        let dispatcher = Dispatcher::from_config(
            &RigConfig::default(),
            Box::new(SimulatedBackend::new()),
            Arc::new(InstantClock::new()),
        )
        .unwrap();
        let server = RigServer::bind("127.0.0.1:0", Arc::new(dispatcher)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(std::future::pending()));
        addr
    }

    #[tokio::test]
    async fn test_malformed_line_gets_error_response() {
        let addr = spawn_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"hello\n").await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response = decode_response(&line).unwrap();
        assert_eq!(response.id, None);
        assert!(!response.result.success);
        assert!(response.result.stderr.contains("Protocol error"));
    }

    #[tokio::test]
    async fn test_unknown_operation_reported_on_stderr() {
        let addr = spawn_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let request = Request::execute("launch", 0.0);
        write_message(&mut write_half, &request).await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response = decode_response(&line).unwrap();
        assert_eq!(response.id, Some(request.id()));
        assert_eq!(response.result.stderr, "Unknown operation 'launch'");
    }
}
