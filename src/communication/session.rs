// src/communication/session.rs - Client side of the rig server protocol
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use super::protocol::{decode_response, write_message, Request, Response};
use super::{Connector, RemoteExecutor, RemoteOutput, TransportError};
use crate::config::SessionConfig;

type PendingRequests = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Response>>>>;

fn lock_pending(pending: &PendingRequests) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Response>>> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

/// One open connection to a rig server. Requests are matched to responses by id.
pub struct RemoteSession {
    addr: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: PendingRequests,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl RemoteSession {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(TransportError::Timeout(format!("connection to {}", addr))),
        };
        let (read_half, write_half) = stream.into_split();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_responses(read_half, Arc::clone(&pending)));
        tracing::info!("Connected to rig at {}", addr);

        Ok(Self {
            addr: addr.to_string(),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            pending,
            reader,
            request_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(&self, request: Request) -> Result<Response, TransportError> {
        let id = request.id();
        let runs_operation = matches!(request, Request::Execute { .. });
        let (response_tx, response_rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, response_tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => write_message(writer, &request).await,
                None => Err(TransportError::NotConnected),
            }
        };
        if let Err(e) = sent {
            lock_pending(&self.pending).remove(&id);
            return Err(e);
        }

        match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                if runs_operation {
                    self.abandon(id).await;
                }
                Err(TransportError::Timeout(format!("response to request {}", id)))
            }
        }
    }

    /// Stop an operation whose response will no longer be awaited. The
    /// acknowledgement is dropped by the reader as a late response.
    async fn abandon(&self, id: Uuid) {
        tracing::warn!("Request {} timed out, cancelling it on the rig", id);
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            if let Err(e) = write_message(writer, &Request::cancel()).await {
                tracing::error!("Could not cancel timed out request {}: {}", id, e);
            }
        }
    }
}

async fn read_responses(read_half: OwnedReadHalf, pending: PendingRequests) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_response(&line) {
                Ok(Response { id: Some(id), result }) => match lock_pending(&pending).remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(Response { id: Some(id), result });
                    }
                    None => tracing::debug!("Dropping late response {}", id),
                },
                Ok(Response { id: None, result }) => {
                    tracing::warn!("Rig rejected a request: {}", result.stderr);
                }
                Err(e) => tracing::warn!("Unreadable response: {}", e),
            },
            Ok(None) => {
                tracing::info!("Rig closed the session");
                break;
            }
            Err(e) => {
                tracing::error!("Session read error: {}", e);
                break;
            }
        }
    }
    // Waiters see a closed channel.
    lock_pending(&pending).clear();
}

#[async_trait]
impl RemoteExecutor for RemoteSession {
    async fn execute(&self, operation: &str, scale: f64) -> Result<RemoteOutput, TransportError> {
        if !scale.is_finite() {
            return Err(TransportError::Protocol(format!("scale {} cannot be sent", scale)));
        }
        let response = self.request(Request::execute(operation, scale)).await?;
        Ok(response.result.into())
    }

    async fn cancel(&self) -> Result<(), TransportError> {
        let response = self.request(Request::cancel()).await?;
        if response.result.success {
            Ok(())
        } else {
            Err(TransportError::Protocol(response.result.stderr))
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.abort();
        tracing::info!("Disconnected from rig at {}", self.addr);
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Connects to `host` on the configured rig port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl TcpConnector {
    /// `host`, `host:port`, an IP or a socket address.
    pub fn address(&self, host: &str) -> String {
        if host.parse::<SocketAddr>().is_ok() {
            return host.to_string();
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return SocketAddr::new(ip, self.port).to_string();
        }
        if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl From<&SessionConfig> for TcpConnector {
    fn from(config: &SessionConfig) -> Self {
        Self {
            port: config.port,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn RemoteExecutor>, TransportError> {
        let addr = self.address(host);
        let session = RemoteSession::connect(&addr, self.connect_timeout, self.request_timeout).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn connector() -> TcpConnector {
        TcpConnector::from(&SessionConfig::default())
    }

    #[test]
    fn test_address_forms() {
        let c = connector();
        assert_eq!(c.address("raspberrypi.local"), "raspberrypi.local:7070");
        assert_eq!(c.address("10.0.0.5"), "10.0.0.5:7070");
        assert_eq!(c.address("10.0.0.5:9000"), "10.0.0.5:9000");
        assert_eq!(c.address("::1"), "[::1]:7070");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = connector().connect(&addr.to_string()).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let _ = lines.next_line().await;
        });

        let session = RemoteSession::connect(
            &addr.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let err = session.execute("connect", 0.0).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_timed_out_execute_sends_cancel() {
        use crate::communication::protocol::decode_request;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut seen = Vec::new();
            while seen.len() < 2 {
                match lines.next_line().await {
                    Ok(Some(line)) => seen.push(decode_request(&line).unwrap()),
                    _ => break,
                }
            }
            let _ = seen_tx.send(seen);
        });

        let session = RemoteSession::connect(
            &addr.to_string(),
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let err = session.execute("reconnect_pins", 0.0).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));

        let seen = timeout(Duration::from_secs(2), seen_rx).await.unwrap().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], Request::Execute { operation, .. } if operation == "reconnect_pins"));
        assert!(matches!(seen[1], Request::Cancel { .. }));
        assert!(lock_pending(&session.pending).is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_scale_not_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let session = RemoteSession::connect(
            &addr.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let err = session.execute("step_forward", f64::NAN).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
