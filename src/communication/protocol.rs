//! Newline-delimited JSON messages exchanged between a session and the rig server.
//!
//! ```text
//! -> {"type":"execute","id":"6c1f…","operation":"step_forward","scale":5.0}
//! <- {"id":"6c1f…","stdout":"step_forward: motor2 forward 10 steps\n…","stderr":"","success":true}
//! -> {"type":"cancel","id":"91aa…"}
//! <- {"id":"91aa…","stdout":"cancel requested","stderr":"","success":true}
//! ```
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::TransportError;
use crate::dispatch::DispatchResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Execute {
        id: Uuid,
        operation: String,
        scale: f64,
    },
    Cancel {
        id: Uuid,
    },
}

impl Request {
    pub fn execute(operation: &str, scale: f64) -> Self {
        Request::Execute {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            scale,
        }
    }

    pub fn cancel() -> Self {
        Request::Cancel { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Request::Execute { id, .. } | Request::Cancel { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Absent when the request could not be decoded.
    pub id: Option<Uuid>,
    #[serde(flatten)]
    pub result: DispatchResult,
}

impl Response {
    pub fn new(id: Uuid, result: DispatchResult) -> Self {
        Self { id: Some(id), result }
    }

    pub fn malformed(reason: String) -> Self {
        Self {
            id: None,
            result: DispatchResult::failure(reason),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, TransportError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_request(line: &str) -> Result<Request, TransportError> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn decode_response(line: &str) -> Result<Response, TransportError> {
    Ok(serde_json::from_str(line.trim())?)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
