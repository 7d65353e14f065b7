// src/panel.rs - Operator panel: field validation, scale computation, action routing
use clap::ValueEnum;
use std::fmt;
use thiserror::Error;

use crate::communication::{Connector, RemoteExecutor, TransportError};
use crate::dispatch::DispatchResult;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Field '{0}' is empty")]
    MissingField(&'static str),
    #[error("Field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Total IC count must not be zero")]
    ZeroIcCount,
    #[error("Not connected; press Connect first")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The ten operator actions, one per rig operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum PanelAction {
    Connect,
    StepForward,
    StepBackward,
    TestConnection,
    TestFirstDevice,
    NextDevice,
    PreviousDevice,
    DisconnectPins,
    ReconnectPins,
    Disconnect,
}

impl PanelAction {
    pub const ALL: [PanelAction; 10] = [
        PanelAction::Connect,
        PanelAction::StepForward,
        PanelAction::StepBackward,
        PanelAction::TestConnection,
        PanelAction::TestFirstDevice,
        PanelAction::NextDevice,
        PanelAction::PreviousDevice,
        PanelAction::DisconnectPins,
        PanelAction::ReconnectPins,
        PanelAction::Disconnect,
    ];

    pub fn operation_name(self) -> &'static str {
        match self {
            PanelAction::Connect => "connect",
            PanelAction::StepForward => "step_forward",
            PanelAction::StepBackward => "step_backward",
            PanelAction::TestConnection => "test_connection",
            PanelAction::TestFirstDevice => "test_first_device",
            PanelAction::NextDevice => "next_device",
            PanelAction::PreviousDevice => "previous_device",
            PanelAction::DisconnectPins => "disconnect_pins",
            PanelAction::ReconnectPins => "reconnect_pins",
            PanelAction::Disconnect => "disconnect",
        }
    }

    /// Actions whose travel depends on the scale parameter.
    pub fn needs_scale(self) -> bool {
        matches!(
            self,
            PanelAction::StepForward
                | PanelAction::StepBackward
                | PanelAction::TestFirstDevice
                | PanelAction::NextDevice
                | PanelAction::PreviousDevice
        )
    }
}

impl fmt::Display for PanelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_name())
    }
}

/// Raw operator input, exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelFields {
    pub total_ics: String,
    pub gear_ratio: String,
    pub steps_per_rotation: String,
    pub host: String,
}

/// Parsed numeric fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleInputs {
    pub total_ics: f64,
    pub gear_ratio: f64,
    pub steps_per_rotation: f64,
}

impl ScaleInputs {
    pub fn parse(fields: &PanelFields) -> Result<Self, PanelError> {
        let inputs = Self {
            total_ics: parse_number("total_ics", &fields.total_ics)?,
            gear_ratio: parse_number("gear_ratio", &fields.gear_ratio)?,
            steps_per_rotation: parse_number("steps_per_rotation", &fields.steps_per_rotation)?,
        };
        if inputs.total_ics == 0.0 {
            return Err(PanelError::ZeroIcCount);
        }
        Ok(inputs)
    }

    /// Steps of travel per IC: steps per rotation x gear ratio / IC count.
    pub fn scale(&self) -> f64 {
        self.steps_per_rotation * self.gear_ratio / self.total_ics
    }
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, PanelError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PanelError::MissingField(field));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PanelError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelStatus {
    Idle,
    Connected,
    Running(PanelAction),
    Error,
}

pub struct ControlPanel {
    connector: Box<dyn Connector>,
    session: Option<Box<dyn RemoteExecutor>>,
    status: PanelStatus,
}

impl ControlPanel {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            session: None,
            status: PanelStatus::Idle,
        }
    }

    pub fn status(&self) -> PanelStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session to `fields.host` without running any operation.
    pub async fn open(&mut self, fields: &PanelFields) -> Result<(), PanelError> {
        let host = fields.host.trim();
        if host.is_empty() {
            return Err(PanelError::MissingField("host"));
        }
        if let Some(old) = self.session.take() {
            old.close().await;
        }
        match self.connector.connect(host).await {
            Ok(session) => {
                self.session = Some(session);
                self.status = PanelStatus::Connected;
                Ok(())
            }
            Err(e) => {
                self.status = PanelStatus::Error;
                Err(e.into())
            }
        }
    }

    /// Validate input, run `action` on the rig and report its output.
    /// Input problems are returned as errors before anything is sent; transport
    /// problems come back as a failed [`DispatchResult`].
    pub async fn invoke(
        &mut self,
        action: PanelAction,
        fields: &PanelFields,
    ) -> Result<DispatchResult, PanelError> {
        let scale = if action.needs_scale() {
            ScaleInputs::parse(fields)?.scale()
        } else {
            0.0
        };

        if action == PanelAction::Connect {
            if let Err(e) = self.open(fields).await {
                return match e {
                    PanelError::Transport(e) => Ok(DispatchResult::failure(e.to_string())),
                    other => Err(other),
                };
            }
        }

        let session = self.session.as_ref().ok_or(PanelError::NotConnected)?;
        if action == PanelAction::Disconnect {
            if let Err(e) = session.cancel().await {
                tracing::warn!("Cancel before disconnect failed: {}", e);
            }
        }

        tracing::info!("Panel action '{}' scale={}", action, scale);
        self.status = PanelStatus::Running(action);
        let result = match session.execute(action.operation_name(), scale).await {
            Ok(output) => DispatchResult {
                success: output.stderr.is_empty(),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(e) => DispatchResult::failure(e.to_string()),
        };
        self.status = if result.success { PanelStatus::Connected } else { PanelStatus::Error };

        if action == PanelAction::Disconnect {
            self.close().await;
        }
        Ok(result)
    }

    /// Interrupt whatever the rig is running.
    pub async fn stop(&self) -> Result<(), PanelError> {
        let session = self.session.as_ref().ok_or(PanelError::NotConnected)?;
        session.cancel().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.status = PanelStatus::Idle;
    }
}
