use std::fmt;

use thiserror::Error;

/// The external collaborator a failed call was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Transcription,
    Analysis,
    Backend,
    Synthesis,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Transcription => "transcription",
            Service::Analysis => "analysis",
            Service::Backend => "backend",
            Service::Synthesis => "synthesis",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum VoiceGateError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("{service} service error: {message}")]
    ExternalService { service: Service, message: String },

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Worker pool saturated ({capacity} units admitted)")]
    PoolSaturated { capacity: usize },

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoiceGateError {
    pub fn transcription(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: Service::Transcription,
            message: message.into(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: Service::Analysis,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: Service::Backend,
            message: message.into(),
        }
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: Service::Synthesis,
            message: message.into(),
        }
    }

    /// Short machine-readable label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::ExternalService { .. } => "external_service",
            Self::Delivery(_) => "delivery",
            Self::Connection(_) => "connection",
            Self::PoolSaturated { .. } => "pool_saturated",
            Self::PoolClosed => "pool_closed",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }

    /// Which collaborator failed, if this is an external service error.
    pub fn service(&self) -> Option<Service> {
        match self {
            Self::ExternalService { service, .. } => Some(*service),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceGateError>;
