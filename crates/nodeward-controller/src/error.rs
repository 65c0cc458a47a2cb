//! Controller error types.

use nodeward_panel::PanelError;

use crate::cert::CertError;
use crate::engine::EngineError;

/// Controller error type.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("panel: {0}")]
    Panel(#[from] PanelError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("certificate: {0}")]
    Cert(#[from] CertError),

    #[error("config: {0}")]
    Config(String),

    #[error("controller is {0}")]
    InvalidState(&'static str),
}
