//! Error types surfaced at the core's API boundary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScopeError>;

#[derive(Error, Debug)]
pub enum ScopeError {
    /// A DAC or trigger target outside the reference range
    #[error("voltage {volts:.3} V outside [{min}, {max}] V")]
    VoltageOutOfRange { volts: f32, min: f32, max: f32 },
    /// A configuration value the hardware can't honor
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A collaborator peripheral refused an operation
    #[error("peripheral error: {0}")]
    Peripheral(String),
    /// A core run loop thread could not be started
    #[error("failed to spawn core thread: {0}")]
    Spawn(#[from] std::io::Error),
}
