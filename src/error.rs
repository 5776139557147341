use thiserror::Error;

use crate::config::ConfigError;
use crate::kernel::interrupt::EventError;
use crate::kernel::long_term_scheduler::LoaderError;

/// Failures that reach the kernel's caller. Process faults never show up
/// here: they terminate the process and are reported through the log sink.
#[derive(Debug, Error)]
pub enum KernelError {
    /// An interrupt without a handler was delivered. The kernel is down.
    #[error("fatal trap: {0}")]
    Trap(String),
    #[error("kernel is shut down")]
    Halted,
    #[error("{0}")]
    Refused(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Load(#[from] LoaderError),
}
