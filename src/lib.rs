//! A small simulated computer: a toy CPU, an interrupt-driven kernel with
//! three scheduling policies, partitioned memory and a block device carrying
//! its own filesystem and swap space.

pub mod config;
pub mod error;
pub mod io;
pub mod kernel;

pub use config::KernelConfig;
pub use error::KernelError;
pub use kernel::{Kernel, Tick};
