//! Shared tracing bootstrap for the pulse binaries.

mod tracing;

pub use crate::tracing::{LogFormat, init_tracing, try_init_tracing};
