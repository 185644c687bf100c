//! General utility code that didn't fit anywhere else

mod tracing;
pub use tracing::TimeFormat;
pub(crate) use tracing::{
    ConsoleTraceType, is_initialized as tracing_is_initialised, setup as setup_tracing,
    trace_level,
};
