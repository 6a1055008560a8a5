//! General utility code that didn't fit anywhere else
//!
//! Note that most of this module is not exported.
// (c) 2024 Ross Younger

pub mod stats;

mod tracing;
pub use tracing::TimeFormat;
pub(crate) use tracing::{
    LogSink, is_initialized as tracing_is_initialised, session_span, setup as setup_tracing,
    trace_level,
};

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod test_protocol;
