//! Utility functions shared by the library, its binaries and tests

pub mod logging;

pub use logging::init_tracing;
