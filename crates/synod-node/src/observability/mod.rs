//! # Observability Module
//!
//! Structured logging for the `synod` binary. Every role logs through
//! `tracing` with key/value fields (`round`, `phase`, `num`, `responders`,
//! ...); this module installs the subscriber that renders them.
//!
//! ```rust,ignore
//! use synod_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//! ```

mod logging;

pub use logging::{init_logging, LogFormat};
