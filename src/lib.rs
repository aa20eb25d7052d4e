//! Resilient loading of KNX project files.
//!
//! A project file is parsed in an isolated local worker, falling back to a
//! remote parse service when the local attempt cannot handle it. The parsed
//! model is then slimmed down by moving heavy device and graph data into an
//! on-disk cache that detail views read back on demand.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod worker;
