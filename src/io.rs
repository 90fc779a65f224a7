//! File I/O substrate: the queued engine, record framing, text encoding and
//! glob expansion.

pub mod engine;
pub mod glob;
pub mod record;
pub mod text;
