//! HTTP API: job status, cancellation, result download and live event streams.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
