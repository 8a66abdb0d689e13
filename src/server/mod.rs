//! HTTP server exposing reads, statistics and mode control.
//!
//! - [`api`]: Route handlers and request/response types

pub mod api;
