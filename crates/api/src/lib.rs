//! HTTP API: configuration, session middleware, routing and request mapping.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
