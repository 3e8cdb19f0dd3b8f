//! HTTP route handlers.
//!
//! `import` carries the import entry points (direct JSON and Pub/Sub push),
//! `health` the readiness probe.

pub mod health;
pub mod import;
