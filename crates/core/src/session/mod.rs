//! Authenticated sessions against console management servers.

pub mod client;

pub use client::{ApiClient, ApiResponse, Session};
