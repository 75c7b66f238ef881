//! # CAR Mirror HTTP
//!
//! CAR Mirror over HTTP: an axum router that exposes a [`Provider`] and a
//! reqwest-based [`HttpTransport`] that talks to one.
//!
//! [`Provider`]: carmirror_sync::Provider

pub mod client;
pub mod server;

pub use client::HttpTransport;
pub use server::{router, serve, status_code, ApiError, CBOR_CONTENT_TYPE};
