//! HTTP client with retry semantics.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
