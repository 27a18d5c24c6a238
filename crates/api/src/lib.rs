//! # Trace App
//!
//! Process wiring and the IPC surface: application context construction,
//! the named service set, method handlers and the NDJSON server loop. The
//! `trace` binary is a thin shell over this library.

pub mod context;
pub mod handlers;
pub mod ipc;
pub mod services;
