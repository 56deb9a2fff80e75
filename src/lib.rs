// src/lib.rs
//! Server registrar for the multiplayer server directory.
//!
//! Game servers register their public `host:port` over HTTP; the
//! registrar pings each one over UDP on a fixed cadence, tracks liveness
//! and gameplay metadata, and serves the resulting list to game clients.
//! The probe engine lives in [`monitor`]; the HTTP routes, backup writer,
//! and process bootstrap are thin collaborators around its facade.

pub mod backup;
pub mod config;
pub mod handlers;
pub mod models;
pub mod monitor;
pub mod utils;
