// src/models/server.rs
use serde::{Deserialize, Serialize};

/// Public view of one registered server, as returned by `GET /servers`.
/// A value snapshot; holding one never touches the monitor's lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicServerInfo {
    pub addr: String,
    pub name: String,
    pub players: u64,
    pub rooms: u64,
    pub version: String,
    pub missed_pings: u32,
}
