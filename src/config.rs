// src/config.rs
use clap::{ArgAction, Parser};
use governor::Quota;
use std::num::NonZeroU32;

const MAX_SERVER_LISTS_PER_SEC_PER_IP: u32 = 30;
const MAX_SERVER_ADDS_PER_SEC_PER_IP: u32 = 10;

/// Command-line configuration. Boolean flags take an explicit value
/// (`--devMode false`) so the production defaults can be true.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "registrar",
    about = "Game server registrar: HTTP registration, UDP liveness probing, server discovery"
)]
pub struct Config {
    /// Whether to run in development mode (debug-level logging)
    #[arg(long = "devMode", default_value_t = true, action = ArgAction::Set)]
    pub dev_mode: bool,

    /// Whether unusual (not global or not unicast) IPs are allowed;
    /// don't set to true in production
    #[arg(long = "allowSpecialIPs", default_value_t = false, action = ArgAction::Set)]
    pub allow_special_ips: bool,

    /// Whether to trust X-Forwarded-For; must be true with a reverse
    /// proxy (nginx etc.); must be false otherwise
    #[arg(long = "useProxyHeaders", default_value_t = true, action = ArgAction::Set)]
    pub use_proxy_headers: bool,

    /// Backup file to save and restore to; disabled if empty
    #[arg(long = "backupFile", default_value = "backup.jsonl")]
    pub backup_file: String,
}

impl Config {
    pub fn server_list_quota(&self) -> Quota {
        Quota::per_second(NonZeroU32::new(MAX_SERVER_LISTS_PER_SEC_PER_IP).unwrap())
    }

    pub fn server_add_quota(&self) -> Quota {
        Quota::per_second(NonZeroU32::new(MAX_SERVER_ADDS_PER_SEC_PER_IP).unwrap())
    }
}
