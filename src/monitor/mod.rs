// src/monitor/mod.rs
//
// The probe engine. Owns the authoritative table of registered game
// servers, pings each one over the shared UDP socket, ingests replies,
// and tracks liveness. HTTP handlers and the backup writer only ever see
// the narrow facade on `Monitor`; every internal field stays behind one
// exclusive lock.

pub mod packet;
mod probe;

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::{debug, error, info};
use rand::Rng;
use regex::Regex;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::models::server::PublicServerInfo;
use packet::{ServerGetStatus, ServerStatus};

lazy_static! {
    // [0-9] rather than \d: the regex crate's \d is Unicode-wide, and the
    // frozen grammar only admits ASCII digits.
    static ref HOST_AND_PORT_RE: Regex = Regex::new(r"^[^:]+:[1-9][0-9]*$").unwrap();
}

/// `host:port` with a colon-free host and a positive decimal port with
/// no leading zero. IPv6 literals are not accepted.
pub fn valid_host_and_port(host_and_port: &str) -> bool {
    HOST_AND_PORT_RE.is_match(host_and_port)
}

/// Timing knobs for the probe engine. The defaults are the production
/// values and are frozen alongside the wire protocol; tests shrink them.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Interval between probe passes over the table.
    pub delay_interval: Duration,
    /// Read deadline on the shared socket; bounds shutdown latency.
    pub packet_read_timeout: Duration,
    /// How long an in-flight nonce may wait for its reply.
    pub ping_timeout: Duration,
    /// Missed pings in a row before a server counts as down.
    pub max_missed_pings: u32,
    /// How many recent round trip times feed the average ping.
    pub max_rtts: usize,
    /// Missed pings in a row before delisting; the server must re-register.
    pub missed_pings_to_delist: u32,
    /// One Ethernet MTU minus headers; larger datagrams are truncated.
    pub max_packet_size: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            delay_interval: Duration::from_secs(5),
            packet_read_timeout: Duration::from_millis(500),
            ping_timeout: Duration::from_millis(750),
            max_missed_pings: 4,
            max_rtts: 30,
            missed_pings_to_delist: 3000,
            max_packet_size: 1448,
        }
    }
}

#[derive(Debug)]
pub enum AddServerError {
    /// The supplied address does not match the `host:port` grammar.
    InvalidAddress,
    /// Name resolution failed for the supplied `host:port`.
    Resolve(io::Error),
    /// The address resolved to a non-global IP and policy forbids those.
    SpecialIp(IpAddr),
}

impl fmt::Display for AddServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "invalid server address; expected host, then colon, then port"),
            Self::Resolve(e) => write!(f, "failed to resolve server name: {}", e),
            Self::SpecialIp(ip) => write!(f, "IP type is not allowed: {}", ip),
        }
    }
}

impl Error for AddServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolve(e) => Some(e),
            Self::InvalidAddress | Self::SpecialIp(_) => None,
        }
    }
}

/// Per-server state. Mutated only by the probe pass, the reply handler,
/// and `add_server`, all under the table lock.
struct ServerRecord {
    resolved_addr: SocketAddr,
    /// Probe nonces awaiting a reply, mapped to their send times.
    in_flight: HashMap<u64, Instant>,
    /// Recent round trip times, newest at the tail.
    rtts: VecDeque<Duration>,
    missed_pings: u32,
    server_version: String,
    player_count: u64,
    room_count: u64,
    server_name: String,
}

impl ServerRecord {
    fn new(resolved_addr: SocketAddr, missed_pings: u32) -> Self {
        Self {
            resolved_addr,
            in_flight: HashMap::new(),
            rtts: VecDeque::new(),
            missed_pings,
            server_version: String::new(),
            player_count: 0,
            room_count: 0,
            server_name: String::new(),
        }
    }

    /// Average of the recorded round trip times, or `None` before the
    /// first matched reply.
    fn avg_ping(&self) -> Option<Duration> {
        if self.rtts.is_empty() {
            return None;
        }
        let sum: Duration = self.rtts.iter().sum();
        Some(sum / self.rtts.len() as u32)
    }

    fn record_rtt(&mut self, rtt: Duration, max_rtts: usize) {
        self.rtts.push_back(rtt);
        while self.rtts.len() > max_rtts {
            self.rtts.pop_front();
        }
    }

    /// Drops in-flight entries older than `ping_timeout`, counting each
    /// as a missed ping. Returns true once the record has crossed the
    /// delisting threshold.
    fn reap_expired(&mut self, now: Instant, ping_timeout: Duration, delist_after: u32) -> bool {
        let missed = &mut self.missed_pings;
        self.in_flight.retain(|_, sent| {
            if now.duration_since(*sent) > ping_timeout {
                *missed += 1;
                false
            } else {
                true
            }
        });
        *missed > delist_after
    }
}

/// Both indices move together: a registered address is present in
/// `by_addr` exactly when its resolved socket address maps back to it in
/// `by_sock`.
#[derive(Default)]
struct ServerTable {
    by_addr: HashMap<String, ServerRecord>,
    by_sock: HashMap<SocketAddr, String>,
}

impl ServerTable {
    fn insert(&mut self, server_addr: String, record: ServerRecord) {
        self.by_sock
            .insert(record.resolved_addr, server_addr.clone());
        self.by_addr.insert(server_addr, record);
    }

    fn remove(&mut self, server_addr: &str) {
        if let Some(record) = self.by_addr.remove(server_addr) {
            self.by_sock.remove(&record.resolved_addr);
        }
    }
}

pub struct Monitor {
    table: Mutex<ServerTable>,
    allow_special_ips: bool,
    settings: ProbeSettings,
}

impl Monitor {
    pub fn new(allow_special_ips: bool) -> Self {
        Self::with_settings(allow_special_ips, ProbeSettings::default())
    }

    pub fn with_settings(allow_special_ips: bool, settings: ProbeSettings) -> Self {
        Self {
            table: Mutex::new(ServerTable::default()),
            allow_special_ips,
            settings,
        }
    }

    /// Registers a server under its `host:port` string. Resolution happens
    /// once, here; the probe loops only ever use the resolved address.
    /// Re-registering an existing address is a no-op.
    pub async fn add_server(&self, server_addr: &str) -> Result<(), AddServerError> {
        if !valid_host_and_port(server_addr) {
            return Err(AddServerError::InvalidAddress);
        }
        let resolved = tokio::net::lookup_host(server_addr)
            .await
            .map_err(AddServerError::Resolve)?
            .next()
            .ok_or_else(|| {
                AddServerError::Resolve(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;

        if !self.allow_special_ips && is_special_ip(resolved.ip()) {
            return Err(AddServerError::SpecialIp(resolved.ip()));
        }

        let mut table = self.table.lock().await;
        if table.by_addr.contains_key(server_addr) {
            // Already present
            return Ok(());
        }
        // Down until the first reply proves otherwise.
        let record = ServerRecord::new(resolved, self.settings.max_missed_pings + 1);
        table.insert(server_addr.to_string(), record);
        debug!("registered server {} ({})", server_addr, resolved);
        Ok(())
    }

    /// Snapshot of the public info for listed servers. Servers that are
    /// down are omitted unless `show_all` is set. Order is unspecified.
    pub async fn list_servers(&self, show_all: bool) -> Vec<PublicServerInfo> {
        let table = self.table.lock().await;
        table
            .by_addr
            .iter()
            .filter(|(_, record)| show_all || record.missed_pings <= self.settings.max_missed_pings)
            .map(|(server_addr, record)| PublicServerInfo {
                addr: server_addr.clone(),
                name: record.server_name.clone(),
                players: record.player_count,
                rooms: record.room_count,
                version: record.server_version.clone(),
                missed_pings: record.missed_pings,
            })
            .collect()
    }

    /// All registered addresses, including down servers; feeds the backup.
    pub async fn list_server_addresses(&self) -> Vec<String> {
        let table = self.table.lock().await;
        table.by_addr.keys().cloned().collect()
    }

    /// One probe pass over the table: ping every server, then reap
    /// expired in-flight entries and delist servers past the threshold.
    /// The lock is held for the whole pass so a reply is either matched
    /// or already counted as missed, never both.
    pub(crate) async fn probe_pass(&self, conn: &UdpSocket) {
        let mut table = self.table.lock().await;
        let mut delisted = Vec::new();

        for (server_addr, record) in table.by_addr.iter_mut() {
            let probe = ServerGetStatus {
                nonce: rand::thread_rng().gen(),
            };
            debug!("pinging {}", server_addr);
            if let Err(e) = conn.send_to(&probe.encode(), record.resolved_addr).await {
                error!("failed to send GetStatus to {}: {}", server_addr, e);
                continue;
            }
            // Remember the nonce and send time for reply correlation.
            record.in_flight.insert(probe.nonce, Instant::now());

            if record.reap_expired(
                Instant::now(),
                self.settings.ping_timeout,
                self.settings.missed_pings_to_delist,
            ) {
                delisted.push(server_addr.clone());
            }
        }

        if !delisted.is_empty() {
            info!("delisting servers: {:?}", delisted);
            for server_addr in &delisted {
                table.remove(server_addr);
            }
        }
    }

    /// Handles one reply datagram. Any reply from a known server counts
    /// as liveness even when the nonce no longer matches.
    pub(crate) async fn handle_status_datagram(&self, remote: SocketAddr, buf: &[u8]) {
        let mut table = self.table.lock().await;

        let server_addr = match table.by_sock.get(&remote) {
            Some(addr) => addr.clone(),
            None => {
                error!("dropping packet from unknown origin {}", remote);
                return;
            }
        };
        let record = match table.by_addr.get_mut(&server_addr) {
            Some(record) => record,
            None => {
                error!("no record for server {}", server_addr);
                return;
            }
        };
        record.missed_pings = 0;

        let status = match ServerStatus::decode(buf) {
            Ok(status) => status,
            Err(e) => {
                error!("failed to decode Status from {}: {}", server_addr, e);
                return;
            }
        };
        debug!("received Status from {}: {:?}", server_addr, status);

        let sent = match record.in_flight.remove(&status.nonce) {
            Some(sent) => sent,
            None => {
                error!(
                    "unrecognized nonce {:#x} from {}",
                    status.nonce, server_addr
                );
                return;
            }
        };
        record.record_rtt(sent.elapsed(), self.settings.max_rtts);
        if let Some(ping) = record.avg_ping() {
            debug!("{} average ping {:?}", server_addr, ping);
        }

        record.server_version = status.server_version;
        record.player_count = status.player_count;
        record.room_count = status.room_count;
        record.server_name = status.server_name;
    }
}

/// True for addresses that are not normal globally routable unicast:
/// loopback, link-local, multicast, unspecified, private space, and
/// friends. Registration rejects these unless `allowSpecialIPs` is set.
pub fn is_special_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_private()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || v6.is_unicast_link_local()
                || v6.is_unique_local()
        }
    }
}
