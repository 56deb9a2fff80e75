// src/monitor/probe.rs
//
// The two I/O loops that drive the probe engine. Both share one UDP
// socket: the sender writes GetStatus probes on a fixed cadence, the
// receiver reads replies under a short deadline and hands each datagram
// to a short-lived task. State transitions live in `monitor::mod`.

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use log::{debug, error};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time;

use super::Monitor;

impl Monitor {
    /// Probe sender. Runs one `probe_pass` per tick until the shutdown
    /// signal flips. The first pass happens a full interval after start.
    pub async fn send_loop(
        self: Arc<Self>,
        conn: Arc<UdpSocket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let period = self.settings.delay_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("probe sender exiting");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.probe_pass(&conn).await;
        }
    }

    /// Reply receiver. Read deadlines keep the loop responsive to
    /// shutdown; a timeout is routine, any other socket error is fatal
    /// and propagates so the rest of the process winds down.
    pub async fn recv_loop(
        self: Arc<Self>,
        conn: Arc<UdpSocket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let mut buf = vec![0u8; self.settings.max_packet_size];
        loop {
            let read = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("reply receiver exiting");
                    return Ok(());
                }
                read = time::timeout(self.settings.packet_read_timeout, conn.recv_from(&mut buf)) => read,
            };
            let (n, remote) = match read {
                // Read deadline expired; go around again.
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    error!("reply receiver exiting due to socket error: {}", e);
                    return Err(e);
                }
                Ok(Ok(got)) => got,
            };
            if n == 0 {
                continue;
            }

            // The datagram is handed off, so it gets its own buffer.
            let datagram = buf[..n].to_vec();
            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                // Fault barrier: a bad packet must never crash the process.
                let handler =
                    AssertUnwindSafe(monitor.handle_status_datagram(remote, &datagram));
                if let Err(panic) = handler.catch_unwind().await {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!("recovered from panic while processing packet: {}", msg);
                }
            });
        }
    }
}
