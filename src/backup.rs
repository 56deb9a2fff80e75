// src/backup.rs
//
// Persistence collaborator: the registration set survives a restart as a
// newline-delimited JSON file, one `{"addr":"host:port"}` object per
// line. Probe state is deliberately not persisted; restored servers are
// down until they answer a probe.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::time;

use crate::monitor::Monitor;

const BACKUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct BackedUpServer {
    addr: String,
}

/// Replays a backup through `add_server`. Each line resolves serially,
/// so a long list can take a while; callers run this concurrently with
/// the probe loops.
pub async fn load_from_file(monitor: Arc<Monitor>, path: &str) {
    let started = Instant::now();
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no backup file at {}; starting with an empty table", path);
            return;
        }
        Err(e) => {
            error!("failed to open backup file {} for loading: {}", path, e);
            return;
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut restored = 0u32;
    let mut line_no = 0u32;
    loop {
        line_no += 1;
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("error while reading backup file {}: {}", path, e);
                break;
            }
        };
        let entry: BackedUpServer = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                error!("bad line {} in backup file {}: {}", line_no, path, e);
                break;
            }
        };
        if let Err(e) = monitor.add_server(&entry.addr).await {
            warn!("skipping backed-up server {}: {}", entry.addr, e);
            continue;
        }
        restored += 1;
    }
    info!(
        "restored {} servers from {} in {:?}",
        restored,
        path,
        started.elapsed()
    );
}

/// Periodically writes the registration set to `path`. Failed writes are
/// logged and skipped; a partial write can never clobber the previous
/// good backup because the data lands in a temp file that is renamed
/// over the target only once fully written.
pub async fn backup_to_file(monitor: Arc<Monitor>, path: String, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval_at(
        time::Instant::now() + BACKUP_INTERVAL,
        BACKUP_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {}
        }
        match write_backup(&monitor, &path).await {
            Ok(count) => info!("backed up {} servers to {}", count, path),
            Err(e) => error!("failed to write backup to {}: {}", path, e),
        }
    }
}

async fn write_backup(monitor: &Monitor, path: &str) -> std::io::Result<usize> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let target = Path::new(path);
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target.with_file_name(format!(".{}.new{}", file_name, nanos));

    let mut file = fs::File::create(&temp_path).await?;
    let addrs = monitor.list_server_addresses().await;
    let count = addrs.len();
    for addr in addrs {
        let mut line = serde_json::to_vec(&BackedUpServer { addr })?;
        line.push(b'\n');
        file.write_all(&line).await?;
    }
    file.flush().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("registrar-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn backup_then_restore_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("servers.jsonl");
        let path = path.to_str().unwrap().to_string();

        let monitor = Arc::new(Monitor::new(true));
        monitor.add_server("127.0.0.1:2016").await.unwrap();
        monitor.add_server("127.0.0.1:2017").await.unwrap();
        assert_eq!(write_backup(&monitor, &path).await.unwrap(), 2);

        let restored = Arc::new(Monitor::new(true));
        load_from_file(Arc::clone(&restored), &path).await;
        let mut addrs = restored.list_server_addresses().await;
        addrs.sort();
        assert_eq!(addrs, vec!["127.0.0.1:2016", "127.0.0.1:2017"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn restore_skips_bad_servers_and_keeps_good_ones() {
        let dir = scratch_dir("skips");
        let path = dir.join("servers.jsonl");
        std::fs::write(
            &path,
            "{\"addr\":\"127.0.0.1:2016\"}\n{\"addr\":\"no port here\"}\n{\"addr\":\"127.0.0.1:2017\"}\n",
        )
        .unwrap();

        let monitor = Arc::new(Monitor::new(true));
        load_from_file(Arc::clone(&monitor), path.to_str().unwrap()).await;
        let mut addrs = monitor.list_server_addresses().await;
        addrs.sort();
        assert_eq!(addrs, vec!["127.0.0.1:2016", "127.0.0.1:2017"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_backup_file_is_not_an_error() {
        let monitor = Arc::new(Monitor::new(true));
        load_from_file(Arc::clone(&monitor), "/nonexistent/backup.jsonl").await;
        assert!(monitor.list_server_addresses().await.is_empty());
    }
}
