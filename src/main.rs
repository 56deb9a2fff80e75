// src/main.rs
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use registrar::backup;
use registrar::config::Config;
use registrar::handlers;
use registrar::monitor::Monitor;
use registrar::utils::RateLimiters;

const HTTP_ADDR: &str = "127.0.0.1:8000";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();
    let default_filter = if config.dev_mode { "debug" } else { "info" };
    env_logger::init_from_env(Env::default().default_filter_or(default_filter));

    let monitor = Arc::new(Monitor::new(config.allow_special_ips));

    let conn = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
    let udp_addr = conn.local_addr()?;

    let (shutdown_tx, _) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Ctrl-C flips the shutdown signal for every core task.
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down...");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    // Restoring resolves each server serially, so it runs alongside the
    // probe loops rather than delaying startup.
    if !config.backup_file.is_empty() {
        let monitor = Arc::clone(&monitor);
        let path = config.backup_file.clone();
        tokio::spawn(async move {
            backup::load_from_file(monitor, &path).await;
        });
    }

    // Core task group: probe sender, reply receiver, periodic backup.
    // The first fatal error flips the shutdown signal so the rest exit.
    let mut core_tasks = Vec::new();
    {
        let monitor = Arc::clone(&monitor);
        let conn = Arc::clone(&conn);
        let shutdown_tx = Arc::clone(&shutdown_tx);
        let shutdown_rx = shutdown_tx.subscribe();
        core_tasks.push(tokio::spawn(async move {
            if let Err(e) = monitor.send_loop(conn, shutdown_rx).await {
                error!("probe sender failed: {}", e);
            }
            let _ = shutdown_tx.send(true);
        }));
    }
    {
        let monitor = Arc::clone(&monitor);
        let conn = Arc::clone(&conn);
        let shutdown_tx = Arc::clone(&shutdown_tx);
        let shutdown_rx = shutdown_tx.subscribe();
        core_tasks.push(tokio::spawn(async move {
            if let Err(e) = monitor.recv_loop(conn, shutdown_rx).await {
                error!("reply receiver failed: {}", e);
            }
            let _ = shutdown_tx.send(true);
        }));
    }
    if !config.backup_file.is_empty() {
        let monitor = Arc::clone(&monitor);
        let path = config.backup_file.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        core_tasks.push(tokio::spawn(async move {
            backup::backup_to_file(monitor, path, shutdown_rx).await;
        }));
    }

    let monitor_data = web::Data::from(Arc::clone(&monitor));
    let limiters = web::Data::new(RateLimiters::new(
        config.server_list_quota(),
        config.server_add_quota(),
    ));
    let config_data = web::Data::new(config.clone());

    let srv = HttpServer::new(move || {
        App::new()
            .app_data(monitor_data.clone())
            .app_data(limiters.clone())
            .app_data(config_data.clone())
            .configure(handlers::routes)
    })
    .disable_signals()
    .bind(HTTP_ADDR)?
    .run();

    info!("registrar is listening: http {}, udp {}", HTTP_ADDR, udp_addr);

    // Once the core tasks are done the HTTP server has nothing left to
    // serve; stop it so the process can exit.
    let srv_handle = srv.handle();
    tokio::spawn(async move {
        for task in core_tasks {
            let _ = task.await;
        }
        info!("core tasks exited; stopping HTTP server...");
        srv_handle.stop(true).await;
    });

    srv.await
}
