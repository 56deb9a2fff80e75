// src/handlers/servers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::models::server::PublicServerInfo;
use crate::monitor::{AddServerError, Monitor};
use crate::utils::{client_ip, ApiError, RateLimiters};

// Consider increasing if we add more fields to the /addServer request body.
const MAX_ADD_SERVER_BODY_SIZE: usize = 1000;
const MAX_LISTED_SERVERS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct AddServerRequest {
    /// The server's public address in "host:port" format.
    pub host_and_port: String,
}

#[derive(Debug, Serialize)]
struct ServersResponse {
    servers: Vec<PublicServerInfo>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated_results: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    show_all: bool,
}

pub async fn get_servers(
    req: HttpRequest,
    query: web::Query<ListQuery>,
    monitor: web::Data<Monitor>,
    limiters: web::Data<RateLimiters>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let peer_ip = client_ip(&req, config.use_proxy_headers)?;
    if limiters.list.check_key(&peer_ip).is_err() {
        return Err(ApiError::RateLimitExceeded);
    }

    let mut servers = monitor.list_servers(query.show_all).await;
    let truncated_results = servers.len() > MAX_LISTED_SERVERS;
    servers.truncate(MAX_LISTED_SERVERS);
    debug!("listing {} servers for {}", servers.len(), peer_ip);

    Ok(HttpResponse::Ok().json(ServersResponse {
        servers,
        truncated_results,
    }))
}

pub async fn add_server(
    req: HttpRequest,
    body: web::Bytes,
    monitor: web::Data<Monitor>,
    limiters: web::Data<RateLimiters>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let peer_ip = client_ip(&req, config.use_proxy_headers)?;
    if limiters.add.check_key(&peer_ip).is_err() {
        return Err(ApiError::RateLimitExceeded);
    }

    if body.len() > MAX_ADD_SERVER_BODY_SIZE {
        return Err(ApiError::BadRequest("request body too large".to_string()));
    }
    let request: AddServerRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("invalid JSON in request body".to_string()))?;

    monitor
        .add_server(&request.host_and_port)
        .await
        .map_err(|e| match e {
            AddServerError::InvalidAddress => ApiError::BadRequest(
                "Invalid host_and_port format; expected host, then colon, then port".to_string(),
            ),
            AddServerError::SpecialIp(_) => {
                ApiError::BadRequest("IP type is not allowed".to_string())
            }
            AddServerError::Resolve(_) => {
                ApiError::BadRequest("failed to resolve server host name".to_string())
            }
        })?;

    debug!("added server {} for {}", request.host_and_port, peer_ip);
    Ok(HttpResponse::Ok().json(json!({ "added": true })))
}

pub async fn unsupported_method() -> Result<HttpResponse, ApiError> {
    Err(ApiError::UnsupportedMethod)
}
