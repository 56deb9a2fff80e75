// src/utils.rs
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use log::{error, info};
use serde_json::json;
use std::fmt;
use std::net::IpAddr;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// The per-route keyed limiters. Bundled in one struct because actix app
/// data is looked up by type, so two bare limiters would collide.
pub struct RateLimiters {
    pub list: IpRateLimiter,
    pub add: IpRateLimiter,
}

impl RateLimiters {
    pub fn new(list_quota: Quota, add_quota: Quota) -> Self {
        Self {
            list: RateLimiter::keyed(list_quota),
            add: RateLimiter::keyed(add_quota),
        }
    }
}

/// Error surface for the HTTP routes. Everything a handler can fail with
/// maps here, and `error_response` is the single spot deciding status
/// codes, bodies, and log levels.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimitExceeded,
    UnsupportedMethod,
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "{}", msg),
            Self::RateLimitExceeded => write!(f, "rate limit exceeded"),
            Self::UnsupportedMethod => write!(f, "unsupported method"),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            Self::BadRequest(msg) => {
                info!("API issue: {}", msg);
                HttpResponse::BadRequest().json(json!({ "error": msg }))
            }
            Self::RateLimitExceeded => {
                info!("API issue: rate limit exceeded");
                HttpResponse::TooManyRequests().json(json!({ "error": "rate limit exceeded" }))
            }
            Self::UnsupportedMethod => {
                info!("API issue: unsupported method");
                HttpResponse::MethodNotAllowed().json(json!({ "error": "unsupported method" }))
            }
            Self::Internal(msg) => {
                error!("API error: {}", msg);
                HttpResponse::InternalServerError().json(json!({ "error": "Internal Server Error" }))
            }
        }
    }
}

/// The client IP used as the rate-limiting key. The forwarding headers
/// are only consulted when `useProxyHeaders` is set; trusting them
/// without a reverse proxy in front would let clients pick their own key.
pub fn client_ip(req: &HttpRequest, use_proxy_headers: bool) -> Result<IpAddr, ApiError> {
    if use_proxy_headers {
        if let Some(forwarded_for) = req.headers().get("X-Forwarded-For") {
            if let Ok(value) = forwarded_for.to_str() {
                if let Some(first) = value.split(',').next() {
                    if let Ok(ip) = first.trim().parse() {
                        return Ok(ip);
                    }
                }
            }
        }
        if let Some(real_ip) = req.headers().get("X-Real-IP") {
            if let Ok(value) = real_ip.to_str() {
                if let Ok(ip) = value.trim().parse() {
                    return Ok(ip);
                }
            }
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip())
        .ok_or_else(|| ApiError::Internal("failed to extract client IP".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn peer(req: TestRequest) -> TestRequest {
        req.peer_addr("203.0.113.9:40000".parse().unwrap())
    }

    #[test]
    fn peer_address_wins_without_proxy_headers() {
        let req = peer(TestRequest::get().insert_header(("X-Forwarded-For", "198.51.100.1")))
            .to_http_request();
        let ip = client_ip(&req, false).unwrap();
        assert_eq!(ip, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn forwarded_for_wins_when_trusted() {
        let req = peer(TestRequest::get().insert_header((
            "X-Forwarded-For",
            "198.51.100.1, 10.0.0.1",
        )))
        .to_http_request();
        let ip = client_ip(&req, true).unwrap();
        assert_eq!(ip, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn real_ip_is_the_fallback_header() {
        let req = peer(TestRequest::get().insert_header(("X-Real-IP", "198.51.100.2")))
            .to_http_request();
        let ip = client_ip(&req, true).unwrap();
        assert_eq!(ip, "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unparsable_header_falls_back_to_peer() {
        let req = peer(TestRequest::get().insert_header(("X-Forwarded-For", "not an ip")))
            .to_http_request();
        let ip = client_ip(&req, true).unwrap();
        assert_eq!(ip, "203.0.113.9".parse::<IpAddr>().unwrap());
    }
}
