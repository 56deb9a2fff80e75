// src/handlers/mod.rs
pub mod servers;

use actix_web::web;

/// Registers the HTTP routes. Shared app data (monitor, config, rate
/// limiters) is supplied by the caller, which keeps this reusable from
/// the integration tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/servers")
            .route(web::get().to(servers::get_servers))
            .default_service(web::route().to(servers::unsupported_method)),
    )
    .service(
        web::resource("/addServer")
            .route(web::post().to(servers::add_server))
            .default_service(web::route().to(servers::unsupported_method)),
    );
}
