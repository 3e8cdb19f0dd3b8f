#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod request_logger;
pub mod routes;
pub mod storage;
pub mod telemetry;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support;

use crate::config::ServiceConfig;
use crate::pipeline::ImportService;
use crate::request_logger::RequestLogger;
use rocket::{Build, Rocket, Route};

/// Every route the service exposes, mounted at `/`.
pub fn service_routes() -> Vec<Route> {
    routes![
        routes::health::health_check,
        routes::import::import_async,
        routes::import::pubsub_push,
    ]
}

/// Assemble the HTTP service around an already wired [`ImportService`].
///
/// `PORT`, when set, overrides Rocket's port and binds all interfaces.
pub fn rocket(service: ImportService, config: &ServiceConfig) -> Rocket<Build> {
    let mut figment = rocket::Config::figment();
    if let Some(port) = config.port {
        figment = figment.merge(("port", port)).merge(("address", "0.0.0.0"));
    }

    rocket::custom(figment)
        .attach(RequestLogger)
        .manage(service)
        .mount("/", service_routes())
}
