#[macro_use]
extern crate rocket;

use gcs_pg_import::config::ServiceConfig;
use gcs_pg_import::pipeline::ImportService;
use gcs_pg_import::telemetry;

#[launch]
fn rocket() -> _ {
    if let Err(err) = telemetry::init_logging() {
        eprintln!("logger already initialised: {err}");
    }

    log::info!("starting gcs-pg-import");

    let config = ServiceConfig::from_env();
    log::info!("configuration: {:?}", config);

    let service = match ImportService::from_config(&config) {
        Ok(service) => service,
        Err(err) => {
            log::error!("failed to initialise storage client: {}", err);
            std::process::exit(1);
        }
    };

    log::info!(
        "imports time out after {:?}",
        service.settings().timeout
    );

    gcs_pg_import::rocket(service, &config)
}
