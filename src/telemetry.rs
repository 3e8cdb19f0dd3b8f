//! Logging setup.

use env_logger::Env;

const DEFAULT_FILTER: &str = "info,rocket::server=warn,rocket::request=warn,sqlx=warn";

/// Install the process-wide logger.
///
/// Called once by each binary before anything else runs. A second call
/// returns the error from `log` instead of panicking.
pub fn init_logging() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER)).try_init()
}
