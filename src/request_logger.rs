use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Data, Request, Response};
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Per-request start time and id, kept in the request-local cache.
struct RequestTrace {
    started: Instant,
    id: Uuid,
}

impl RequestTrace {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            id: Uuid::new_v4(),
        }
    }
}

/// Fairing to log one line per HTTP request with timing and a request id
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(RequestTrace::start);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let trace = request.local_cache(RequestTrace::start);
        let duration = trace.started.elapsed();

        response.set_header(Header::new(REQUEST_ID_HEADER, trace.id.to_string()));

        log::info!(
            "[{}] {} {} -> {} ({:.2}ms)",
            trace.id.simple(),
            request.method(),
            request.uri(),
            response.status().code,
            duration.as_secs_f64() * 1000.0
        );
    }
}
