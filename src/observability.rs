use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("workbench.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("workbench.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("workbench.client.request_duration_seconds");

pub(crate) static CSRF_FETCHES: Counter = Counter::new("workbench.csrf.fetches");
pub(crate) static CSRF_INVALIDATIONS: Counter = Counter::new("workbench.csrf.invalidations");
pub(crate) static CSRF_RETRIES: Counter = Counter::new("workbench.csrf.retries");
pub(crate) static CSRF_FAILURES: Counter = Counter::new("workbench.csrf.failures");

pub(crate) static AUTH_SUCCESSES: Counter = Counter::new("workbench.auth.successes");
pub(crate) static AUTH_FAILURES: Counter = Counter::new("workbench.auth.failures");
pub(crate) static AUTH_LOGOUTS: Counter = Counter::new("workbench.auth.logouts");
pub(crate) static AUTH_LOGOUT_ERRORS: Counter = Counter::new("workbench.auth.logout_errors");
pub(crate) static AUTH_STALE_RESULTS: Counter = Counter::new("workbench.auth.stale_results");

pub(crate) static EXCHANGES_STARTED: Counter = Counter::new("workbench.exchange.started");
pub(crate) static EXCHANGES_REJECTED: Counter = Counter::new("workbench.exchange.rejected");
pub(crate) static EXCHANGES_COMPLETED: Counter = Counter::new("workbench.exchange.completed");
pub(crate) static EXCHANGES_STOPPED: Counter = Counter::new("workbench.exchange.stopped");
pub(crate) static EXCHANGES_FAILED: Counter = Counter::new("workbench.exchange.failed");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("workbench.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("workbench.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("workbench.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("workbench.stream.duration_seconds");

pub(crate) static BOUNDARY_RECOVERIES: Counter = Counter::new("workbench.boundary.recoveries");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&CSRF_FETCHES);
    collector.register_counter(&CSRF_INVALIDATIONS);
    collector.register_counter(&CSRF_RETRIES);
    collector.register_counter(&CSRF_FAILURES);

    collector.register_counter(&AUTH_SUCCESSES);
    collector.register_counter(&AUTH_FAILURES);
    collector.register_counter(&AUTH_LOGOUTS);
    collector.register_counter(&AUTH_LOGOUT_ERRORS);
    collector.register_counter(&AUTH_STALE_RESULTS);

    collector.register_counter(&EXCHANGES_STARTED);
    collector.register_counter(&EXCHANGES_REJECTED);
    collector.register_counter(&EXCHANGES_COMPLETED);
    collector.register_counter(&EXCHANGES_STOPPED);
    collector.register_counter(&EXCHANGES_FAILED);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&BOUNDARY_RECOVERIES);
}
