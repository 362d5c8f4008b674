use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_LOGINS: Counter = Counter::new("docchat.session.logins");
pub(crate) static SESSION_LOGIN_FAILURES: Counter =
    Counter::new("docchat.session.login_failures");
pub(crate) static SESSION_LOGOUTS: Counter = Counter::new("docchat.session.logouts");
pub(crate) static SESSION_LOGOUT_ERRORS: Counter = Counter::new("docchat.session.logout_errors");
pub(crate) static SESSION_REFRESHES: Counter = Counter::new("docchat.session.refreshes");
pub(crate) static SESSION_REFRESH_JOINS: Counter = Counter::new("docchat.session.refresh_joins");
pub(crate) static SESSION_REFRESH_FAILURES: Counter =
    Counter::new("docchat.session.refresh_failures");
pub(crate) static SESSION_REFRESH_DURATION: Moments =
    Moments::new("docchat.session.refresh_duration_seconds");
pub(crate) static SESSION_LOGIN_REQUIRED: Counter =
    Counter::new("docchat.session.login_required");

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("docchat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("docchat.client.request_errors");
pub(crate) static CLIENT_REQUEST_REPLAYS: Counter = Counter::new("docchat.client.replays");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("docchat.client.request_duration_seconds");

pub(crate) static STREAM_OPENS: Counter = Counter::new("docchat.stream.opens");
pub(crate) static STREAM_RECONNECTS: Counter = Counter::new("docchat.stream.reconnects");
pub(crate) static STREAM_EVENTS: Counter = Counter::new("docchat.stream.events");
pub(crate) static STREAM_MALFORMED: Counter = Counter::new("docchat.stream.malformed_events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("docchat.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("docchat.stream.bytes");
pub(crate) static STREAM_DURATION: Moments = Moments::new("docchat.stream.duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_LOGINS);
    collector.register_counter(&SESSION_LOGIN_FAILURES);
    collector.register_counter(&SESSION_LOGOUTS);
    collector.register_counter(&SESSION_LOGOUT_ERRORS);
    collector.register_counter(&SESSION_REFRESHES);
    collector.register_counter(&SESSION_REFRESH_JOINS);
    collector.register_counter(&SESSION_REFRESH_FAILURES);
    collector.register_moments(&SESSION_REFRESH_DURATION);
    collector.register_counter(&SESSION_LOGIN_REQUIRED);

    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_REPLAYS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_OPENS);
    collector.register_counter(&STREAM_RECONNECTS);
    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_MALFORMED);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_DURATION);
}
