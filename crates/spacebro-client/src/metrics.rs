//! Client instrumentation.
//!
//! Counters are recorded through the `metrics` facade; nothing is exported
//! unless the application installs a recorder.

use metrics::counter;
use std::sync::Once;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "spacebro_client_connections_total";
    pub const EVENTS_SENT: &str = "spacebro_client_events_sent_total";
    pub const EVENTS_RECEIVED: &str = "spacebro_client_events_received_total";
    pub const EVENTS_DROPPED: &str = "spacebro_client_events_dropped_total";
}

/// Reasons an inbound event is dropped.
pub mod drop_reasons {
    pub const SELF_ECHO: &str = "self_echo";
    pub const NO_LISTENER: &str = "no_listener";
    pub const UNPACKER: &str = "unpacker";
}

static DESCRIBE: Once = Once::new();

/// Describe the client metrics to the installed recorder. Runs once.
pub fn describe() {
    DESCRIBE.call_once(|| {
        metrics::describe_counter!(
            names::CONNECTIONS_TOTAL,
            "Total number of connections opened by clients"
        );
        metrics::describe_counter!(names::EVENTS_SENT, "Total number of events sent");
        metrics::describe_counter!(
            names::EVENTS_RECEIVED,
            "Total number of events delivered to listeners"
        );
        metrics::describe_counter!(
            names::EVENTS_DROPPED,
            "Total number of inbound events dropped before delivery"
        );
    });
}

/// Record a connection being opened.
pub fn record_connection(transport: &'static str) {
    counter!(names::CONNECTIONS_TOTAL, "transport" => transport).increment(1);
}

/// Record an event handed to the transport.
pub fn record_sent() {
    counter!(names::EVENTS_SENT).increment(1);
}

/// Record an event delivered to listeners.
pub fn record_received() {
    counter!(names::EVENTS_RECEIVED).increment(1);
}

/// Record an inbound event that never reached a listener.
pub fn record_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}
