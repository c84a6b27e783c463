//! Self-diagnostics side channel.
//!
//! Delivery outcomes, drops and overflow episodes are emitted as `tracing`
//! events under [`SELF_LOG_TARGET`]. Hosts route or silence them with an
//! ordinary filter directive such as `rask_log_analytics_sink::selflog=off`.

pub const SELF_LOG_TARGET: &str = "rask_log_analytics_sink::selflog";
