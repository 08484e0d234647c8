//! Metric name constants.
//!
//! Names are declared here and recorded at the call sites via the `metrics`
//! facade. No exporter is installed by this crate; the embedding process
//! decides where the numbers go.

/// Registered connections (gauge).
pub const COORDINATOR_CONNECTIONS_ACTIVE: &str = "coordinator_connections_active";
/// Successfully applied transitions (counter).
pub const COORDINATOR_TRANSITIONS_APPLIED_TOTAL: &str = "coordinator_transitions_applied_total";
/// Transitions discarded as stale at apply time (counter).
pub const COORDINATOR_TRANSITIONS_STALE_TOTAL: &str = "coordinator_transitions_stale_total";
/// Requests rejected for an illegal edge at acceptance (counter).
pub const COORDINATOR_REQUESTS_REJECTED_TOTAL: &str = "coordinator_requests_rejected_total";
/// Same-priority conflicts detected at enqueue (counter).
pub const COORDINATOR_CONFLICTS_TOTAL: &str = "coordinator_conflicts_total";
/// Heartbeat pings sent (counter).
pub const HEARTBEAT_PINGS_TOTAL: &str = "heartbeat_pings_total";
/// Heartbeat pongs recorded (counter).
pub const HEARTBEAT_PONGS_TOTAL: &str = "heartbeat_pongs_total";
/// Heartbeat timeouts declared (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            COORDINATOR_CONNECTIONS_ACTIVE,
            COORDINATOR_TRANSITIONS_APPLIED_TOTAL,
            COORDINATOR_TRANSITIONS_STALE_TOTAL,
            COORDINATOR_REQUESTS_REJECTED_TOTAL,
            COORDINATOR_CONFLICTS_TOTAL,
            HEARTBEAT_PINGS_TOTAL,
            HEARTBEAT_PONGS_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }

    #[test]
    fn counters_end_in_total() {
        let counters = [
            COORDINATOR_TRANSITIONS_APPLIED_TOTAL,
            COORDINATOR_TRANSITIONS_STALE_TOTAL,
            COORDINATOR_REQUESTS_REJECTED_TOTAL,
            COORDINATOR_CONFLICTS_TOTAL,
            HEARTBEAT_PINGS_TOTAL,
            HEARTBEAT_PONGS_TOTAL,
            HEARTBEAT_TIMEOUTS_TOTAL,
        ];
        for name in counters {
            assert!(name.ends_with("_total"), "counter '{name}' must end in _total");
        }
    }
}
