use std::time::Duration;

use chrono::Utc;

pub(super) fn build_run_id(counter: u64) -> String {
    format!("run-{}-{}", Utc::now().timestamp_millis(), counter)
}

pub(super) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
