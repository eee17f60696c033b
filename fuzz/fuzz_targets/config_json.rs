#![no_main]

use dirtysoap_coord::config::types::ConfigFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parsed: Option<ConfigFile> = serde_json::from_slice(data).ok();
    let applied = dirtysoap_coord::fuzzing::apply_config_from_json(data);
    if applied.is_ok() {
        if let Some(config) = parsed {
            check_positive_fields(&config);
        }
    }
});

fn check_positive_fields(config: &ConfigFile) {
    if let Some(coordinator) = config.coordinator.as_ref() {
        debug_assert!(coordinator.heartbeat_misses != Some(0));
        debug_assert!(coordinator.snapshot_capacity != Some(0));
        debug_assert!(coordinator.iterations != Some(0));
    }
    if let Some(worker) = config.worker.as_ref() {
        debug_assert!(worker.result_batch != Some(0));
    }
}
