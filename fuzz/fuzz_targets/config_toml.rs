#![no_main]

use dirtysoap_coord::config::types::ConfigFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let parsed: Option<ConfigFile> = toml::from_str(input).ok();
        let applied = dirtysoap_coord::fuzzing::apply_config_from_toml(input);
        if applied.is_ok() {
            if let Some(config) = parsed {
                if let Some(coordinator) = config.coordinator.as_ref() {
                    debug_assert!(coordinator.expected_workers != Some(0));
                    debug_assert!(coordinator.heartbeat_misses != Some(0));
                    debug_assert!(coordinator.snapshot_capacity != Some(0));
                }
                if let Some(worker) = config.worker.as_ref() {
                    if let Some(headers) = worker.headers.as_ref() {
                        for header in headers {
                            debug_assert!(
                                dirtysoap_coord::fuzzing::parse_header_input(header).is_ok()
                            );
                        }
                    }
                }
            }
        }
    }
});
