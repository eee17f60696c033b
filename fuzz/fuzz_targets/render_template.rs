#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let mut vars = BTreeMap::new();
        vars.insert("iteration".to_owned(), "42".to_owned());
        let seed = input.chars().take(32).collect::<String>();
        vars.insert("run_id".to_owned(), seed);
        let rendered = dirtysoap_coord::fuzzing::render_template_input(input, &vars);
        if !input.contains("{{") {
            debug_assert_eq!(rendered, input);
        }
    }
});
