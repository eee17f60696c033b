use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global subscriber. `DIRTYSOAP_LOG` takes precedence over
/// `RUST_LOG`; without either, `--verbose` selects `debug` over `info`.
pub fn init_logging(verbose: bool) {
    let filter = std::env::var("DIRTYSOAP_LOG")
        .or_else(|_err| std::env::var("RUST_LOG"))
        .map_or_else(
            |_err| default_filter(verbose),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_err| default_filter(verbose)),
        );

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already installed by an earlier call.
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    }
}
