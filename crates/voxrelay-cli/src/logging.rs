use tracing_subscriber::EnvFilter;

use voxrelay_core::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `--verbose` forces debug; otherwise `RUST_LOG` wins over the configured
/// level and per-crate filters.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let directives = directives(config, verbose);
    let filter = if verbose {
        EnvFilter::new(&directives)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives))
    };

    let json = config.is_some_and(|c| c.format == "json");
    let stdout = config.is_some_and(|c| c.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.and_then(|c| c.level.as_deref()).unwrap_or("info")
    };

    let mut parts = vec![level.to_string()];
    if let Some(config) = config {
        parts.extend(config.filters.iter().cloned());
    }
    parts.join(",")
}
