use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Transport crates stay quiet unless asked for explicitly.
const NOISY_TARGETS: &str = "hyper=warn,reqwest=warn";

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Logs go to stderr so they never interleave with the transcript on stdout.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
    {
        eprintln!("tracing subscriber already installed: {error}");
    }
}

fn default_directives(level: &str) -> String {
    format!("{},{NOISY_TARGETS}", level.trim())
}
