//! Tracing initialisation for the marksim binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP plumbing under the adapters and the daemon; chatty below `warn`.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// Filter used when `RUST_LOG` is unset: `level` for marksim, `warn` for
/// the HTTP stack unless `level` is already stricter.
fn default_directives(level: Level) -> String {
    let quiet = if level < Level::WARN { level } else { Level::WARN };
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(
        QUIET_TARGETS
            .iter()
            .map(|target| format!("{target}={}", quiet.as_str().to_ascii_lowercase())),
    );
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().ok();
    }
}
