//! Tracing initialisation for binaries embedding the engine.
//!
//! Output goes to stderr so stdout stays free for command results.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// filter. Records emitted through the `log` facade are forwarded too.
///
/// Later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        let installed = match format {
            LogFormat::Human => tracing::subscriber::set_global_default(
                registry.with(fmt::layer().with_writer(std::io::stderr).with_target(false)),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                registry.with(fmt::layer().json().with_writer(std::io::stderr)),
            ),
        };
        if let Err(e) = installed {
            eprintln!("vigil: tracing subscriber already installed: {e}");
            return;
        }

        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!(error = %e, "log bridge not installed");
        }
    });
}
