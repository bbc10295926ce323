use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. `LOGSYNC_LOG` wins over `RUST_LOG`.
pub fn init_logging() {
    let filter_layer = EnvFilter::new(filter_directive(
        env::var("LOGSYNC_LOG").ok(),
        env::var("RUST_LOG").ok(),
    ));

    let initialized = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter_layer)
        .try_init();
    if initialized.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn filter_directive(own: Option<String>, rust_log: Option<String>) -> String {
    own.or(rust_log)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        assert_eq!(filter_directive(None, None), "info");
        assert_eq!(filter_directive(Some("  ".into()), None), "info");
    }

    #[test]
    fn own_variable_wins() {
        assert_eq!(
            filter_directive(Some("logsyncd=debug".into()), Some("warn".into())),
            "logsyncd=debug"
        );
        assert_eq!(filter_directive(None, Some("warn".into())), "warn");
    }
}
