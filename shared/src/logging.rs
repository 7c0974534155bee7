use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MANGROVE_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Installs a global fmt subscriber.
///
/// `MANGROVE_LOG` wins over `default_filter`, which falls back to `info`.
/// Returns `false` if a global subscriber was already set; calling this twice
/// is harmless.
pub fn init(default_filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init(Some("debug"));
        assert!(!init(Some("not a [valid filter")));
    }
}
