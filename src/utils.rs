use std::time::Duration;

pub fn to_millis(duration: Duration) -> u64 {
    (duration.as_secs() * 1_000) + (duration.subsec_nanos() / 1_000_000) as u64
}

/// Installs the log subscriber for the binaries, `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}


#[cfg(test)]
mod tests {

    use std::time::Duration;

    use super::to_millis;

    #[test]
    fn millis() {
        assert_eq!(to_millis(Duration::new(2, 345_678_901)), 2_345);
        assert_eq!(to_millis(Duration::from_millis(7)), 7);
    }
}
