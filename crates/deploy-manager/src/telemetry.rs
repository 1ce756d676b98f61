//! Tracing bootstrap.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns an error if a global subscriber is already set; callers that may
/// initialize twice can ignore it.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
