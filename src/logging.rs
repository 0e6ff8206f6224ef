//! Tracing initializer
//!

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

fn subscriber() -> impl tracing::Subscriber + Send + Sync + 'static {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish()
}

/// Install the global subscriber. Honours `RUST_LOG`, defaults to `info`.
pub fn init_tracing() -> crate::Result<()> {
    tracing::subscriber::set_global_default(subscriber())
        .map_err(|e| crate::RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Like [`init_tracing`] but silently keeps an already installed subscriber.
pub fn try_init_tracing() {
    let _ = tracing::subscriber::set_global_default(subscriber());
}
