//! Tracing initialization
//!
//! The statistics engine has no terminal UI to protect from log interleaving,
//! so (unlike the proxy this crate's scaffolding is descended from) there is
//! no in-memory log buffer or custom `Layer` — just a standard `fmt` layer
//! driven by an `EnvFilter`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Precedence: `RUST_LOG` env var > `level` argument > "info".
pub fn init(level: &str) {
    let default_filter = format!("statsrec={level}");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
