pub mod classify;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod geocode;
pub mod ingestion;
pub mod location;
pub mod providers;
pub mod search;
pub mod states;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::AppConfig;
pub use db::{bootstrap, LocationStore, SqliteStore};
pub use errors::{AppError, AppResult};
pub use geocode::{BatchGeocoder, BatchSummary, RowOutcome};
pub use ingestion::{InputFormat, InputMode, InputReader, InputRow};
pub use location::{Coordinate, LocationRecord};
pub use providers::{Provider, ProviderRegistry, ProviderResponse};

const VERBOSE_FILTER: &str = "info,geoloc=debug";
const QUIET_FILTER: &str = "off";

/// Installs the global subscriber once. `RUST_LOG` takes precedence over `verbose`.
pub fn init_tracing(verbose: bool) {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        QUIET_FILTER
    }
}
