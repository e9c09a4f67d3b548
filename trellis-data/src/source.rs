//! Connection source selection from configuration.

use crate::{Database, DataError, DataResult, MemoryDatabase};
use trellis_config::DatabaseConfig;
use tracing::{info, warn};

/// Build a [`Database`] for the configured driver.
///
/// `memory` is always available; `sqlite` needs the `sqlite` feature.
/// Neither takes credentials, so `username` and `password` are only logged
/// as ignored.
pub async fn open_source(config: &DatabaseConfig) -> DataResult<Database> {
    if config.username.is_some() || config.password.is_some() {
        warn!(driver = %config.driver, "Database credentials are ignored by this driver");
    }

    let database = match config.driver.to_ascii_lowercase().as_str() {
        "memory" => Database::from_source(MemoryDatabase::new()),
        #[cfg(feature = "sqlite")]
        "sqlite" => Database::from_source(crate::sqlite::SqliteSource::connect(config).await?),
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            return Err(DataError::Config(
                "driver `sqlite` requires the `sqlite` feature".to_string(),
            ));
        }
        other => {
            return Err(DataError::Config(format!("unknown database driver `{}`", other)));
        }
    };

    info!(driver = database.source().name(), "Data source ready");
    Ok(database)
}
