// Configuration source for the Trellis framework
//
// Loaded once at startup and handed to the data layer (connection settings)
// and the dispatch front (view paths, upload limit).

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Environment prefix read by [`FrameworkConfig::with_env`].
pub const ENV_PREFIX: &str = "TRELLIS";

/// Largest accepted `app.upload_limit_mb` (1 TiB).
pub const MAX_UPLOAD_LIMIT_MB: u64 = 1024 * 1024;

/// Connection settings consumed by the data layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Driver identity (`memory`, `sqlite`).
    #[serde(deserialize_with = "de::string")]
    pub driver: String,
    /// Connection URL handed to the driver.
    #[serde(deserialize_with = "de::string")]
    pub url: String,
    /// Credentials for external pools that take them separately from the
    /// URL. The bundled `memory` and `sqlite` drivers ignore them.
    #[serde(deserialize_with = "de::opt_string")]
    pub username: Option<String>,
    #[serde(deserialize_with = "de::opt_string")]
    pub password: Option<String>,
    /// Upper bound handed to the external pool.
    #[serde(deserialize_with = "de::u32")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            url: String::new(),
            username: None,
            password: None,
            max_connections: 5,
        }
    }
}

/// Web-tier settings consumed by the dispatch front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Informational. Components are registered explicitly, so the
    /// framework never scans this.
    #[serde(deserialize_with = "de::opt_string")]
    pub base_package: Option<String>,
    /// Prefix joined to relative view names.
    #[serde(deserialize_with = "de::string")]
    pub view_path: String,
    /// Static asset prefix, served by whatever fronts the dispatcher.
    /// Validated here but not routed by the framework.
    #[serde(deserialize_with = "de::string")]
    pub asset_path: String,
    /// Per-file upload limit in megabytes; 0 disables the check.
    #[serde(deserialize_with = "de::u64")]
    pub upload_limit_mb: u64,
}

impl AppConfig {
    /// Upload limit in bytes, `None` when unlimited.
    pub fn upload_limit_bytes(&self) -> Option<u64> {
        (self.upload_limit_mb > 0).then(|| self.upload_limit_mb.saturating_mul(1024 * 1024))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_package: None,
            view_path: "/WEB-INF/view/".to_string(),
            asset_path: "/asset/".to_string(),
            upload_limit_mb: 0,
        }
    }
}

/// Log subscriber settings, turned into a subscriber by `trellis_core::logging`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `info,trellis_data=trace`.
    #[serde(deserialize_with = "de::string")]
    pub filter: String,
    /// `json`, `pretty`, `compact` or `full`.
    #[serde(deserialize_with = "de::string")]
    pub format: String,
    /// Append to this file instead of stdout.
    #[serde(deserialize_with = "de::opt_string")]
    pub file: Option<String>,
    /// Write daily-rotated files into this directory. Wins over `file`.
    #[serde(deserialize_with = "de::opt_string")]
    pub directory: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: "json".to_string(),
            file: None,
            directory: None,
        }
    }
}

/// Complete framework configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub database: DatabaseConfig,
    pub app: AppConfig,
    pub log: LogSettings,
}

impl FrameworkConfig {
    /// Load from a `.toml`, `.json` or `.properties` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let value = ConfigLoader::auto(path)?.load_file(path)?;
        Self::from_value(value)
    }

    /// Parse a string in the given format.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        Self::from_value(ConfigLoader::new(format).parse(content)?)
    }

    /// Build from an already parsed tree.
    ///
    /// Accepts the legacy `smart.framework.{jdbc,app}` layout as well as the
    /// `database` / `app` sections.
    pub fn from_value(value: Value) -> Result<Self> {
        let value = normalize_legacy(value);
        let config: Self = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRELLIS_SECTION__KEY` overrides from the environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(EnvLoader::new(Some(ENV_PREFIX.to_string())).overrides())
    }

    /// Apply explicit `(path, value)` overrides.
    pub fn with_overrides(self, overrides: Vec<(Vec<String>, String)>) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self);
        }

        let mut value = serde_json::to_value(&self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        for (path, raw) in overrides {
            tracing::debug!(key = %path.join("."), "Applying configuration override");
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            loader::set_path(&mut value, &segments, Value::String(raw))?;
        }
        Self::from_value(value)
    }

    /// Load a `.env` file into the process environment before [`with_env`](Self::with_env).
    pub fn load_dotenv(path: Option<&str>) -> Result<()> {
        let outcome = match path {
            Some(path) => dotenvy::from_path(path).map(|_| ()),
            None => dotenvy::dotenv().map(|_| ()),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.not_found() && path.is_none() => Ok(()),
            Err(e) => Err(ConfigError::LoadError(e.to_string())),
        }
    }
}

impl Validate for FrameworkConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.database.driver, "database.driver")?;
        if self.database.driver != "memory" {
            ConfigValidator::not_empty(&self.database.url, "database.url")?;
        }
        ConfigValidator::in_range(self.database.max_connections, 1, 1024, "database.max_connections")?;
        ConfigValidator::is_dir_path(&self.app.view_path, "app.view_path")?;
        ConfigValidator::is_dir_path(&self.app.asset_path, "app.asset_path")?;
        ConfigValidator::in_range(self.app.upload_limit_mb, 0, MAX_UPLOAD_LIMIT_MB, "app.upload_limit_mb")?;
        ConfigValidator::not_empty(&self.log.filter, "log.filter")?;
        ConfigValidator::one_of(&self.log.format, &["json", "pretty", "compact", "full"], "log.format")?;
        Ok(())
    }
}

/// Map `smart.framework.jdbc.*` / `smart.framework.app.*` onto the native layout.
fn normalize_legacy(mut value: Value) -> Value {
    let Some(legacy) = value
        .get_mut("smart")
        .and_then(|smart| smart.get_mut("framework"))
        .map(Value::take)
    else {
        return value;
    };

    let rename = |section: Option<&Value>, pairs: &[(&str, &str)]| {
        let mut out = serde_json::Map::new();
        if let Some(Value::Object(map)) = section {
            for (from, to) in pairs {
                if let Some(v) = map.get(*from) {
                    out.insert(to.to_string(), v.clone());
                }
            }
        }
        Value::Object(out)
    };

    let database = rename(
        legacy.get("jdbc"),
        &[
            ("driver", "driver"),
            ("url", "url"),
            ("username", "username"),
            ("password", "password"),
        ],
    );
    let app = rename(
        legacy.get("app"),
        &[
            ("base_package", "base_package"),
            ("jsp_path", "view_path"),
            ("asset_path", "asset_path"),
            ("upload_limit", "upload_limit_mb"),
        ],
    );

    if let Value::Object(map) = &mut value {
        map.remove("smart");
        merge_section(map, "database", database);
        merge_section(map, "app", app);
    }
    value
}

fn merge_section(root: &mut serde_json::Map<String, Value>, name: &str, section: Value) {
    let Value::Object(incoming) = section else {
        return;
    };
    if incoming.is_empty() {
        return;
    }
    let entry = root
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Value::Object(existing) = entry {
        for (k, v) in incoming {
            existing.entry(k).or_insert(v);
        }
    }
}

/// Lenient field deserializers: properties files and env overrides carry
/// every value as a string.
mod de {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn scalar_to_string<E: Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(E::custom(format!("expected a scalar, found {}", other))),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(scalar_to_string(Value::deserialize(d)?)?.unwrap_or_default())
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(scalar_to_string(Value::deserialize(d)?)?.filter(|s| !s.is_empty()))
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Value::deserialize(d)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| D::Error::custom(format!("expected unsigned integer, found {}", n))),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected unsigned integer, found {:?}", s))),
            other => Err(D::Error::custom(format!(
                "expected unsigned integer, found {}",
                other
            ))),
        }
    }

    pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let wide = u64(d)?;
        u32::try_from(wide).map_err(|_| D::Error::custom(format!("{} is out of range", wide)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FrameworkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.driver, "memory");
        assert_eq!(config.app.view_path, "/WEB-INF/view/");
        assert_eq!(config.app.upload_limit_bytes(), None);
    }

    #[test]
    fn test_parse_toml_sections() {
        let config = FrameworkConfig::parse(
            r#"
            [database]
            driver = "sqlite"
            url = "sqlite::memory:"
            max_connections = 1

            [app]
            upload_limit_mb = 2
            "#,
            FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.database.driver, "sqlite");
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.app.upload_limit_bytes(), Some(2 * 1024 * 1024));
        assert_eq!(config.app.asset_path, "/asset/");
    }

    #[test]
    fn test_parse_legacy_properties() {
        let config = FrameworkConfig::parse(
            r#"
            smart.framework.jdbc.driver=sqlite
            smart.framework.jdbc.url=sqlite://demo.db
            smart.framework.jdbc.username=root
            smart.framework.jdbc.password=123456
            smart.framework.app.base_package=org.demo
            smart.framework.app.jsp_path=/WEB-INF/jsp/
            smart.framework.app.upload_limit=10
            "#,
            FileFormat::Properties,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite://demo.db");
        assert_eq!(config.database.password.as_deref(), Some("123456"));
        assert_eq!(config.app.base_package.as_deref(), Some("org.demo"));
        assert_eq!(config.app.view_path, "/WEB-INF/jsp/");
        assert_eq!(config.app.upload_limit_mb, 10);
    }

    #[test]
    fn test_sqlite_requires_url() {
        let result = FrameworkConfig::parse(
            "[database]\ndriver = \"sqlite\"\n",
            FileFormat::Toml,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_overrides_replace_values() {
        let config = FrameworkConfig::default()
            .with_overrides(vec![
                (
                    vec!["app".to_string(), "upload_limit_mb".to_string()],
                    "3".to_string(),
                ),
                (
                    vec!["database".to_string(), "username".to_string()],
                    "svc".to_string(),
                ),
            ])
            .unwrap();

        assert_eq!(config.app.upload_limit_mb, 3);
        assert_eq!(config.database.username.as_deref(), Some("svc"));
    }

    #[test]
    fn test_log_section() {
        let config = FrameworkConfig::parse(
            r#"
            [log]
            filter = "debug,trellis_data=trace"
            format = "compact"
            directory = "/var/log/trellis"
            "#,
            FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.log.filter, "debug,trellis_data=trace");
        assert_eq!(config.log.format, "compact");
        assert_eq!(config.log.directory.as_deref(), Some("/var/log/trellis"));
        assert_eq!(config.log.file, None);

        let result = FrameworkConfig::parse("[log]\nformat = \"xml\"\n", FileFormat::Toml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_upload_limit() {
        let result = FrameworkConfig::parse(
            "[app]\nupload_limit_mb = \"lots\"\n",
            FileFormat::Toml,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_oversized_upload_limit() {
        let result = FrameworkConfig::parse("[app]\nupload_limit_mb = 1125899906842624\n", FileFormat::Toml);
        assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("app.upload_limit_mb")));

        let app = AppConfig {
            upload_limit_mb: 1 << 50,
            ..AppConfig::default()
        };
        assert_eq!(app.upload_limit_bytes(), Some(u64::MAX));

        let app = AppConfig {
            upload_limit_mb: MAX_UPLOAD_LIMIT_MB,
            ..AppConfig::default()
        };
        assert_eq!(app.upload_limit_bytes(), Some(1 << 40));
    }
}
