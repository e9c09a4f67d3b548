// Configuration file loaders

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `key.path = value` lines, as used by classic `*.properties` files
    Properties,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "properties" | "props" => Some(FileFormat::Properties),
            _ => None,
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                ConfigError::LoadError(format!("No file extension found: {}", path.display()))
            })?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), format = ?self.format, "Loaded configuration file");
        self.parse(&content)
    }

    /// Parse configuration from string
    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => self.parse_json(content),
            FileFormat::Toml => self.parse_toml(content),
            FileFormat::Properties => self.parse_properties(content),
        }
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let toml_value: toml::Value = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e)))
    }

    fn parse_properties(&self, content: &str) -> Result<Value> {
        let mut root = Value::Object(Map::new());

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigError::ParseError(format!(
                    "properties line {} has no '=': {}",
                    index + 1,
                    line
                ))
            })?;

            let path: Vec<&str> = key.trim().split('.').collect();
            set_path(&mut root, &path, Value::String(value.trim().to_string()))?;
        }

        Ok(root)
    }
}

/// Insert `value` at the dotted `path`, creating intermediate objects.
pub(crate) fn set_path(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        let Value::Object(map) = node else {
            return Err(ConfigError::ParseError(format!(
                "key segment '{}' is nested under a scalar",
                segment
            )));
        };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(ConfigError::ParseError(format!(
            "key '{}' is nested under a scalar",
            path.join(".")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let json = r#"{"database": {"url": "memory"}, "number": 42}"#;

        let result = loader.parse(json).unwrap();
        assert_eq!(result["database"]["url"], "memory");
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            [app]
            upload_limit_mb = 10
        "#;

        let result = loader.parse(toml).unwrap();
        assert_eq!(result["app"]["upload_limit_mb"], 10);
    }

    #[test]
    fn test_parse_properties_nests_dotted_keys() {
        let loader = ConfigLoader::new(FileFormat::Properties);
        let props = r#"
            # jdbc settings
            smart.framework.jdbc.url = jdbc:mysql://localhost:3306/demo
            smart.framework.jdbc.username=root
            ! another comment style
            smart.framework.app.upload_limit=10
        "#;

        let result = loader.parse(props).unwrap();
        assert_eq!(
            result["smart"]["framework"]["jdbc"]["url"],
            "jdbc:mysql://localhost:3306/demo"
        );
        assert_eq!(result["smart"]["framework"]["jdbc"]["username"], "root");
        assert_eq!(result["smart"]["framework"]["app"]["upload_limit"], "10");
    }

    #[test]
    fn test_parse_properties_rejects_scalar_parent() {
        let loader = ConfigLoader::new(FileFormat::Properties);
        let props = "a = 1\na.b = 2";

        assert!(loader.parse(props).is_err());
    }

    #[test]
    fn test_parse_properties_missing_separator() {
        let loader = ConfigLoader::new(FileFormat::Properties);
        assert!(matches!(
            loader.parse("just a line"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(
            FileFormat::from_extension("properties"),
            Some(FileFormat::Properties)
        );
        assert_eq!(FileFormat::from_extension("unknown"), None);
    }

    #[test]
    fn test_auto_without_extension() {
        assert!(ConfigLoader::auto("config").is_err());
        assert_eq!(
            ConfigLoader::auto("app.properties").unwrap().format(),
            FileFormat::Properties
        );
    }
}
