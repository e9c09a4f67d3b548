// Environment variable loading

use std::env;

/// Separator between nested key segments, e.g. `TRELLIS_DATABASE__URL`.
pub const NESTED_SEPARATOR: &str = "__";

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Collect `(key path, value)` overrides from the process environment.
    ///
    /// With prefix `TRELLIS`, `TRELLIS_DATABASE__URL=x` yields
    /// `(["database", "url"], "x")`.
    pub fn overrides(&self) -> Vec<(Vec<String>, String)> {
        self.overrides_from(env::vars())
    }

    /// Same as [`overrides`](Self::overrides) over an explicit variable set.
    pub fn overrides_from<I>(&self, vars: I) -> Vec<(Vec<String>, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut overrides = Vec::new();

        for (key, value) in vars {
            let trimmed = match &self.prefix {
                Some(prefix) => {
                    match key.strip_prefix(prefix.as_str()).and_then(|r| r.strip_prefix('_')) {
                        Some(rest) => rest,
                        None => continue,
                    }
                }
                None => key.as_str(),
            };

            if trimmed.is_empty() {
                continue;
            }

            let path = trimmed
                .split(NESTED_SEPARATOR)
                .map(|segment| segment.to_lowercase())
                .collect();
            overrides.push((path, value));
        }

        overrides.sort();
        overrides
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
