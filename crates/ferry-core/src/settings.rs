//! Namespaced configuration lookup
//!
//! [`Settings`] is a view over a TOML document. Every component reads its
//! tunables from its own namespace (a top-level table such as
//! `[ProphetRouter]` or `[RL]`):
//!
//! ```ignore
//! let settings = Settings::from_toml_str("[ProphetRouter]\nbeta = 0.3\nsecondsInTimeUnit = 30")?;
//! let prophet = settings.namespace("ProphetRouter");
//! assert_eq!(prophet.f64_or("beta", 0.25)?, 0.3);
//! ```
//!
//! Strict getters fail with [`ConfigError::Missing`] when a key is absent;
//! the `*_or` getters fall back to a default only when the key is absent,
//! never when it holds a value of the wrong type.

use std::path::Path;

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::error::{ConfigError, ConfigResult};

/// A namespaced, read-mostly view over a TOML settings document
#[derive(Debug, Clone, Default)]
pub struct Settings {
    table: Table,
    prefix: String,
}

impl Settings {
    /// Empty settings: every lookup falls back to defaults
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let table: Table = source.parse()?;
        Ok(Self {
            table,
            prefix: String::new(),
        })
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Child view for a namespace; an absent namespace yields an empty view
    pub fn namespace(&self, name: &str) -> Settings {
        let table = match self.table.get(name) {
            Some(Value::Table(t)) => t.clone(),
            _ => Table::new(),
        };
        Settings {
            table,
            prefix: self.full_key(name),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Fully qualified name of `key`, used in error messages
    pub fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    fn value(&self, key: &str) -> ConfigResult<&Value> {
        self.table.get(key).ok_or_else(|| ConfigError::Missing {
            key: self.full_key(key),
        })
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidType {
            key: self.full_key(key),
            expected,
        }
    }

    pub fn get_f64(&self, key: &str) -> ConfigResult<f64> {
        match self.value(key)? {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            _ => Err(self.wrong_type(key, "number")),
        }
    }

    pub fn get_i64(&self, key: &str) -> ConfigResult<i64> {
        match self.value(key)? {
            Value::Integer(i) => Ok(*i),
            _ => Err(self.wrong_type(key, "integer")),
        }
    }

    pub fn get_u64(&self, key: &str) -> ConfigResult<u64> {
        let value = self.get_i64(key)?;
        u64::try_from(value)
            .map_err(|_| ConfigError::invalid(self.full_key(key), "must not be negative"))
    }

    pub fn get_bool(&self, key: &str) -> ConfigResult<bool> {
        match self.value(key)? {
            Value::Boolean(b) => Ok(*b),
            _ => Err(self.wrong_type(key, "boolean")),
        }
    }

    pub fn get_str(&self, key: &str) -> ConfigResult<&str> {
        match self.value(key)? {
            Value::String(s) => Ok(s.as_str()),
            _ => Err(self.wrong_type(key, "string")),
        }
    }

    /// Deserialize an arbitrary value (arrays, tables) into `T`
    pub fn deserialize<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<T> {
        self.value(key)?
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::invalid(self.full_key(key), e.to_string()))
    }

    pub fn f64_or(&self, key: &str, default: f64) -> ConfigResult<f64> {
        if self.contains(key) {
            self.get_f64(key)
        } else {
            Ok(default)
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> ConfigResult<u64> {
        if self.contains(key) {
            self.get_u64(key)
        } else {
            Ok(default)
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        if self.contains(key) {
            self.get_bool(key)
        } else {
            Ok(default)
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> ConfigResult<String> {
        if self.contains(key) {
            self.get_str(key).map(str::to_string)
        } else {
            Ok(default.to_string())
        }
    }

    /// Override a value; dotted keys (`"RL.epsilon"`) create nested tables
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(leaf) = parts.pop() else {
            return Err(ConfigError::invalid(key, "empty key"));
        };
        let mut table = &mut self.table;
        for part in parts {
            let entry = table
                .entry(part.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            table = match entry {
                Value::Table(t) => t,
                _ => return Err(ConfigError::invalid(key, format!("{part} is not a table"))),
            };
        }
        table.insert(leaf.to_string(), value.into());
        Ok(())
    }
}
