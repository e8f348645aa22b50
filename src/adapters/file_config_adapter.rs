//! INI file configuration adapter.

use std::collections::HashMap;
use std::path::Path;

use configparser::ini::Ini;

use crate::ports::config_port::ConfigPort;

/// Environment variable that overrides `[vault] server_secret`.
pub const SERVER_SECRET_ENV: &str = "BONDLEDGER_SERVER_SECRET";

pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<(String, String), String>,
}

impl FileConfigAdapter {
    /// Loads `path` and applies overrides from the process environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        let adapter = Self {
            config,
            overrides: HashMap::new(),
        };
        Ok(match std::env::var(SERVER_SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => adapter.with_override("vault", "server_secret", secret),
            _ => adapter,
        })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// Replaces one value regardless of what the file says.
    pub fn with_override(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.overrides
            .insert((section.to_lowercase(), key.to_lowercase()), value.into());
        self
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_sections() {
        let content = r#"
[database]
path = /var/lib/bondledger/ledger.db
pool_size = 8

[chain]
endpoint = https://gateway.example
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("database", "path"),
            Some("/var/lib/bondledger/ledger.db".to_string())
        );
        assert_eq!(adapter.get_int("database", "pool_size", 0), 8);
        assert_eq!(
            adapter.get_string("chain", "endpoint"),
            Some("https://gateway.example".to_string())
        );
    }

    #[test]
    fn missing_keys_and_sections_are_none() {
        let adapter = FileConfigAdapter::from_string("[chain]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(adapter.get_string("chain", "missing"), None);
        assert_eq!(adapter.get_string("nope", "key"), None);
    }

    #[test]
    fn get_int_falls_back_on_missing_or_garbage() {
        let adapter = FileConfigAdapter::from_string("[sponsor]\ntop_up = lots\n").unwrap();
        assert_eq!(adapter.get_int("sponsor", "top_up", 42), 42);
        assert_eq!(adapter.get_int("sponsor", "min_balance", 7), 7);
    }

    #[test]
    fn get_bool_accepts_common_spellings() {
        let adapter =
            FileConfigAdapter::from_string("[log]\na = yes\nb = 0\nc = maybe\n").unwrap();
        assert!(adapter.get_bool("log", "a", false));
        assert!(!adapter.get_bool("log", "b", true));
        assert!(adapter.get_bool("log", "c", true));
    }

    #[test]
    fn override_wins_over_file_value() {
        let adapter = FileConfigAdapter::from_string("[vault]\nserver_secret = from-file\n")
            .unwrap()
            .with_override("vault", "server_secret", "from-env");
        assert_eq!(
            adapter.get_string("vault", "server_secret"),
            Some("from-env".to_string())
        );
    }

    #[test]
    fn override_fills_a_missing_key() {
        let adapter = FileConfigAdapter::from_string("[database]\npath = x.db\n")
            .unwrap()
            .with_override("sponsor", "top_up", "100");
        assert_eq!(adapter.get_int("sponsor", "top_up", 0), 100);
    }

    #[test]
    fn require_string_reports_missing_key() {
        let adapter = FileConfigAdapter::from_string("[vault]\n").unwrap();
        let err = adapter.require_string("vault", "server_secret").unwrap_err();
        assert_eq!(err.to_string(), "missing config key [vault] server_secret");
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[database]\npath = ledger.db\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("database", "path"),
            Some("ledger.db".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        assert!(FileConfigAdapter::from_file("/nonexistent/path/config.ini").is_err());
    }
}
