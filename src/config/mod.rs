// Configuration module entry point
// Loads layered configuration and builds the shared application state

mod state;
mod types;

use std::net::SocketAddr;

pub use state::AppState;
pub use types::Config;

/// Config file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from the path given as the first CLI argument,
    /// or from `config.toml` in the working directory
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::args()
            .nth(1)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load configuration from specified file path (extension optional)
    ///
    /// Sources, lowest priority first: built-in defaults, the config file
    /// (optional), then `WIKI_`-prefixed environment variables such as
    /// `WIKI_SERVER__PORT=9000`.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("storage.data_dir", ".")?
            .set_default("templates.dir", "templates")?
            .set_default("templates.builtin", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 30)?
            .set_default("performance.write_timeout", 30)?
            .set_default("http.server_name", "wikid/0.1")?
            .set_default("http.max_body_size", 1_048_576)? // 1MB
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("WIKI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let cfg = Config::load_from(path.to_str().unwrap()).unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.storage.data_dir, ".");
        assert_eq!(cfg.templates.dir, "templates");
        assert!(!cfg.templates.builtin);
        assert_eq!(cfg.logging.access_log_format, "combined");
        assert_eq!(cfg.http.max_body_size, 1_048_576);
        assert_eq!(cfg.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wiki.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9090
workers = 2

[storage]
data_dir = "pages"

[templates]
dir = "tmpl"

[logging]
access_log = false
"#,
        )
        .unwrap();

        let cfg = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.workers, Some(2));
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.storage.data_dir, "pages");
        assert_eq!(cfg.templates.dir, "tmpl");
        assert!(!cfg.templates.builtin);
        assert!(!cfg.logging.access_log);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let mut cfg = Config::load_from(path.to_str().unwrap()).unwrap();
        cfg.server.host = "not a host".to_string();
        assert!(cfg.socket_addr().is_err());
    }
}
