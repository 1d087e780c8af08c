use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub exchanges: ExchangesConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name; the embedded engine uses it as the file path.
    pub name: String,
    pub ssl_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "marketflow".to_string(),
            password: String::new(),
            name: "data/marketflow.db".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl CacheConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            host: "127.0.0.1".to_string(),
            port: 40101,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangesConfig {
    pub exchange1: ExchangeConfig,
    pub exchange2: ExchangeConfig,
    pub exchange3: ExchangeConfig,
    /// Fall back to test mode when the initial live start brings up no adapter.
    /// Applies to startup only; manual switches never fall back.
    pub auto_fallback: bool,
    /// Synthetic generator tick interval, clamped to 100 ms..=10 s at use.
    pub test_tick_ms: u64,
}

impl ExchangesConfig {
    /// Named live endpoints in declaration order.
    pub fn live_endpoints(&self) -> Vec<(String, ExchangeConfig)> {
        vec![
            ("exchange1".to_string(), self.exchange1.clone()),
            ("exchange2".to_string(), self.exchange2.clone()),
            ("exchange3".to_string(), self.exchange3.clone()),
        ]
    }
}

impl Default for ExchangesConfig {
    fn default() -> Self {
        ExchangesConfig {
            exchange1: ExchangeConfig {
                host: "127.0.0.1".to_string(),
                port: 40101,
            },
            exchange2: ExchangeConfig {
                host: "127.0.0.1".to_string(),
                port: 40102,
            },
            exchange3: ExchangeConfig {
                host: "127.0.0.1".to_string(),
                port: 40103,
            },
            auto_fallback: true,
            test_tick_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: 8080 }
    }
}

impl AppConfig {
    /// Load configuration from the given file (JSON), overlaid with
    /// `MARKETFLOW_`-prefixed environment variables. A missing file falls
    /// back to the built-in defaults; a malformed one is a fatal error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(str::to_owned)
            .or_else(|| std::env::var("MARKETFLOW_CONFIG").ok())
            .unwrap_or_else(|| "configs/config".to_string());

        let config = Config::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("MARKETFLOW").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
