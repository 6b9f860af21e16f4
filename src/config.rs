use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;

use crate::codec::validate_secret;
use crate::context::ExtractorConfig;
use crate::error::{ConfigError, FlagError};
use crate::evaluation::{OfflineFallbackConfig, PolicyKind};
use crate::resolver::{AdapterChain, Flag, FlagOptions, Resolver, DEFAULT_ADAPTER_TIMEOUT};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Default for `request.environment` when no header says otherwise.
    pub environment: String,
    pub deployment: String,
    pub flags_secret: Option<String>,
    pub flags_file: Option<PathBuf>,
    pub adapter_timeout: Duration,
    pub analytics_queue_capacity: usize,
    pub visitor_cookie: String,
}

fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value }),
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv().is_ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_var("PORT", lookup("PORT"), 8080u16)?;

        let timeout_ms = parse_var(
            "FLAG_ADAPTER_TIMEOUT_MS",
            lookup("FLAG_ADAPTER_TIMEOUT_MS"),
            DEFAULT_ADAPTER_TIMEOUT.as_millis() as u64,
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidVar {
                name: "FLAG_ADAPTER_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        let analytics_queue_capacity = parse_var(
            "ANALYTICS_QUEUE_CAPACITY",
            lookup("ANALYTICS_QUEUE_CAPACITY"),
            1024usize,
        )?;

        // A bad secret is a startup error, never a request-time one.
        let flags_secret = lookup("FLAGS_SECRET").filter(|s| !s.is_empty());
        if let Some(secret) = &flags_secret {
            validate_secret(secret, true).map_err(|source| ConfigError::Secret {
                name: "FLAGS_SECRET",
                source,
            })?;
        }

        Ok(Self {
            port,
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
            deployment: lookup("DEPLOYMENT_ID").unwrap_or_else(|| "local".to_string()),
            flags_secret,
            flags_file: lookup("FLAGS_FILE").filter(|p| !p.is_empty()).map(PathBuf::from),
            adapter_timeout: Duration::from_millis(timeout_ms),
            analytics_queue_capacity,
            visitor_cookie: lookup("VISITOR_COOKIE_NAME")
                .unwrap_or_else(|| "visitor-id".to_string()),
        })
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            visitor_cookie: self.visitor_cookie.clone(),
            default_environment: self.environment.clone(),
            default_deployment: self.deployment.clone(),
            ..ExtractorConfig::default()
        }
    }
}

/// One entry of the flag definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagFileEntry {
    pub key: String,
    pub offline: OfflineFallbackConfig,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FlagFileEntry {
    /// Defines this entry on `resolver` as an offline-only flag.
    pub fn define(self, resolver: &Resolver) -> Result<Flag, FlagError> {
        if self.offline.kind == PolicyKind::Custom {
            return Err(FlagError::configuration(
                &self.key,
                "custom policies can only be defined in code",
            ));
        }

        let options = FlagOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            description: self.description,
        };
        resolver.define(self.key, AdapterChain::offline(self.offline), options)
    }
}

pub fn parse_flag_file(path: &Path, contents: &str) -> Result<Vec<FlagFileEntry>, ConfigError> {
    serde_json::from_str(contents).map_err(|source| ConfigError::FlagFileFormat {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_flag_file(path: &Path) -> Result<Vec<FlagFileEntry>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FlagFile {
        path: path.display().to_string(),
        source,
    })?;
    parse_flag_file(path, &contents)
}

/// Defines every entry of the file. Stops at the first invalid one.
pub fn define_flags(resolver: &Resolver, entries: Vec<FlagFileEntry>) -> Result<usize, ConfigError> {
    let count = entries.len();
    for entry in entries {
        entry.define(resolver)?;
    }
    Ok(count)
}
