use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub partnership: PartnershipConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let telemetry = TelemetryConfig {
            log_level,
            include_targets: environment != AppEnvironment::Production,
            ansi: environment == AppEnvironment::Development,
        };

        let partnership = PartnershipConfig::from_env()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry,
            partnership,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub include_targets: bool,
    pub ansi: bool,
}

/// Longest negotiation window any deployment may configure.
pub const MAX_EXPIRY_CEILING_DAYS: u32 = 3650;

/// Negotiation windows and sweeper cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnershipConfig {
    pub default_expiry_days: u32,
    pub max_expiry_days: u32,
    pub sweep_interval: Duration,
}

impl Default for PartnershipConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: 7,
            max_expiry_days: 90,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl PartnershipConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_expiry_days = read_u32(
            "PARTNERSHIP_DEFAULT_EXPIRY_DAYS",
            defaults.default_expiry_days,
        )?;
        let max_expiry_days = read_u32("PARTNERSHIP_MAX_EXPIRY_DAYS", defaults.max_expiry_days)?;
        let sweep_secs = read_u32(
            "PARTNERSHIP_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs() as u32,
        )?;

        if max_expiry_days > MAX_EXPIRY_CEILING_DAYS {
            return Err(ConfigError::ExpiryCeilingExceeded {
                max_days: max_expiry_days,
            });
        }
        if default_expiry_days == 0 || default_expiry_days > max_expiry_days {
            return Err(ConfigError::InvalidExpiryWindow {
                default_days: default_expiry_days,
                max_days: max_expiry_days,
            });
        }
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "PARTNERSHIP_SWEEP_INTERVAL_SECS",
            });
        }

        Ok(Self {
            default_expiry_days,
            max_expiry_days,
            sweep_interval: Duration::from_secs(u64::from(sweep_secs)),
        })
    }
}

fn read_u32(key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
    InvalidExpiryWindow { default_days: u32, max_days: u32 },
    ExpiryCeilingExceeded { max_days: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a positive whole number")
            }
            ConfigError::InvalidExpiryWindow {
                default_days,
                max_days,
            } => write!(
                f,
                "default expiry of {default_days} days must be between 1 and the {max_days} day maximum"
            ),
            ConfigError::ExpiryCeilingExceeded { max_days } => write!(
                f,
                "PARTNERSHIP_MAX_EXPIRY_DAYS of {max_days} exceeds the {MAX_EXPIRY_CEILING_DAYS} day ceiling"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidExpiryWindow { .. }
            | ConfigError::ExpiryCeilingExceeded { .. } => None,
        }
    }
}
