//! Configuration module for Fleet Guardian.
//!
//! This module handles parsing and validation of the controller's settings:
//! the Guardian cadence and thresholds, lifecycle locking, forecasting,
//! persistence paths, the admin API and the servers to seed on first start.
//! Configurations are loaded from JSON or YAML files or strings.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use fleet_guardian::config::Config;
//!
//! let config = Config::from_file("fleet.json").unwrap();
//! println!("Seeding {} servers", config.servers.len());
//! ```
//!
//! Building one programmatically:
//!
//! ```
//! use fleet_guardian::config::{validate_config, Config};
//!
//! let mut config = Config::default();
//! config.guardian.check_interval_secs = 15;
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{
    ApiConfig, AuthConfig, BearerAuthConfig, Config, DEFAULT_WORKERS, ForecastConfig,
    GuardianConfig, GuardianLogConfig, LifecycleConfig, RegistryConfig,
};
pub use validator::{validate_config, validate_server_draft};
