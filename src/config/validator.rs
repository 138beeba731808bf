use crate::config::Config;
use crate::error::{Error, Result};
use crate::server::{Protocol, ProtocolSettings, ServerDraft};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Validates a server's display name
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }
    Ok(name.to_string())
}

/// Parses an IPv4/IPv6 literal
pub fn parse_ip_address(raw: &str) -> Result<IpAddr> {
    raw.trim().parse::<IpAddr>().map_err(|_| {
        Error::validation(
            "ip_address",
            format!("'{}' is not a valid IPv4 or IPv6 address", raw),
        )
    })
}

/// Validates capacity: a positive number of concurrent connections
pub fn validate_capacity(capacity: i64) -> Result<u32> {
    if capacity < 1 {
        return Err(Error::validation(
            "capacity",
            format!("must be at least 1, got {}", capacity),
        ));
    }
    u32::try_from(capacity)
        .map_err(|_| Error::validation("capacity", format!("{} is too large", capacity)))
}

/// Parses the enabled protocol set; it must not be empty
pub fn parse_protocols(raw: &[String]) -> Result<BTreeSet<Protocol>> {
    let protocols = raw
        .iter()
        .map(|p| p.parse::<Protocol>())
        .collect::<Result<BTreeSet<_>>>()?;

    if protocols.is_empty() {
        return Err(Error::validation(
            "protocols",
            "at least one protocol must be enabled",
        ));
    }
    Ok(protocols)
}

/// Validates an ISO 3166-1 alpha-2 country code; empty is allowed
pub fn validate_country_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        return Ok(String::new());
    }
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::validation(
            "country_code",
            format!("'{}' is not a two-letter country code", code),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

/// Validates per-protocol settings
pub fn validate_protocol_settings(settings: &BTreeMap<Protocol, ProtocolSettings>) -> Result<()> {
    for (protocol, s) in settings {
        if s.port == Some(0) {
            return Err(Error::validation(
                "protocol_settings",
                format!("port of {} must not be 0", protocol),
            ));
        }
    }
    Ok(())
}

/// Validates a draft before it reaches the registry.
///
/// Fields are checked in a fixed order so the error always names the first
/// violated field: name, ip_address, capacity, protocols, country_code,
/// status, protocol_settings.
pub fn validate_server_draft(draft: &ServerDraft) -> Result<()> {
    validate_name(&draft.name)?;
    parse_ip_address(&draft.ip_address)?;
    validate_capacity(draft.capacity)?;
    parse_protocols(&draft.protocols)?;
    validate_country_code(&draft.country_code)?;
    if let Some(status) = &draft.status {
        status.parse::<crate::server::ServerStatus>()?;
    }
    validate_protocol_settings(&draft.protocol_settings)?;
    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    let guardian = &config.guardian;
    if guardian.check_interval_secs == 0 {
        return Err(Error::ConfigInvalid(
            "guardian.check_interval_secs must be greater than 0".to_string(),
        ));
    }
    if guardian.probe_timeout_secs == 0 || guardian.on_demand_timeout_secs == 0 {
        return Err(Error::ConfigInvalid(
            "guardian timeouts must be greater than 0".to_string(),
        ));
    }
    if guardian.probe_timeout_secs > guardian.on_demand_timeout_secs {
        return Err(Error::ConfigInvalid(format!(
            "guardian.probe_timeout_secs ({}) must not exceed on_demand_timeout_secs ({})",
            guardian.probe_timeout_secs, guardian.on_demand_timeout_secs
        )));
    }
    if guardian.unhealthy_threshold == 0 {
        return Err(Error::ConfigInvalid(
            "guardian.unhealthy_threshold must be at least 1".to_string(),
        ));
    }
    if guardian.auto_offline && guardian.auto_offline_threshold < guardian.unhealthy_threshold {
        return Err(Error::ConfigInvalid(format!(
            "guardian.auto_offline_threshold ({}) must not be below unhealthy_threshold ({})",
            guardian.auto_offline_threshold, guardian.unhealthy_threshold
        )));
    }

    let forecast = &config.forecast;
    if !(forecast.smoothing > 0.0 && forecast.smoothing <= 1.0) {
        return Err(Error::ConfigInvalid(format!(
            "forecast.smoothing must be in (0, 1], got {}",
            forecast.smoothing
        )));
    }
    if forecast.default_horizon_hours == 0
        || forecast.default_horizon_hours > forecast.max_horizon_hours
    {
        return Err(Error::ConfigInvalid(format!(
            "forecast.default_horizon_hours must be in 1..={}",
            forecast.max_horizon_hours
        )));
    }
    if forecast.min_history_hours < 2 {
        return Err(Error::ConfigInvalid(
            "forecast.min_history_hours must be at least 2".to_string(),
        ));
    }

    if let Some(api) = &config.api {
        if api.bearer_token().is_some_and(|t| t.is_empty()) {
            return Err(Error::ConfigInvalid(
                "api.authenticate.bearer.token must not be empty".to_string(),
            ));
        }
    }

    for draft in &config.servers {
        validate_server_draft(draft).map_err(|e| {
            Error::ConfigInvalid(format!("Seed server '{}' is invalid: {}", draft.name, e))
        })?;
    }

    Ok(())
}
