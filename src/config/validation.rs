//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (budgets, backoff, concurrency)
//! - Check that every bootstrap URL is a usable node endpoint
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Invalid values are rejected, never clamped
//! - Pool and scheduler re-run their section's checks before starting

use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{
    BackoffConfig, BudgetConfig, ObservabilityConfig, PoolConfig, SchedulerConfig, WalletNetConfig,
};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the whole configuration tree.
pub fn validate_config(config: &WalletNetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    collect_pool_errors(&config.pool, &mut errors);
    collect_scheduler_errors(&config.scheduler, &mut errors);
    collect_observability_errors(&config.observability, &mut errors);
    finish(errors)
}

/// Validate the connection pool section.
pub fn validate_pool(config: &PoolConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    collect_pool_errors(config, &mut errors);
    finish(errors)
}

/// Validate the request scheduler section.
pub fn validate_scheduler(config: &SchedulerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    collect_scheduler_errors(config, &mut errors);
    finish(errors)
}

/// Parse the configured bootstrap URLs. Callers validate first.
pub fn parse_bootstrap_urls(config: &PoolConfig) -> Result<Vec<Url>, Vec<ValidationError>> {
    let mut urls = Vec::with_capacity(config.bootstrap_urls.len());
    let mut errors = Vec::new();
    for (i, raw) in config.bootstrap_urls.iter().enumerate() {
        match parse_endpoint(raw) {
            Ok(url) => urls.push(url),
            Err(message) => errors.push(ValidationError::new(
                format!("pool.bootstrap_urls[{}]", i),
                message,
            )),
        }
    }
    finish(errors).map(|()| urls)
}

fn parse_endpoint(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    if url.scheme() != "tcp" {
        return Err(format!("unsupported scheme '{}', expected tcp", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(format!("URL '{}' has no host", raw));
    }
    if url.port().is_none() {
        return Err(format!("URL '{}' has no port", raw));
    }
    Ok(url)
}

fn collect_pool_errors(config: &PoolConfig, errors: &mut Vec<ValidationError>) {
    if let Err(mut url_errors) = parse_bootstrap_urls(config) {
        errors.append(&mut url_errors);
    }
    if config.max_backoff_secs == 0 {
        errors.push(ValidationError::new("pool.max_backoff_secs", "must be greater than 0"));
    }
    if config.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("pool.connect_timeout_secs", "must be greater than 0"));
    }
    collect_budget_errors("pool.server_budget", &config.server_budget, errors);
    collect_budget_errors("pool.global_budget", &config.global_budget, errors);
}

fn collect_scheduler_errors(config: &SchedulerConfig, errors: &mut Vec<ValidationError>) {
    if config.max_concurrent == 0 {
        errors.push(ValidationError::new("scheduler.max_concurrent", "must be at least 1"));
    }
    collect_backoff_errors(&config.backoff, errors);
    collect_budget_errors("scheduler.retry_budget", &config.retry_budget, errors);
}

fn collect_budget_errors(field: &str, budget: &BudgetConfig, errors: &mut Vec<ValidationError>) {
    if budget.max_attempts < 2 {
        errors.push(ValidationError::new(
            format!("{}.max_attempts", field),
            "must be at least 2",
        ));
    }
    if budget.replenish_secs == 0 {
        errors.push(ValidationError::new(
            format!("{}.replenish_secs", field),
            "must be greater than 0",
        ));
    }
}

fn collect_backoff_errors(backoff: &BackoffConfig, errors: &mut Vec<ValidationError>) {
    if backoff.initial_ms == 0 {
        errors.push(ValidationError::new("scheduler.backoff.initial_ms", "must be greater than 0"));
    }
    if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "scheduler.backoff.multiplier",
            "must be a finite number >= 1.0",
        ));
    }
    if backoff.max_ms < backoff.initial_ms {
        errors.push(ValidationError::new(
            "scheduler.backoff.max_ms",
            "must not be smaller than initial_ms",
        ));
    }
}

fn collect_observability_errors(config: &ObservabilityConfig, errors: &mut Vec<ValidationError>) {
    if config.metrics_enabled && config.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.metrics_address),
        ));
    }
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&WalletNetConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = WalletNetConfig::default();
        config.pool.bootstrap_urls = vec!["ssl://a.example:50002".into(), "not a url".into()];
        config.pool.server_budget.max_attempts = 1;
        config.scheduler.max_concurrent = 0;
        config.scheduler.backoff.multiplier = 0.5;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "pool.bootstrap_urls[0]",
                "pool.bootstrap_urls[1]",
                "pool.server_budget.max_attempts",
                "scheduler.max_concurrent",
                "scheduler.backoff.multiplier",
            ]
        );
    }

    #[test]
    fn test_parse_bootstrap_urls() {
        let mut config = PoolConfig::default();
        config.bootstrap_urls = vec!["tcp://a.example:50001".into()];
        let urls = parse_bootstrap_urls(&config).unwrap();
        assert_eq!(urls[0].host_str(), Some("a.example"));
        assert_eq!(urls[0].port(), Some(50001));

        config.bootstrap_urls = vec!["tcp://a.example".into()];
        let errors = parse_bootstrap_urls(&config).unwrap_err();
        assert!(errors[0].message.contains("no port"));
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = WalletNetConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
