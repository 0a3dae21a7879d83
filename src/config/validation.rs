//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer sizes > 0, timeouts > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("cache.root must not be empty")]
    EmptyCacheRoot,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("listener.read_buffer_size", config.listener.read_buffer_size as u64),
        ("origin.connect_timeout_secs", config.origin.connect_timeout_secs),
        ("origin.read_timeout_secs", config.origin.read_timeout_secs),
        ("origin.max_response_bytes", config.origin.max_response_bytes as u64),
        ("origin.read_buffer_size", config.origin.read_buffer_size as u64),
        ("timeouts.client_read_secs", config.timeouts.client_read_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.cache.root.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyCacheRoot);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
