//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConsumerConfig, CourierConfig, LoggingConfig, ServiceConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_service_config(&config.service)?;
    validate_consumer_config(&config.consumer)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_service_config(service: &ServiceConfig) -> ConfigResult<()> {
    if service.name.trim().is_empty() {
        return Err(ConfigError::missing_field("service.name"));
    }
    if let Some(key) = &service.routing_key
        && (key.is_empty() || key.contains('.'))
    {
        return Err(ConfigError::validation(format!(
            "service.routing_key must be a single non-empty segment, got '{key}'"
        )));
    }
    Ok(())
}

fn validate_consumer_config(consumer: &ConsumerConfig) -> ConfigResult<()> {
    if consumer.concurrency == 0 {
        return Err(ConfigError::validation(
            "consumer.concurrency must be greater than 0",
        ));
    }
    if consumer.handler_timeout_ms == Some(0) {
        return Err(ConfigError::validation(
            "consumer.handler_timeout_ms must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for queue in &consumer.queues {
        if queue.trim().is_empty() {
            return Err(ConfigError::validation("consumer.queues contains an empty name"));
        }
        if !seen.insert(queue) {
            return Err(ConfigError::validation(format!(
                "consumer.queues lists '{queue}' twice"
            )));
        }
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.filters.keys().any(|target| target.trim().is_empty()) {
        return Err(ConfigError::validation(
            "logging.filters contains an empty target",
        ));
    }
    if let Some(queue) = logging
        .queues
        .keys()
        .find(|queue| queue.is_empty() || queue.contains(['{', '}', '[', ']', '=', ',']))
    {
        return Err(ConfigError::validation(format!(
            "logging.queues has an unusable queue name '{queue}'"
        )));
    }
    if let Some(file) = &logging.file
        && file.file_name().is_none()
    {
        return Err(ConfigError::validation(format!(
            "logging.file '{}' does not name a file",
            file.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = CourierConfig::default();
        config.consumer.concurrency = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_queue_names_checked() {
        let mut config = CourierConfig::default();
        config.consumer.queues = vec!["billing".into(), " ".into()];
        assert!(validate_config(&config).is_err());

        config.consumer.queues = vec!["billing".into(), "billing".into()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_logging_queue_names_checked() {
        let mut config = CourierConfig::default();
        config
            .logging
            .queues
            .insert("billing".into(), crate::config::LogLevel::Debug);
        assert!(validate_config(&config).is_ok());

        config
            .logging
            .queues
            .insert("bill]ing".into(), crate::config::LogLevel::Debug);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_log_file_must_name_a_file() {
        let mut config = CourierConfig::default();
        config.logging.file = Some("/".into());
        assert!(validate_config(&config).is_err());
        config.logging.file = Some("/var/log/courier.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_routing_key_is_one_segment() {
        let mut config = CourierConfig::default();
        config.service.routing_key = Some("orders.eu".into());
        assert!(validate_config(&config).is_err());
        config.service.routing_key = Some("orders".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_and_empty_name_rejected() {
        let mut config = CourierConfig::default();
        config.consumer.handler_timeout_ms = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = CourierConfig::default();
        config.service.name = String::new();
        assert!(validate_config(&config).is_err());
    }
}
