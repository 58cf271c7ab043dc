//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{RuntimeConfigError, RuntimeConfigResult};
use super::schema::{AppConfig, LogOutput, LoggingConfig, TrellisConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TrellisConfig) -> RuntimeConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_workers(&config.workers)?;
    validate_app_config(&config.app)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> RuntimeConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(RuntimeConfigError::missing_field("logging.file_path"));
    }
    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(RuntimeConfigError::validation(format!(
            "Log filter target cannot be empty: {target:?}"
        )));
    }
    Ok(())
}

fn validate_workers(workers: &[String]) -> RuntimeConfigResult<()> {
    let mut seen = HashSet::new();
    for name in workers {
        if name.is_empty() {
            return Err(RuntimeConfigError::validation("Worker name cannot be empty"));
        }
        if name.contains(char::is_whitespace) {
            return Err(RuntimeConfigError::validation(format!(
                "Worker name cannot contain spaces: '{name}'"
            )));
        }
        if !seen.insert(name) {
            return Err(RuntimeConfigError::DuplicateWorker(name.clone()));
        }
    }
    Ok(())
}

fn validate_app_config(app: &AppConfig) -> RuntimeConfigResult<()> {
    if app.id.is_empty() {
        return Err(RuntimeConfigError::missing_field("app.id"));
    }
    if let Some(path) = &app.file
        && !path.exists()
    {
        return Err(RuntimeConfigError::FileNotFound(path.clone()));
    }
    if let Some(name) = app
        .parameters
        .keys()
        .find(|name| name.is_empty() || name.contains(['{', '}', '$']))
    {
        return Err(RuntimeConfigError::validation(format!(
            "Invalid parameter name: '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_config() {
        let config = TrellisConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_duplicate_worker() {
        let mut config = TrellisConfig::default();
        config.workers = vec!["io".into(), "render".into(), "io".into()];
        assert!(matches!(
            validate_config(&config),
            Err(RuntimeConfigError::DuplicateWorker(name)) if name == "io"
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = TrellisConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(RuntimeConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_missing_app_file() {
        let mut config = TrellisConfig::default();
        config.app.file = Some("/nonexistent/app.xml".into());
        assert!(matches!(
            validate_config(&config),
            Err(RuntimeConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_validate_parameter_names() {
        let mut config = TrellisConfig::default();
        config
            .app
            .parameters
            .insert("${bad}".into(), serde_json::json!("x"));
        assert!(validate_config(&config).is_err());
    }
}
