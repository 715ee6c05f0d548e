//! Configuration validation.
//!
//! Serde handles the syntax; this checks value ranges and cross-field rules.
//! Every problem is reported, not just the first one.

use std::fmt;

use crate::config::schema::{ConfigDocument, DatabaseConfig};
use crate::database::{TenantKey, DEFAULT_DATABASE};

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed document.
pub fn validate_config(doc: &ConfigDocument) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if doc.application.host.trim().is_empty() {
        errors.push(ValidationError::new("application.host", "must not be empty"));
    }
    if doc.application.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "application.request_timeout_secs",
            "must be greater than zero",
        ));
    }

    if doc.ssl.enable {
        if doc.ssl.pem.trim().is_empty() {
            errors.push(ValidationError::new("ssl.pem", "required when ssl.enable = true"));
        }
        if doc.ssl.key.trim().is_empty() {
            errors.push(ValidationError::new("ssl.key", "required when ssl.enable = true"));
        }
    }

    if doc.logger.file && doc.logger.path.trim().is_empty() {
        errors.push(ValidationError::new("logger.path", "required when logger.file = true"));
    }

    validate_database("database", &doc.database, &mut errors);
    if !doc.database.required {
        errors.push(ValidationError::new(
            "database.required",
            "the default database cannot be optional",
        ));
    }

    for (key, db) in &doc.databases {
        let field = format!("databases.\"{}\"", key);
        if key == DEFAULT_DATABASE {
            errors.push(ValidationError::new(
                &field,
                "\"*\" is reserved for the default [database] section",
            ));
            continue;
        }
        match TenantKey::new(key) {
            Some(normalized) if normalized.as_str() != key => {
                errors.push(ValidationError::new(
                    &field,
                    format!("tenant key must be lowercase without surrounding spaces (use \"{}\")", normalized),
                ));
            }
            Some(_) => {}
            None => errors.push(ValidationError::new(&field, "tenant key must not be empty")),
        }
        validate_database(&field, db, &mut errors);
    }

    if doc.reload.enabled && doc.reload.poll_interval_ms == 0 {
        errors.push(ValidationError::new("reload.poll_interval_ms", "must be greater than zero"));
    }
    if doc.shutdown.grace_ms == 0 {
        errors.push(ValidationError::new("shutdown.grace_ms", "must be greater than zero"));
    }
    if doc.jobs.enabled && doc.jobs.job_timeout_ms == 0 {
        errors.push(ValidationError::new("jobs.job_timeout_ms", "must be greater than zero"));
    }
    if doc.metrics.enabled && doc.metrics.address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("metrics.address", "must be a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_database(field: &str, db: &DatabaseConfig, errors: &mut Vec<ValidationError>) {
    if db.source.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.source", field), "must not be empty"));
    }
    if db.max_open_conns == 0 {
        errors.push(ValidationError::new(
            format!("{}.max_open_conns", field),
            "must be at least 1",
        ));
    }
    if db.min_idle_conns > db.max_open_conns {
        errors.push(ValidationError::new(
            format!("{}.min_idle_conns", field),
            "must not exceed max_open_conns",
        ));
    }
    if db.acquire_timeout_secs == 0 {
        errors.push(ValidationError::new(
            format!("{}.acquire_timeout_secs", field),
            "must be greater than zero",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> ConfigDocument {
        toml::from_str(toml_src).unwrap()
    }

    const VALID: &str = r#"
        [application]
        host = "127.0.0.1"
        port = 0

        [database]
        driver = "sqlite"
        source = "sqlite::memory:"

        [databases."a.example.com"]
        driver = "sqlite"
        source = "sqlite::memory:"
    "#;

    #[test]
    fn valid_document_passes() {
        assert!(validate_config(&parse(VALID)).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut doc = parse(VALID);
        doc.application.host = " ".into();
        doc.database.source = String::new();
        doc.database.max_open_conns = 0;
        doc.ssl.enable = true;
        doc.shutdown.grace_ms = 0;

        let errors = validate_config(&doc).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"application.host"));
        assert!(fields.contains(&"database.source"));
        assert!(fields.contains(&"database.max_open_conns"));
        assert!(fields.contains(&"ssl.pem"));
        assert!(fields.contains(&"ssl.key"));
        assert!(fields.contains(&"shutdown.grace_ms"));
    }

    #[test]
    fn tenant_keys_must_be_normalized() {
        let mut doc = parse(VALID);
        let db = doc.databases["a.example.com"].clone();
        doc.databases.insert("B.Example.com".into(), db.clone());
        doc.databases.insert("".into(), db);

        let errors = validate_config(&doc).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("must not be empty")));
        assert!(errors.iter().any(|e| e.message.contains("\"b.example.com\"")));
    }

    #[test]
    fn wildcard_tenant_is_reserved() {
        let mut doc = parse(VALID);
        let db = doc.databases["a.example.com"].clone();
        doc.databases.insert("*".into(), db);
        let errors = validate_config(&doc).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("reserved"));
    }

    #[test]
    fn default_database_cannot_be_optional() {
        let mut doc = parse(VALID);
        doc.database.required = false;
        let errors = validate_config(&doc).unwrap_err();
        assert_eq!(errors[0].field, "database.required");
    }
}
