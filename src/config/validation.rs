use super::models::{Config, DriverKindName, DriverSettings};
use crate::humanize::ByteSize;
use crate::identifier;
use crate::upload::{MAX_PART_COUNT, MAX_PART_SIZE, PART_SIZE_GRANULARITY};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Default driver '{0}' is not configured")]
    UnknownDefaultDriver(String),

    #[error("Driver id '{0}' may only contain letters, digits, '-', '_' and '.'")]
    InvalidDriverId(String),

    #[error("Driver '{driver}' has an empty label")]
    EmptyLabel { driver: String },

    #[error("Label '{label}' is used by both '{first}' and '{second}'")]
    DuplicateLabel {
        label: String,
        first: String,
        second: String,
    },

    #[error("Driver '{driver}' needs a bucket")]
    MissingBucket { driver: String },

    #[error("Driver '{driver}' has invalid bucket name '{bucket}'")]
    InvalidBucket { driver: String, bucket: String },

    #[error("Driver '{driver}' endpoint '{endpoint}' must start with http:// or https://")]
    InvalidEndpoint { driver: String, endpoint: String },

    #[error("{field} ({actual}) must be between {min} and {max}")]
    PartSizeOutOfRange {
        field: String,
        actual: ByteSize,
        min: ByteSize,
        max: ByteSize,
    },

    #[error("{field} ({actual}) exceeds the single-request limit of {limit}")]
    ThresholdTooLarge {
        field: String,
        actual: ByteSize,
        limit: ByteSize,
    },

    #[error("max_part_count must be between 1 and 10000, got {0}")]
    PartCountOutOfRange(u32),

    #[error("url_expiry_secs must be positive")]
    ZeroUrlExpiry,

    #[error("retry.max_attempts must be at least 1")]
    ZeroRetryAttempts,

    #[error("retry.timeout_ms must be positive")]
    ZeroTimeout,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let drivers = config.storage.all_drivers();

    if !drivers.contains_key(&config.storage.default_driver) {
        return Err(ValidationError::UnknownDefaultDriver(
            config.storage.default_driver.clone(),
        ));
    }

    let mut labels: HashMap<&str, &str> = HashMap::new();
    for (id, driver) in &drivers {
        validate_driver(id, driver)?;
        if let Some(first) = labels.insert(driver.label.as_str(), id.as_str()) {
            return Err(ValidationError::DuplicateLabel {
                label: driver.label.clone(),
                first: first.to_string(),
                second: id.clone(),
            });
        }
    }

    validate_upload(config)?;
    validate_retry(config)?;
    Ok(())
}

fn validate_driver(id: &str, driver: &DriverSettings) -> Result<(), ValidationError> {
    if identifier::validate_driver_id(id).is_err() {
        return Err(ValidationError::InvalidDriverId(id.to_string()));
    }
    if driver.label.trim().is_empty() {
        return Err(ValidationError::EmptyLabel {
            driver: id.to_string(),
        });
    }

    if matches!(driver.kind, DriverKindName::S3 | DriverKindName::Memory) {
        let bucket = driver
            .bucket
            .as_deref()
            .ok_or_else(|| ValidationError::MissingBucket {
                driver: id.to_string(),
            })?;
        if identifier::validate_bucket(bucket).is_err() {
            return Err(ValidationError::InvalidBucket {
                driver: id.to_string(),
                bucket: bucket.to_string(),
            });
        }
    }

    if let Some(endpoint) = &driver.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ValidationError::InvalidEndpoint {
                driver: id.to_string(),
                endpoint: endpoint.clone(),
            });
        }
    }

    if let Some(size) = driver.min_part_size {
        check_part_size(&format!("storage.drivers.{id}.min_part_size"), size)?;
    }
    if let Some(threshold) = driver.multipart_threshold {
        check_threshold(&format!("storage.drivers.{id}.multipart_threshold"), threshold)?;
    }
    Ok(())
}

fn validate_upload(config: &Config) -> Result<(), ValidationError> {
    let upload = &config.upload;
    check_part_size("upload.min_part_size", upload.min_part_size)?;
    check_threshold("upload.multipart_threshold", upload.multipart_threshold)?;

    if upload.max_part_count == 0 || upload.max_part_count > MAX_PART_COUNT {
        return Err(ValidationError::PartCountOutOfRange(upload.max_part_count));
    }
    if upload.url_expiry_secs == 0 {
        return Err(ValidationError::ZeroUrlExpiry);
    }
    Ok(())
}

fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    if config.retry.max_attempts == 0 {
        return Err(ValidationError::ZeroRetryAttempts);
    }
    if config.retry.timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout);
    }
    Ok(())
}

fn check_part_size(field: &str, size: ByteSize) -> Result<(), ValidationError> {
    let (min, max) = (ByteSize(PART_SIZE_GRANULARITY), ByteSize(MAX_PART_SIZE));
    if size < min || size > max {
        return Err(ValidationError::PartSizeOutOfRange {
            field: field.to_string(),
            actual: size,
            min,
            max,
        });
    }
    Ok(())
}

fn check_threshold(field: &str, threshold: ByteSize) -> Result<(), ValidationError> {
    if threshold.as_u64() > MAX_PART_SIZE {
        return Err(ValidationError::ThresholdTooLarge {
            field: field.to_string(),
            actual: threshold,
            limit: ByteSize(MAX_PART_SIZE),
        });
    }
    Ok(())
}
