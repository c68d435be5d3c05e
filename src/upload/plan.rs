use crate::config::UploadConfig;
use crate::drivers::DriverConfig;
use crate::humanize::{GIB, MIB};
use crate::{Error, Result};

/// Part sizes are multiples of this (S3's minimum part size)
pub const PART_SIZE_GRANULARITY: u64 = 5 * MIB;
/// Largest part, and largest single PUT, S3 accepts
pub const MAX_PART_SIZE: u64 = 5 * GIB;
/// Most parts one multipart upload may have
pub const MAX_PART_COUNT: u32 = 10_000;

/// Effective limits for one driver: `[upload]` with the driver's overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub multipart_threshold: u64,
    pub min_part_size: u64,
    pub max_part_count: u32,
}

impl PlanLimits {
    pub fn for_driver(upload: &UploadConfig, driver: &DriverConfig) -> Self {
        Self {
            multipart_threshold: driver
                .multipart_threshold
                .unwrap_or(upload.multipart_threshold.as_u64()),
            min_part_size: driver
                .min_part_size
                .unwrap_or(upload.min_part_size.as_u64()),
            max_part_count: upload.max_part_count,
        }
    }
}

/// How a declared size will be uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    /// One presigned PUT of the whole object
    SinglePart { size: u64 },
    Multipart {
        size: u64,
        part_size: u64,
        part_count: u32,
    },
}

impl UploadPlan {
    /// Declared size of the whole object.
    pub fn size(&self) -> u64 {
        match *self {
            UploadPlan::SinglePart { size } | UploadPlan::Multipart { size, .. } => size,
        }
    }

    /// Size of each presigned URL's payload (the last part may be shorter).
    pub fn part_size(&self) -> u64 {
        match *self {
            UploadPlan::SinglePart { size } => size,
            UploadPlan::Multipart { part_size, .. } => part_size,
        }
    }

    pub fn part_count(&self) -> u32 {
        match *self {
            UploadPlan::SinglePart { .. } => 1,
            UploadPlan::Multipart { part_count, .. } => part_count,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, UploadPlan::Multipart { .. })
    }
}

/// Choose single-part or multipart for `declared_size`.
///
/// Multipart part size is `max(min_part_size, ceil(size / max_part_count))`
/// rounded up to [`PART_SIZE_GRANULARITY`]; sizes needing parts above
/// [`MAX_PART_SIZE`] are rejected.
pub fn plan_upload(declared_size: Option<u64>, limits: &PlanLimits) -> Result<UploadPlan> {
    let size = match declared_size {
        Some(size) if size > 0 => size,
        Some(_) => {
            return Err(Error::Validation(
                "declared size must be greater than zero".into(),
            ));
        }
        None => return Err(Error::Validation("declared size is required".into())),
    };

    if size <= limits.multipart_threshold.min(MAX_PART_SIZE) {
        return Ok(UploadPlan::SinglePart { size });
    }

    let max_count = u64::from(limits.max_part_count.clamp(1, MAX_PART_COUNT));
    let part_size = limits
        .min_part_size
        .max(size.div_ceil(max_count))
        .div_ceil(PART_SIZE_GRANULARITY)
        * PART_SIZE_GRANULARITY;

    if part_size > MAX_PART_SIZE {
        return Err(Error::Validation(format!(
            "declared size {size} needs parts of {part_size} bytes, above the {MAX_PART_SIZE} byte limit"
        )));
    }

    let part_count = u32::try_from(size.div_ceil(part_size))
        .map_err(|_| Error::Validation(format!("declared size {size} needs too many parts")))?;

    Ok(UploadPlan::Multipart {
        size,
        part_size,
        part_count,
    })
}
