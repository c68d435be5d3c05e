use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::plan::{PlanLimits, UploadPlan, plan_upload};
use super::session::{PartUrl, SessionTable, UploadSession};
use crate::config::UploadConfig;
use crate::drivers::{DatasetTarget, DriverRegistry};
use crate::identifier::{StorageIdentifier, derive_key};
use crate::observability::Metrics;
use crate::storage::{CompletedPart, PartTarget};
use crate::{Error, Result};

/// Issues presigned upload URLs and manages the multipart uploads behind them
pub struct UploadCoordinator {
    registry: Arc<DriverRegistry>,
    config: UploadConfig,
    sessions: Arc<SessionTable>,
    metrics: Arc<Metrics>,
}

impl UploadCoordinator {
    pub fn new(
        registry: Arc<DriverRegistry>,
        config: UploadConfig,
        sessions: Arc<SessionTable>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            config,
            sessions,
            metrics,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Mint upload URLs for a new file of `declared_size` bytes in the dataset.
    ///
    /// Up to the driver's multipart threshold this is one presigned PUT;
    /// above it, a multipart upload is opened and every part is presigned.
    /// Each call derives a fresh key, so concurrent sessions never share one.
    pub async fn request_upload_urls(
        &self,
        target: &DatasetTarget,
        declared_size: Option<u64>,
    ) -> Result<UploadSession> {
        let driver = &target.driver;
        if !driver.allows_direct_upload() {
            return Err(Error::Unsupported(format!(
                "driver '{}' does not accept direct uploads; stream the file through the server",
                driver.id()
            )));
        }

        let limits = PlanLimits::for_driver(&self.config, &driver.config);
        let plan = plan_upload(declared_size, &limits)?;

        let key = derive_key();
        let storage_identifier = target.identifier(&key)?;
        let object_key = target.object_key(&key);
        let expiry = self.config.url_expiry();
        let lifetime = chrono::Duration::from_std(expiry)
            .map_err(|_| Error::Configuration(format!("URL expiry {expiry:?} is out of range")))?;
        let started = Instant::now();

        let (upload_id, urls) = match plan {
            UploadPlan::SinglePart { .. } => {
                let url = driver
                    .client
                    .presigned_put_url(&object_key, expiry, None)
                    .await?;
                (None, vec![PartUrl { part_number: 1, url }])
            }
            UploadPlan::Multipart { part_count, .. } => {
                let upload_id = driver.client.create_multipart_upload(&object_key).await?;
                match self
                    .presign_parts(target, &object_key, &upload_id, part_count)
                    .await
                {
                    Ok(urls) => (Some(upload_id), urls),
                    Err(err) => {
                        if let Err(abort_err) = driver
                            .client
                            .abort_multipart_upload(&object_key, &upload_id)
                            .await
                        {
                            warn!(
                                driver = %driver.id(),
                                key = %object_key,
                                upload_id = %upload_id,
                                error = %abort_err,
                                "Failed to abort multipart upload after presign failure"
                            );
                        }
                        return Err(err);
                    }
                }
            }
        };

        let issued_at = Utc::now();
        let session = UploadSession {
            dataset: target.dataset,
            storage_identifier,
            object_key,
            declared_size: plan.size(),
            part_size: plan.part_size(),
            upload_id,
            urls,
            issued_at,
            expires_at: issued_at + lifetime,
        };

        info!(
            driver = %driver.id(),
            dataset = %target.dataset,
            storage_identifier = %session.storage_identifier,
            size = session.declared_size,
            parts = plan.part_count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Issued upload URLs"
        );

        self.sessions.insert(session.clone());
        self.metrics.upload_session_issued(plan.is_multipart());
        Ok(session)
    }

    async fn presign_parts(
        &self,
        target: &DatasetTarget,
        object_key: &str,
        upload_id: &str,
        part_count: u32,
    ) -> Result<Vec<PartUrl>> {
        let expiry = self.config.url_expiry();
        let mut urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count {
            let part = PartTarget {
                upload_id: upload_id.to_string(),
                part_number,
            };
            let url = target
                .driver
                .client
                .presigned_put_url(object_key, expiry, Some(&part))
                .await?;
            urls.push(PartUrl { part_number, url });
        }
        Ok(urls)
    }

    /// Assemble the uploaded parts into the final object.
    ///
    /// The session stays in the table so the later commit can still read its
    /// declared size.
    pub async fn complete_multipart(
        &self,
        target: &DatasetTarget,
        identifier: &StorageIdentifier,
        upload_id: &str,
        mut parts: Vec<CompletedPart>,
    ) -> Result<()> {
        target.check_owns(identifier)?;
        self.check_session(identifier, upload_id)?;
        if parts.is_empty() {
            return Err(Error::Validation("no parts to complete".into()));
        }
        parts.sort_by_key(|p| p.part_number);

        let object_key = target.object_key(identifier.key());
        let count = parts.len();
        target
            .driver
            .client
            .complete_multipart_upload(&object_key, upload_id, parts)
            .await?;

        info!(
            driver = %target.driver.id(),
            storage_identifier = %identifier,
            upload_id,
            parts = count,
            "Completed multipart upload"
        );
        Ok(())
    }

    /// Abandon a multipart upload and forget its session.
    pub async fn abort_multipart(
        &self,
        target: &DatasetTarget,
        identifier: &StorageIdentifier,
        upload_id: &str,
    ) -> Result<()> {
        target.check_owns(identifier)?;
        self.check_session(identifier, upload_id)?;

        let object_key = target.object_key(identifier.key());
        target
            .driver
            .client
            .abort_multipart_upload(&object_key, upload_id)
            .await?;
        self.sessions.take(identifier);

        info!(
            driver = %target.driver.id(),
            storage_identifier = %identifier,
            upload_id,
            "Aborted multipart upload"
        );
        Ok(())
    }

    /// Abort every multipart session expired at `now` and forget all expired
    /// sessions. Returns how many multipart uploads were aborted.
    ///
    /// Not scheduled here; an operational sweep calls it.
    pub async fn abort_expired(&self, now: DateTime<Utc>) -> usize {
        let mut aborted = 0;
        for session in self.sessions.drain_expired(now) {
            let Some(upload_id) = &session.upload_id else {
                continue;
            };
            let driver = match self.registry.get(session.storage_identifier.driver_id()) {
                Ok(driver) => driver,
                Err(err) => {
                    warn!(storage_identifier = %session.storage_identifier, error = %err, "Cannot abort expired upload");
                    continue;
                }
            };
            match driver
                .client
                .abort_multipart_upload(&session.object_key, upload_id)
                .await
            {
                Ok(()) => aborted += 1,
                Err(err) => warn!(
                    driver = %driver.id(),
                    storage_identifier = %session.storage_identifier,
                    upload_id = %upload_id,
                    error = %err,
                    "Failed to abort expired multipart upload"
                ),
            }
        }
        if aborted > 0 {
            info!(aborted, "Aborted expired multipart uploads");
        }
        aborted
    }

    /// A known session must carry the same upload id; an unknown one (expired
    /// or issued before a restart) is left to the backend to judge.
    fn check_session(&self, identifier: &StorageIdentifier, upload_id: &str) -> Result<()> {
        match self.sessions.get(identifier) {
            Some(session) if session.upload_id.as_deref() != Some(upload_id) => {
                Err(Error::Conflict(format!(
                    "upload id {upload_id} does not belong to {identifier}"
                )))
            }
            _ => Ok(()),
        }
    }
}
