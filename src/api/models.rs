//! Wire types of the HTTP boundary
//!
//! Successful responses are wrapped as `{"status":"OK","data":...}`, errors
//! as `{"status":"ERROR","code":...,"message":...}`. Field names follow the
//! repository's existing clients (`storageIdentifier`, `partSize`, `fileName`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::DatasetId;
use crate::ingest::{Checksum, FileMetadata};
use crate::ledger::LedgerStats;
use crate::observability::MetricsSnapshot;
use crate::upload::UploadSession;

/// Path of the multipart completion and abort endpoints
pub const MULTIPART_PATH: &str = "/api/datasets/mpupload";

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { status: "OK", data }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `?persistentId=` on dataset routes addressed as `:persistentId`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetQuery {
    pub persistent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlsQuery {
    pub size: Option<u64>,
    pub persistent_id: Option<String>,
}

/// Upload capability as returned to clients
///
/// A single-part session carries `url`; a multipart one carries `urls`
/// keyed by part number plus the links that complete or abort it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<String>,
    pub part_size: u64,
    pub storage_identifier: String,
    pub expires_at: String,
}

impl UploadUrlsResponse {
    pub fn from_session(session: &UploadSession, global_id: &str) -> Self {
        let storage_identifier = session.storage_identifier.to_string();
        let expires_at = session.expires_at.to_rfc3339();

        match (&session.upload_id, session.single_url()) {
            (None, Some(url)) => Self {
                url: Some(url.to_string()),
                urls: None,
                abort: None,
                complete: None,
                part_size: session.part_size,
                storage_identifier,
                expires_at,
            },
            (upload_id, _) => {
                let link = upload_id
                    .as_deref()
                    .map(|id| multipart_link(global_id, id, &storage_identifier));
                Self {
                    url: None,
                    urls: Some(
                        session
                            .urls
                            .iter()
                            .map(|p| (p.part_number.to_string(), p.url.clone()))
                            .collect(),
                    ),
                    abort: link.clone(),
                    complete: link,
                    part_size: session.part_size,
                    storage_identifier,
                    expires_at,
                }
            }
        }
    }
}

/// `/api/datasets/mpupload?globalid=..&uploadid=..&storageidentifier=..`
pub fn multipart_link(global_id: &str, upload_id: &str, storage_identifier: &str) -> String {
    format!(
        "{MULTIPART_PATH}?globalid={}&uploadid={}&storageidentifier={}",
        urlencoding::encode(global_id),
        urlencoding::encode(upload_id),
        urlencoding::encode(storage_identifier)
    )
}

#[derive(Debug, Deserialize)]
pub struct MultipartQuery {
    pub globalid: String,
    pub uploadid: String,
    pub storageidentifier: String,
}

/// Body of `POST /api/datasets/{id}/add`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFileRequest {
    pub storage_identifier: String,
    pub file_name: String,
    #[serde(default)]
    pub directory_label: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "flag")]
    pub restrict: bool,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub checksum: Checksum,
}

/// A JSON bool, or the string `"true"`/`"false"` that older clients send.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected true or false, got `{other}`"
            ))),
        },
    }
}

impl AddFileRequest {
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            file_name: self.file_name.clone(),
            directory_label: self.directory_label.clone(),
            mime_type: self.mime_type.clone(),
            description: self.description.clone(),
            categories: self.categories.clone(),
            restricted: self.restrict,
        }
    }
}

/// Query of the non-direct upload endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub file_name: String,
    pub directory_label: Option<String>,
    pub mime_type: Option<String>,
    pub persistent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub alias: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionCreated {
    pub alias: String,
    pub parent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetRequest {
    pub persistent_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCreated {
    pub id: DatasetId,
    pub persistent_id: String,
    pub storage_driver: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub drivers: usize,
    pub pending_uploads: usize,
    pub ledger: LedgerStats,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::StorageIdentifier;
    use crate::upload::PartUrl;
    use chrono::{Duration, Utc};

    fn session(upload_id: Option<&str>, parts: u32) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            dataset: DatasetId(1),
            storage_identifier: StorageIdentifier::object_store("localstack1", "mybucket", "k1")
                .unwrap(),
            object_key: "10.5072/FK2/ABC/k1".into(),
            declared_size: 12,
            part_size: 6,
            upload_id: upload_id.map(str::to_string),
            urls: (1..=parts)
                .map(|n| PartUrl {
                    part_number: n,
                    url: format!("http://s3/k1?partNumber={n}"),
                })
                .collect(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn test_single_part_response_has_url_only() {
        let response = UploadUrlsResponse::from_session(&session(None, 1), "doi:10.5072/FK2/ABC");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["url"], "http://s3/k1?partNumber=1");
        assert_eq!(json["storageIdentifier"], "localstack1://mybucket:k1");
        assert!(json.get("urls").is_none());
        assert!(json.get("complete").is_none());
    }

    #[test]
    fn test_multipart_response_links_are_encoded() {
        let response =
            UploadUrlsResponse::from_session(&session(Some("up/1"), 2), "doi:10.5072/FK2/ABC");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["urls"]["2"], "http://s3/k1?partNumber=2");
        assert_eq!(
            json["complete"],
            "/api/datasets/mpupload?globalid=doi%3A10.5072%2FFK2%2FABC&uploadid=up%2F1&storageidentifier=localstack1%3A%2F%2Fmybucket%3Ak1"
        );
        assert_eq!(json["abort"], json["complete"]);
    }

    #[test]
    fn test_add_file_request_accepts_ld_checksum() {
        let body = r#"{
            "storageIdentifier": "minio1://mybucket:k1",
            "fileName": "file1.txt",
            "mimeType": "text/plain",
            "restrict": true,
            "checksum": {"@type": "SHA-1", "@value": "abc123"}
        }"#;
        let request: AddFileRequest = serde_json::from_str(body).unwrap();
        let metadata = request.metadata();

        assert_eq!(metadata.file_name, "file1.txt");
        assert!(metadata.restricted);
        assert_eq!(request.checksum.value, "abc123");
        assert_eq!(request.file_size, None);
    }

    #[test]
    fn test_add_file_request_accepts_string_restrict_flag() {
        let body = r#"{
    "description": "My description.",
    "directoryLabel": "data/subdir1",
    "categories": [
      "Data"
    ],
    "restrict": "false",
    "storageIdentifier": "localstack1://mybucket:18b8c06688c-21b8320a3ee5",
    "fileName": "file1.txt",
    "mimeType": "text/plain",
    "checksum": {
      "@type": "SHA-1",
      "@value": "123456"
    }
}"#;
        let request: AddFileRequest = serde_json::from_str(body).unwrap();
        let metadata = request.metadata();

        assert!(!metadata.restricted);
        assert_eq!(metadata.directory_label.as_deref(), Some("data/subdir1"));
        assert_eq!(metadata.categories, vec!["Data"]);
        assert_eq!(request.file_size, None);

        let restricted: AddFileRequest = serde_json::from_str(
            r#"{"storageIdentifier": "s", "fileName": "f", "restrict": "TRUE",
                "checksum": {"@type": "MD5", "@value": "ab"}}"#,
        )
        .unwrap();
        assert!(restricted.restrict);
    }

    #[test]
    fn test_add_file_request_rejects_unknown_restrict_flag() {
        let result = serde_json::from_str::<AddFileRequest>(
            r#"{"storageIdentifier": "s", "fileName": "f", "restrict": "maybe",
                "checksum": {"@type": "MD5", "@value": "ab"}}"#,
        );
        assert!(result.is_err());
    }
}
