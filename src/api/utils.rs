//! API utility functions
//!
//! Pure, stateless helpers for request processing, kept out of the
//! handlers so they can be unit tested.

use std::collections::BTreeMap;

use axum::body::{Body, Bytes};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::api::error::ApiError;
use crate::catalog::{Catalog, DatasetId};
use crate::identifier::PersistentId;
use crate::storage::CompletedPart;

/// Path segment that defers the dataset to `?persistentId=`
pub const PERSISTENT_ID_SEGMENT: &str = ":persistentId";

/// Parses and validates Content-Type header for application/json
///
/// Accepts:
/// - `application/json`
/// - `application/json; charset=utf-8`
///
/// Rejects:
/// - `application/jsonp`
/// - `application/json-patch+json`
/// - `text/json`
/// - Malformed media types
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Collects a request body, giving up as soon as it grows past `max_size`
pub async fn read_limited_body(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge(max_size))
        }
        Err(err) => Err(ApiError::InvalidPayload(format!(
            "failed to read body: {err}"
        ))),
    }
}

/// Resolve a `{id}` path segment: a numeric dataset id, or `:persistentId`
/// together with the `persistentId` query parameter.
pub fn resolve_dataset(
    catalog: &Catalog,
    segment: &str,
    persistent_id: Option<&str>,
) -> Result<DatasetId, ApiError> {
    if segment == PERSISTENT_ID_SEGMENT {
        let raw = persistent_id.ok_or_else(|| {
            ApiError::InvalidPayload("persistentId query parameter is required".into())
        })?;
        let pid: PersistentId = raw.parse()?;
        return Ok(catalog.dataset_by_persistent_id(&pid)?.id);
    }

    let id = segment
        .parse::<u64>()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid dataset id '{segment}'")))?;
    Ok(catalog.dataset(DatasetId(id))?.id)
}

/// Turn a `{"1": "etag", ...}` completion body into parts.
pub fn parse_completed_parts(body: BTreeMap<String, String>) -> Result<Vec<CompletedPart>, ApiError> {
    body.into_iter()
        .map(|(number, e_tag)| {
            let part_number = number
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| ApiError::InvalidPayload(format!("invalid part number '{number}'")))?;
            if e_tag.is_empty() {
                return Err(ApiError::InvalidPayload(format!(
                    "part {part_number} has an empty ETag"
                )));
            }
            Ok(CompletedPart { part_number, e_tag })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_type_valid() {
        assert!(parse_content_type("application/json").is_ok());
        assert!(parse_content_type("application/json; charset=utf-8").is_ok());
        assert!(parse_content_type("application/json; charset=UTF-8").is_ok());
    }

    #[test]
    fn test_parse_content_type_invalid() {
        assert!(parse_content_type("application/jsonp").is_err());
        assert!(parse_content_type("application/json-patch+json").is_err());
        assert!(parse_content_type("text/json").is_err());
        assert!(parse_content_type("text/plain").is_err());
        assert!(parse_content_type("invalid").is_err());
        assert!(parse_content_type("").is_err());
    }

    #[tokio::test]
    async fn test_read_limited_body() {
        let data = read_limited_body(Body::from(vec![0u8; 1000]), 1000)
            .await
            .unwrap();
        assert_eq!(data.len(), 1000);
        assert!(read_limited_body(Body::empty(), 100).await.unwrap().is_empty());

        match read_limited_body(Body::from(vec![0u8; 1000]), 999).await {
            Err(ApiError::PayloadTooLarge(limit)) => assert_eq!(limit, 999),
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_dataset_by_number_and_pid() {
        let mut catalog = Catalog::new();
        let id = catalog
            .create_dataset(catalog.root(), "doi:10.5072/FK2/ABC123".parse().unwrap())
            .unwrap();

        assert_eq!(resolve_dataset(&catalog, "1", None).unwrap(), id);
        assert_eq!(
            resolve_dataset(&catalog, ":persistentId", Some("doi:10.5072/FK2/ABC123")).unwrap(),
            id
        );
        assert_eq!(
            resolve_dataset(&catalog, "7", None).unwrap_err().status_code(),
            axum::http::StatusCode::NOT_FOUND
        );
        assert!(matches!(
            resolve_dataset(&catalog, ":persistentId", None),
            Err(ApiError::InvalidPayload(_))
        ));
        assert!(matches!(
            resolve_dataset(&catalog, "abc", None),
            Err(ApiError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_completed_parts() {
        let body = BTreeMap::from([
            ("2".to_string(), "\"e2\"".to_string()),
            ("1".to_string(), "\"e1\"".to_string()),
        ]);
        let parts = parse_completed_parts(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);

        let zero = BTreeMap::from([("0".to_string(), "e".to_string())]);
        assert!(parse_completed_parts(zero).is_err());
        let empty_tag = BTreeMap::from([("1".to_string(), String::new())]);
        assert!(parse_completed_parts(empty_tag).is_err());
    }
}
