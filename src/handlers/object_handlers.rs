//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use super::{S3_XMLNS, xml_escape, xml_response};
use crate::{
    errors::AppError,
    models::object::ObjectRecord,
    services::storage_service::{ListObjectsParams, ListObjectsResult, MAX_LIST_KEYS, StorageService},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::SecondsFormat;
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Query params accepted by the object listing.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

/// PUT `/{bucket}/{key}` — upload (or overwrite) an object.
pub async fn upload_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    body: Body,
) -> Result<Response, AppError> {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = service.put_object_stream(&bucket, &key, stream).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&object.modified_at.to_rfc2822()) {
        response.headers_mut().insert(header::LAST_MODIFIED, value);
    }
    Ok(response)
}

/// GET `/{bucket}/{key}` — download an object as a streaming response.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = service.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{bucket}/{key}` — same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = service.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/{bucket}/{key}`
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/{bucket}` — list objects, supports ?prefix=&max-keys=&continuation-token=&start-after=
pub async fn list_objects(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Response, AppError> {
    let continuation_decoded = match q.continuation_token.as_deref() {
        Some(token) => Some(decode_continuation_token(token).ok_or_else(|| {
            AppError::bad_request("InvalidArgument", "malformed continuation token")
        })?),
        None => None,
    };

    let params = ListObjectsParams {
        prefix: q.prefix.clone(),
        continuation_token: continuation_decoded,
        start_after: q.start_after.clone(),
        max_keys: q.max_keys.unwrap_or(MAX_LIST_KEYS).clamp(1, MAX_LIST_KEYS),
    };

    let result = service.list_objects(&bucket, params.clone()).await?;
    let xml = build_list_objects_xml(&bucket, &params, q.continuation_token.as_deref(), &result);
    Ok(xml_response(StatusCode::OK, xml))
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
    if let Ok(value) = HeaderValue::from_str(&meta.modified_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn build_list_objects_xml(
    bucket: &str,
    params: &ListObjectsParams,
    continuation_token: Option<&str>,
    result: &ListObjectsResult,
) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="{}">"#,
        S3_XMLNS
    );
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!(
        "<Prefix>{}</Prefix>",
        xml_escape(params.prefix.as_deref().unwrap_or(""))
    ));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", params.max_keys));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", result.objects.len()));
    if let Some(token) = continuation_token {
        xml.push_str(&format!(
            "<ContinuationToken>{}</ContinuationToken>",
            xml_escape(token)
        ));
    }
    if let Some(sa) = params.start_after.as_deref() {
        xml.push_str(&format!("<StartAfter>{}</StartAfter>", xml_escape(sa)));
    }
    xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));
    if let Some(next) = &result.next_continuation_token {
        xml.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            xml_escape(&encode_continuation_token(next))
        ));
    }

    for obj in &result.objects {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.key)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            obj.modified_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        xml.push_str(&format!("<Size>{}</Size>", obj.size));
        xml.push_str(&format!(
            "<ContentType>{}</ContentType>",
            xml_escape(&obj.content_type)
        ));
        xml.push_str("</Contents>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> Option<String> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_tokens_are_opaque_but_reversible() {
        let token = encode_continuation_token("report.2024.pdf");
        assert_ne!(token, "report.2024.pdf");
        assert_eq!(
            decode_continuation_token(&token).as_deref(),
            Some("report.2024.pdf")
        );
        assert_eq!(decode_continuation_token("not base64!"), None);
    }
}
