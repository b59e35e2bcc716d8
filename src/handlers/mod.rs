//! axum handlers. They translate HTTP requests into `StorageService` calls
//! and render the typed results; no storage logic lives here.

pub mod bucket_handlers;
pub mod health_handlers;
pub mod object_handlers;

pub(crate) const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

pub(crate) fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub(crate) fn xml_response(status: axum::http::StatusCode, xml: String) -> axum::response::Response {
    use axum::{
        body::Body,
        http::{HeaderValue, header},
        response::Response,
    };

    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    *response.status_mut() = status;
    response
}
