//! `HttpResponseError` converts `anyhow::Error` at the exit point of the
//! HTTP layer: tagged errors surface their status code and user-facing
//! message, anything else is redacted to a 500.

use axum::response::{
    IntoResponse,
    Response,
};
use errors::{
    report_error,
    ErrorMetadataAnyhowExt,
};
use http::{
    header::CONTENT_TYPE,
    StatusCode,
};
use serde::Serialize;

pub struct HttpResponseError {
    trace: anyhow::Error,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for HttpResponseError {
    fn into_response(self) -> Response {
        // This is the exit point of the HTTP layer, so errors are logged
        // here and nowhere else.
        report_error(&self.trace);
        let status = self.trace.http_status();
        let body = serde_json::to_vec(&ErrorBody {
            message: &self.trace.user_facing_message(),
        })
        .unwrap_or_default();
        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

impl From<anyhow::Error> for HttpResponseError {
    fn from(err: anyhow::Error) -> HttpResponseError {
        HttpResponseError { trace: err }
    }
}

impl From<HttpResponseError> for anyhow::Error {
    fn from(value: HttpResponseError) -> Self {
        value.trace
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use errors::ErrorMetadata;
    use http::StatusCode;

    use super::HttpResponseError;

    #[test]
    fn tagged_error_surfaces_status() {
        let err: anyhow::Error = ErrorMetadata::bad_request(
            "InvalidProxyConfiguration",
            "invalid proxy configuration provided",
        )
        .into();
        let response = HttpResponseError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn untagged_error_is_500() {
        let err = anyhow::anyhow!("disk fell off");
        let response = HttpResponseError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
