use std::borrow::Cow;

use http::StatusCode;

/// ErrorMetadata can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It is a generic object used across the
/// codebase to tag errors with information that classifies them.
///
/// The msg is conveyed as a user facing error message if it makes it to the
/// client.
///
/// The short_msg is used as a tag - available for tests and for log
/// filtering - to have a message that is resilient to changes in copy.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching
    /// w/ a standard test helper. Eg DatasetNotFound
    pub short_msg: Cow<'static, str>,
    /// human readable - developer facing. Should be longer and descriptive.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthenticated,
    NotFound,
    /// A fullsync lease is held by someone else. Maps to 409.
    Conflict,
    /// A fullsync lease expired or was never opened. Maps to 410.
    Gone,
    /// A proxied remote or a token endpoint failed. Maps to 502.
    RemoteFailure,
    Overloaded,
    OperationalInternalServerError,
}

impl ErrorMetadata {
    /// Bad Request. Maps to 400 in HTTP.
    ///
    /// The short_msg should be CapitalCamelCased describing the error.
    /// The msg should be a descriptive message targeted toward the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Not authenticated. Maps to 401 in HTTP. Used to pass through
    /// authentication failures from proxied remotes.
    pub fn unauthenticated(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unauthenticated,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource not found. Maps to 404 in HTTP.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Conflicting lease or concurrent operation. Maps to 409 in HTTP.
    pub fn conflict(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Conflict,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The referenced resource existed but is permanently gone. Maps to 410.
    pub fn gone(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Gone,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A dependent remote service failed. Maps to 502 in HTTP.
    pub fn remote_failure(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::RemoteFailure,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The service is temporarily overloaded. Maps to 503 in HTTP.
    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Operational Internal Server Error (maps to 500 in HTTP).
    ///
    /// Produces a very general error message for the user. Should be used in
    /// situations where the error is caused by a known operational source of
    /// downtime (eg during a restart).
    pub fn operational_internal_server_error() -> Self {
        Self {
            code: ErrorCode::OperationalInternalServerError,
            short_msg: INTERNAL_SERVER_ERROR.into(),
            msg: INTERNAL_SERVER_ERROR_MSG.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.code == ErrorCode::Conflict
    }

    pub fn is_gone(&self) -> bool {
        self.code == ErrorCode::Gone
    }
}

impl ErrorCode {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Gone => StatusCode::GONE,
            ErrorCode::RemoteFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::OperationalInternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";

/// Helpers for reading an `ErrorMetadata` tag back out of an anyhow chain.
pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_conflict(&self) -> bool;
    fn is_gone(&self) -> bool;
    fn user_facing_message(&self) -> String;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn http_status(&self) -> StatusCode;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_bad_request();
        }
        false
    }

    fn is_not_found(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_not_found();
        }
        false
    }

    fn is_conflict(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_conflict();
        }
        false
    }

    fn is_gone(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_gone();
        }
        false
    }

    /// Message to show the user. Redacted to only show messages from tagged
    /// errors. Don't show internal errors to the user.
    fn user_facing_message(&self) -> String {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.msg.to_string();
        }
        INTERNAL_SERVER_ERROR_MSG.to_string()
    }

    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_SERVER_ERROR
    }

    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_SERVER_ERROR_MSG
    }

    fn http_status(&self) -> StatusCode {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.code.http_status_code();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Log an internal error at the exit point of the request layer. Tagged
/// errors are expected flow control and only logged at debug.
pub fn report_error(err: &anyhow::Error) {
    if err.downcast_ref::<ErrorMetadata>().is_some() {
        tracing::debug!("Rejected request: {err}");
    } else {
        tracing::error!("Internal error: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::{
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
    };

    #[test]
    fn tagged_error_survives_context_chain() {
        let err: anyhow::Error = anyhow::anyhow!("underlying io issue")
            .context(ErrorMetadata::not_found("DatasetNotFound", "dataset bananas not found"));
        let err = err.context("while serving GET /datasets/bananas");
        assert!(err.is_not_found());
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(err.short_msg(), "DatasetNotFound");
        assert_eq!(err.user_facing_message(), "dataset bananas not found");
    }

    #[test]
    fn untagged_error_is_redacted() {
        let err = anyhow::anyhow!("secret internal detail");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_facing_message().contains("secret"));
    }
}
