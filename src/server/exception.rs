use derive_more::Display;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;

/// An error carrying an HTTP status. When an action or filter fails with one,
/// the response is its JSON serialization with a matching status.
///
/// ```
/// use scoped_injector::server::HttpException;
///
/// let exception = HttpException::not_found("Not Found");
/// assert_eq!(
///     r#"{"errorCode":404,"description":"Not Found","message":"Not Found"}"#,
///     exception.to_json().unwrap()
/// );
/// ```
#[derive(Clone, Debug, Display, Serialize)]
#[display(fmt = "{} {}: {}", error_code, description, message)]
#[serde(rename_all = "camelCase")]
pub struct HttpException {
    error_code: u16,
    description: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
}

impl HttpException {
    /// Creates an exception. The description is the reason phrase of the
    /// status, or the message for unknown statuses.
    #[must_use]
    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        HttpException {
            error_code,
            description: reason_phrase(error_code)
                .map_or_else(|| message.clone(), String::from),
            message,
            content: None,
        }
    }

    /// Replaces the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attaches structured content.
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    /// A 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        HttpException::new(400, message)
    }

    /// A 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        HttpException::new(401, message)
    }

    /// A 403 Forbidden.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        HttpException::new(403, message)
    }

    /// A 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        HttpException::new(404, message)
    }

    /// A 500 Internal Server Error.
    #[must_use]
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        HttpException::new(500, message)
    }

    /// The response status.
    #[must_use]
    pub fn error_code(&self) -> u16 {
        self.error_code
    }

    /// A short description of the status.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The structured content, if any.
    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    /// Serializes the exception into its response body.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Error for HttpException {}

/// Gets the standard reason phrase of an HTTP status.
#[must_use]
pub fn reason_phrase(status: u16) -> Option<&'static str> {
    let phrase = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return None,
    };
    Some(phrase)
}
