use crate::server::{ContextValue, HandlerResult, HttpException};
use serde::Serialize;
use serde_json::Value;

/// The result of an action.
///
/// Structured results set the response status, headers and body directly.
/// Plain values are handed to the platform as the response body.
#[derive(Clone, Debug)]
pub enum ActionResult {
    /// A plain value written as the body.
    Value(ContextValue),
    /// Sets the response status only.
    Status(StatusCodeResult),
    /// Redirects to another location.
    Redirect(RedirectResult),
    /// Sets the response status and body.
    Content(ContentResult),
}

impl ActionResult {
    /// A result without a body.
    #[must_use]
    pub fn empty() -> Self {
        ActionResult::Value(ContextValue::Null)
    }

    /// A text body.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ActionResult::Value(ContextValue::text(text))
    }

    /// A serialized JSON body.
    pub fn json(value: impl Serialize) -> HandlerResult<Self> {
        let value = serde_json::to_value(value).map_err(|error| {
            HttpException::internal_server_error(error.to_string())
        })?;
        Ok(ActionResult::Value(ContextValue::Json(value)))
    }

    /// Sets the response status only.
    #[must_use]
    pub fn status(status: u16) -> Self {
        ActionResult::Status(StatusCodeResult { status })
    }

    /// Redirects to `location` with the default redirect status.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        ActionResult::Redirect(RedirectResult {
            location: location.into(),
            status: None,
        })
    }

    /// Redirects to `location` with a status.
    #[must_use]
    pub fn redirect_with(location: impl Into<String>, status: u16) -> Self {
        ActionResult::Redirect(RedirectResult {
            location: location.into(),
            status: Some(status),
        })
    }

    /// Sets the response status and body.
    #[must_use]
    pub fn content(status: u16, content: impl Into<ContextValue>) -> Self {
        ActionResult::Content(ContentResult {
            status,
            content: content.into(),
            content_type: None,
        })
    }
}

impl Default for ActionResult {
    fn default() -> Self {
        ActionResult::empty()
    }
}

impl From<()> for ActionResult {
    fn from(_: ()) -> Self {
        ActionResult::empty()
    }
}

impl From<String> for ActionResult {
    fn from(text: String) -> Self {
        ActionResult::text(text)
    }
}

impl From<&str> for ActionResult {
    fn from(text: &str) -> Self {
        ActionResult::text(text)
    }
}

impl From<Value> for ActionResult {
    fn from(value: Value) -> Self {
        ActionResult::Value(ContextValue::Json(value))
    }
}

impl From<ContextValue> for ActionResult {
    fn from(value: ContextValue) -> Self {
        ActionResult::Value(value)
    }
}

/// Sets the response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusCodeResult {
    /// The response status.
    pub status: u16,
}

/// Redirects to another location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectResult {
    /// The value of the `Location` header.
    pub location: String,
    /// The response status, or the configured default redirect status.
    pub status: Option<u16>,
}

/// Sets the response status and body.
#[derive(Clone, Debug)]
pub struct ContentResult {
    /// The response status.
    pub status: u16,
    /// The response body.
    pub content: ContextValue,
    /// The value of the `Content-Type` header, if it should be set.
    pub content_type: Option<String>,
}

impl ContentResult {
    /// Sets the `Content-Type` header of the response.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl From<ContentResult> for ActionResult {
    fn from(result: ContentResult) -> Self {
        ActionResult::Content(result)
    }
}
