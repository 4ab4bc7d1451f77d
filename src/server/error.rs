use crate::{server::{HttpException, PlatformError}, InjectError};
use derive_more::Display;
use std::error::Error;

/// A result of a request pipeline step.
pub type HandlerResult<T> = Result<T, RequestError>;

/// An error raised while handling a request. Request errors never escape the
/// request they were raised in.
#[derive(Debug, Display)]
pub enum RequestError {
    /// An error carrying an HTTP status.
    #[display(fmt = "{}", _0)]
    Http(HttpException),
    /// A dependency could not be resolved.
    #[display(fmt = "{}", _0)]
    Inject(InjectError),
    /// The platform failed to read or write the request context.
    #[display(fmt = "{}", _0)]
    Platform(PlatformError),
    /// Any other application error.
    #[display(fmt = "{}", _0)]
    Application(Box<dyn Error + Send + Sync + 'static>),
}

impl RequestError {
    /// Wraps an application error.
    pub fn application(
        error: impl Into<Box<dyn Error + Send + Sync + 'static>>,
    ) -> Self {
        RequestError::Application(error.into())
    }

    /// The HTTP exception, if this is one.
    #[must_use]
    pub fn as_http(&self) -> Option<&HttpException> {
        match self {
            RequestError::Http(exception) => Some(exception),
            _ => None,
        }
    }
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RequestError::Http(error) => Some(error),
            RequestError::Inject(error) => Some(error),
            RequestError::Platform(error) => Some(error),
            RequestError::Application(error) => Some(error.as_ref()),
        }
    }
}

impl From<HttpException> for RequestError {
    fn from(exception: HttpException) -> Self {
        RequestError::Http(exception)
    }
}

impl From<InjectError> for RequestError {
    fn from(error: InjectError) -> Self {
        RequestError::Inject(error)
    }
}

impl From<PlatformError> for RequestError {
    fn from(error: PlatformError) -> Self {
        RequestError::Platform(error)
    }
}
