#![allow(clippy::used_underscore_binding)]

use crate::{service::join_names, Identifier};
use derive_more::Display;
use std::error::Error;

/// A result from attempting to register, compile or resolve a dependency.
pub type InjectResult<T> = Result<T, InjectError>;

/// An error that has occurred while registering, composing or creating a
/// service.
#[derive(Debug, Display)]
#[non_exhaustive]
pub enum InjectError {
    /// The identifier already has a definition in the container.
    #[display(
        fmt = "{} is already registered in container '{}'",
        identifier,
        container
    )]
    AlreadyRegistered {
        /// The identifier that was registered twice.
        identifier: Identifier,
        /// The name of the container holding the first registration.
        container: String,
    },

    /// The requested identifier has no reachable definition.
    #[display(fmt = "{} is not registered", identifier)]
    NotRegistered {
        /// The identifier that was requested.
        identifier: Identifier,
    },

    /// A non-optional dependency somewhere below the requested identifier has
    /// no reachable definition. The path starts at the requested identifier
    /// and ends at the missing one.
    #[display(
        fmt = "Error composing {}. {} is not registered",
        "join_names(path, \" < \")",
        "fmt_last(path)"
    )]
    MissingDependency {
        /// The chain of identifiers leading to the missing dependency.
        path: Vec<Identifier>,
    },

    /// A cycle of non-deferred dependencies was found while compiling a
    /// dependency graph. The first and last entries are the same identifier.
    #[display(
        fmt = "Circular dependency detected: {}",
        "join_names(cycle, \" > \")"
    )]
    CircularDependency {
        /// The identifiers forming the cycle.
        cycle: Vec<Identifier>,
    },

    /// No dependency graph node exists for the identifier at resolution time.
    #[display(fmt = "Unknown type: {}", identifier)]
    UnknownType {
        /// The identifier that was resolved.
        identifier: Identifier,
    },

    /// A value was requested as a type it does not have.
    #[display(
        fmt = "the value provided for {} is not a {}",
        identifier,
        expected
    )]
    InvalidProvider {
        /// The identifier whose value had the wrong type.
        identifier: Identifier,
        /// The type name that was expected.
        expected: &'static str,
    },

    /// A constructor, factory or property setter returned an error.
    #[display(fmt = "an error occurred during activation of {}", identifier)]
    ActivationFailed {
        /// The identifier being activated.
        identifier: Identifier,
        /// The error returned during activation.
        inner: Box<dyn Error + Send + Sync + 'static>,
    },

    /// An asynchronous factory was reached by a synchronous resolution.
    #[display(
        fmt = "{} needs an asynchronous factory and must be resolved asynchronously",
        identifier
    )]
    AsyncRequired {
        /// The identifier that was being resolved.
        identifier: Identifier,
    },

    /// The identifier was never registered in the module catalog.
    #[display(fmt = "{} is not registered as a module", identifier)]
    NotAModule {
        /// The identifier that was looked up.
        identifier: Identifier,
    },

    /// The identifier was never registered in the controller catalog.
    #[display(fmt = "{} is not registered as a controller", identifier)]
    NotAController {
        /// The identifier that was looked up.
        identifier: Identifier,
    },

    /// The platform was used before its root module was bootstrapped.
    #[display(fmt = "the platform has not been bootstrapped")]
    NotBootstrapped,

    /// An unexpected error has occurred. This is usually caused by a bug in
    /// the library itself.
    #[display(fmt = "an unexpected error occurred: {}", _0)]
    InternalError(String),
}

impl InjectError {
    /// Wraps an arbitrary error raised while activating `identifier`.
    pub fn activation_failed(
        identifier: Identifier,
        inner: impl Into<Box<dyn Error + Send + Sync + 'static>>,
    ) -> Self {
        InjectError::ActivationFailed {
            identifier,
            inner: inner.into(),
        }
    }
}

impl Error for InjectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InjectError::ActivationFailed { inner, .. } => Some(inner.as_ref()),
            _ => None,
        }
    }
}

fn fmt_last(path: &[Identifier]) -> &str {
    path.last().map_or("<unknown>", Identifier::name)
}

#[cfg(test)]
mod tests {
    use super::InjectError;
    use crate::Identifier;
    use std::error::Error;

    struct Car;
    struct Engine;
    struct Piston;

    #[test]
    fn missing_dependency_names_full_path() {
        let error = InjectError::MissingDependency {
            path: vec![
                Identifier::of::<Car>(),
                Identifier::of::<Engine>(),
                Identifier::of::<Piston>(),
            ],
        };

        assert_eq!(
            "Error composing Car < Engine < Piston. Piston is not registered",
            error.to_string()
        );
    }

    #[test]
    fn cycle_names_full_cycle() {
        let error = InjectError::CircularDependency {
            cycle: vec![
                Identifier::token("A"),
                Identifier::token("B"),
                Identifier::token("A"),
            ],
        };

        assert_eq!("Circular dependency detected: A > B > A", error.to_string());
    }

    #[test]
    fn activation_failure_keeps_source() {
        let error = InjectError::activation_failed(
            Identifier::token("db"),
            "connection refused",
        );

        assert_eq!(
            "connection refused",
            error.source().map(ToString::to_string).unwrap_or_default()
        );
    }
}
