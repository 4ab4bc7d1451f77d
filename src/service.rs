use std::{
    any::{Any, TypeId},
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

/// A reference-counted pointer holding a service.
pub type Svc<T> = Arc<T>;

/// A reference-counted service pointer holding an instance of `dyn Any`.
pub type DynSvc = Arc<dyn Any + Send + Sync>;

/// Implemented automatically on types that are capable of being a service.
pub trait Service: Any + Send + Sync {}
impl<T: ?Sized + Any + Send + Sync> Service for T {}

/// Type information about a service.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ServiceInfo {
    id: TypeId,
    name: &'static str,
}

impl ServiceInfo {
    /// Creates a [`ServiceInfo`] for the given type.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + Any>() -> Self {
        ServiceInfo {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Gets the [`TypeId`] for this service.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Gets the fully qualified type name of this service.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the type name of this service without its module path. Generic
    /// arguments are kept as they are.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let head_end = self.name.find('<').unwrap_or(self.name.len());
        let start = self.name[..head_end].rfind("::").map_or(0, |i| i + 2);
        &self.name[start..]
    }
}

/// The key used to register, resolve, cache and scope a dependency. An
/// identifier is either a constructible type or an opaque string token.
///
/// Two type identifiers are equal when they name the same type, and two token
/// identifiers are equal when their strings are equal. A type and a token are
/// never equal, even if the token spells the type's name.
///
/// ```
/// use scoped_injector::Identifier;
///
/// struct Engine;
///
/// assert_eq!(Identifier::of::<Engine>(), Identifier::of::<Engine>());
/// assert_eq!(Identifier::token("db.url"), Identifier::token("db.url"));
/// assert_ne!(Identifier::of::<Engine>(), Identifier::token("Engine"));
/// assert_eq!("Engine", Identifier::of::<Engine>().to_string());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// A constructible type.
    Type(ServiceInfo),
    /// An opaque string token.
    Token(Arc<str>),
}

impl Identifier {
    /// Creates a type identifier.
    #[must_use]
    pub fn of<T: ?Sized + Any>() -> Self {
        Identifier::Type(ServiceInfo::of::<T>())
    }

    /// Creates a token identifier.
    #[must_use]
    pub fn token(token: impl AsRef<str>) -> Self {
        Identifier::Token(Arc::from(token.as_ref()))
    }

    /// Gets the type information if this identifier names a type.
    #[must_use]
    pub fn service_info(&self) -> Option<ServiceInfo> {
        match self {
            Identifier::Type(info) => Some(*info),
            Identifier::Token(_) => None,
        }
    }

    /// Gets a short, human readable name for this identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Identifier::Type(info) => info.short_name(),
            Identifier::Token(token) => token,
        }
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Type(info) => write!(f, "Type({})", info.name()),
            Identifier::Token(token) => write!(f, "Token({:?})", token),
        }
    }
}

impl From<ServiceInfo> for Identifier {
    fn from(info: ServiceInfo) -> Self {
        Identifier::Type(info)
    }
}

impl From<&str> for Identifier {
    fn from(token: &str) -> Self {
        Identifier::token(token)
    }
}

impl From<String> for Identifier {
    fn from(token: String) -> Self {
        Identifier::Token(Arc::from(token))
    }
}

pub(crate) fn join_names<'a>(
    identifiers: impl IntoIterator<Item = &'a Identifier>,
    separator: &str,
) -> String {
    let mut joined = String::new();
    for identifier in identifiers {
        if !joined.is_empty() {
            joined.push_str(separator);
        }
        joined.push_str(identifier.name());
    }
    joined
}
