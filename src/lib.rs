//! Graph-compiled dependency injection with scoped lifetimes, and a web
//! request pipeline built on it.
//!
//! # Containers and definitions
//!
//! A [`Container`] maps [`Identifier`]s to [`Definition`]s. An identifier is
//! either a Rust type or a string token. A definition says how to produce a
//! value: construct a type from its dependencies, call a factory, or hand out
//! a fixed value.
//!
//! Containers form a tree. A child sees the definitions of its ancestors and
//! may shadow them, and a container may import single identifiers from
//! another container or alias one identifier to another.
//!
//! # Dependency graphs
//!
//! Before anything is constructed, the dependencies of the requested
//! identifier are compiled into a graph of [`GraphNode`]s. Missing
//! dependencies and cycles are reported before a single constructor runs.
//! Cycles are allowed only where a dependency is deferred: a deferred
//! dependency is handed to its dependent as a [`Lazy`] handle resolved on
//! first use. Compiled graphs are memoized per container, and registering a
//! definition discards only the graphs that depended on it.
//!
//! # Scopes
//!
//! Every definition has a [`Scope`]. Transient values are constructed on
//! every resolution. Singletons are cached for the lifetime of the
//! application, injection-scoped values for the lifetime of the top-level
//! resolution that created them, and request-scoped values for the lifetime
//! of a request. The cache itself is a [`DependencyCache`], a tree of levels
//! of cached instances, one level per open scope.
//!
//! # Modules
//!
//! Applications are composed of modules. A module is registered in the
//! [`Registry`] with its [`ModuleMetadata`]: the modules it imports, the
//! providers it registers, its controllers and the identifiers it exports.
//! Only exported identifiers are visible to importing modules.
//!
//! # Example
//!
//! ```
//! use scoped_injector::{
//!     Container, DependencyResolver, Identifier, Scope, Svc, TypeDefinition,
//!     ValueDefinition,
//! };
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     database: Svc<Database>,
//! }
//!
//! let container = Container::new("app");
//! container
//!     .register(
//!         "db.url",
//!         ValueDefinition::new(String::from("postgres://localhost")),
//!     )
//!     .unwrap();
//! container
//!     .register_type(
//!         TypeDefinition::new(|args| {
//!             let url = args.required::<String>()?;
//!             Ok(Database { url: (*url).clone() })
//!         })
//!         .parameter("db.url")
//!         .scope(Scope::Singleton),
//!     )
//!     .unwrap();
//! container
//!     .register_type(
//!         TypeDefinition::new(|args| {
//!             Ok(UserService {
//!                 database: args.required()?,
//!             })
//!         })
//!         .parameter(Identifier::of::<Database>()),
//!     )
//!     .unwrap();
//!
//! let resolver = DependencyResolver::new(container);
//! let users: Svc<UserService> = resolver.get().unwrap();
//! let database: Svc<Database> = resolver.get().unwrap();
//! assert!(Svc::ptr_eq(&users.database, &database));
//! assert_eq!("postgres://localhost", database.url);
//! ```

#![forbid(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value
)]

mod cache;
mod container;
mod definition;
mod deferred;
mod error;
mod module;
mod platform;
mod registry;
mod resolver;
mod scope;
pub mod server;
mod service;

pub use cache::*;
pub use container::*;
pub use definition::*;
pub use deferred::*;
pub use error::*;
pub use module::*;
pub use platform::*;
pub use registry::*;
pub use resolver::*;
pub use scope::*;
pub use server::{ControllerCatalog, RequestLifecycle};
pub use service::*;

#[cfg(test)]
mod tests;
