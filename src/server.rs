//! The web request pipeline.
//!
//! A [`ServerPlatform`] adapts an HTTP framework. The [`ServerController`]
//! registers a route for every action of every controller of the
//! bootstrapped modules and runs each request through middleware, filters
//! and the action before turning its result, or its error, into a response.

mod context;
mod controller;
mod error;
mod exception;
mod filter;
mod lifecycle;
mod middleware;
mod options;
mod parameter;
mod platform;
mod result;
mod server_controller;

pub use context::*;
pub use controller::*;
pub use error::*;
pub use exception::*;
pub use filter::*;
pub use lifecycle::*;
pub use middleware::*;
pub use options::*;
pub use parameter::*;
pub use platform::*;
pub use result::*;
pub use server_controller::*;
