//! Serves the `scoped_injector` request pipeline with actix-web.
//!
//! [`ActixPlatform`] is a [`ServerPlatform`](server::ServerPlatform) whose
//! route table is filled when a [`Platform`] is bootstrapped. Every request
//! reaching [`ActixPlatform::service`] is copied into an [`ActixContext`],
//! run through the pipeline and answered with the response the pipeline
//! wrote.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value
)]

pub use scoped_injector::*;

mod context;
mod platform;

pub use context::ActixContext;
pub use platform::*;
