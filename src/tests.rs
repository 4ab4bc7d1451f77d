#![allow(clippy::blacklisted_name)]

mod container;
mod memory;
mod pipeline;
