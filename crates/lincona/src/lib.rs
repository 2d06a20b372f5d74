//! lincona: an interactive coding-agent CLI.
//!
//! The binary wires a resolved configuration, a streaming Responses client,
//! the tool router, and persistent session storage into a conversation
//! driver, with a one-shot shutdown coordinator covering every exit path.

pub mod commands;
pub mod config;
pub mod driver;
pub mod shutdown;
