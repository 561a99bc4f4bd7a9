pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::{dispatch, registry, repl, session};
pub use domain::types;
pub use infrastructure::{graph, mcp, model, server, toolserver};
