pub mod graph;
pub mod mcp;
pub mod model;
pub mod server;
pub mod toolserver;
