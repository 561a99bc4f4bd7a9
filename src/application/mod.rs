pub mod dispatch;
pub mod registry;
pub mod repl;
pub mod session;
