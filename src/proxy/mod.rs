//! MCP proxy integration: the envelope views the middleware rewrites, the
//! middleware itself, upstream clients, and the downstream server.

pub mod envelope;
pub mod middleware;
pub mod server;
pub mod upstream;
