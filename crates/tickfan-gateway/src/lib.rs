//! WebSocket gateway and observability endpoints for the tick feed core.

pub mod messages;
pub mod server;
pub mod ws;

pub use server::app;
pub use ws::GatewayState;
