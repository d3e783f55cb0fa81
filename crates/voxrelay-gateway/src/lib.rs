//! HTTP relay gateway.
//!
//! Every relay endpoint forwards the client's payload to one or more
//! upstream APIs (generation, speech-to-text, text-to-speech) and returns
//! their combined output as JSON. The gateway keeps no conversation state.

pub mod error;
pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{router, start_gateway};
pub use state::GatewayState;
