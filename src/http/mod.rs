//! HTTP gateway: caller identification, admission middleware, serving.

mod key;
mod middleware;
mod server;

pub use key::{caller_key, KeyPolicy, POOLED_KEY};
pub use middleware::{AdmissionLayer, AdmissionService, LIMIT_HEADER, REMAINING_HEADER};
pub use server::GatewayServer;
