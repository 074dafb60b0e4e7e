//! Admin HTTP surface over the config service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware)
//!     → request.rs (request ID, JSON body)
//!     → ConfigService get/set
//!     → response.rs (ConfigReply → status code + JSON)
//! ```
//!
//! This is a transport adapter only; the config core knows nothing about
//! HTTP.

pub mod request;
pub mod response;
pub mod server;

pub use request::{SetValueRequest, X_REQUEST_ID};
pub use server::AdminServer;
