//! HTTP adapters for RSSX
//!
//! The axum router serving the peer wire protocol and the authenticated
//! content API on top of an [`rssx_federation::RssxNode`].

pub mod auth;
pub mod error;
pub mod http_server;

pub use auth::{hash_password, verify_password, AuthUser, Claims, TokenIssuer};
pub use error::ApiError;
pub use http_server::{router, AppState, HttpServer, ServerConfig};
