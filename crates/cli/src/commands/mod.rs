//! CLI command modules

pub mod keys;
pub mod serve;

pub use keys::{execute_keys_show, execute_keys_verify, VerifyArgs};
pub use serve::{execute_serve_command, ServeArgs};
