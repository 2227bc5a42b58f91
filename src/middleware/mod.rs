pub mod auth;
pub mod rate_limit;

pub use auth::{ErrorResponse, optional_session_from_headers, require_session_from_headers};
