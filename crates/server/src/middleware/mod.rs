pub mod auth;
pub mod logging;

pub use auth::{AuthState, extract_token, hydrate_auth};
pub use logging::request_log;
