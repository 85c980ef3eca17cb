pub mod auth;

pub use auth::{AuthState, bearer_auth_middleware};
