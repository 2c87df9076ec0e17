//! OAuth2 client side of the proxy.
//!
//! # Data Flow
//! ```text
//! grant path response (200) → Grant → session
//! upstream 401 + refresh token → GrantClient::refresh → Grant → session
//! timer / app-token 401 → GrantClient::client_credentials → AppToken
//! ```

pub mod app_token;
pub mod grant_client;
pub mod types;

pub use app_token::AppToken;
pub use grant_client::GrantClient;
pub use types::{Grant, GrantError};
