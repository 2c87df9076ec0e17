//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, limits)
//!     → request.rs (ProxyRequest: filtered headers, query, body buffer)
//!     → middleware/ (Session → CsrfToken → Authorization → ProxyData)
//!     → upstream.rs (pooled client to api_url)
//!     → response.rs (ProxyResponse: merge, override, dispatch once)
//!     → Send to client
//! ```

pub mod error;
pub mod headers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use error::ProxyError;
pub use request::ProxyRequest;
pub use response::ProxyResponse;
pub use server::{HttpServer, X_REQUEST_ID};
pub use upstream::UpstreamClient;
