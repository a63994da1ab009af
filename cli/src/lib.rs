//! MultiDB Academy client library.
//!
//! The `multidb` binary is a thin shell over these modules; integration tests
//! drive them directly against a scripted backend.

pub mod api;
pub mod config;
pub mod credentials;
pub mod guard;
pub mod normalize;
pub mod pages;
pub mod render;
pub mod session;
pub mod validate;

pub use api::{ApiClient, ApiError};
pub use config::ClientConfig;
pub use credentials::{CredentialStore, CredentialStoreDyn};
pub use guard::{GuardDecision, Route};
pub use session::{SessionController, SessionState};
