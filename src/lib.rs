// Topstep Session - authentication and session maintenance for the TopstepX API

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use auth::{AuthManager, CredentialStore, RefreshScheduler};
pub use error::{AuthError, TransportError};
