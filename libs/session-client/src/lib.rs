//! Caller-side session handling for the auth service
//!
//! [`SessionClient`] keeps the access token in memory only, persists the
//! refresh token through a [`RefreshTokenStorage`], attaches bearer
//! credentials to outgoing requests, and refreshes at most once per burst of
//! `401 Unauthorized` responses.
//!
//! ```rust,no_run
//! use session_client::{MemoryStorage, SessionClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), session_client::ClientError> {
//!     let client = SessionClient::new("http://localhost:3000", Arc::new(MemoryStorage::new()))?;
//!     client.login("a@x.test", "Secret1").await?;
//!
//!     let me: serde_json::Value = client.get_json("/me").await?;
//!     println!("{}", me);
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod models;
pub mod storage;

pub use client::SessionClient;
pub use error::{ClientError, ClientResult};
pub use models::{LoginResponse, LogoutAllResponse, TokenPair, UserInfo};
pub use storage::{FileStorage, MemoryStorage, RefreshTokenStorage};
