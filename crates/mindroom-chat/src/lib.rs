pub mod client;
pub mod credentials;
pub mod error;
pub mod matrix;
pub mod runtime;
pub mod types;

pub use client::ChatClient;
pub use credentials::CredentialStore;
pub use error::{ChatError, Result};
pub use matrix::MatrixClient;
pub use runtime::BotRuntime;
pub use types::{BotCredentials, BotStatus};
