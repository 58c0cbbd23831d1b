//! Shared types for the QuickPoll client and server: poll models, the push
//! protocol and error types.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
