//! REST client for the scores backend (matches and the user profile).

pub mod client;
pub mod errors;

pub use client::ApiClient;
pub use errors::ApiError;
