//! HTTP/JSON facade binding routes to registry operations.

pub mod handlers;
mod response;
mod server;

pub use response::ApiError;
pub use server::{AppState, router, serve};
