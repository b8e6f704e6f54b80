pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key_pool;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod sse;
pub mod stream;
pub mod streams;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, CorrectionError};
pub use handlers::{AppState, SharedState};
pub use server::create_app;
