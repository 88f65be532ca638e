//! 请求中间件与 extractor

pub mod auth;

pub use auth::RequireApiKey;
