//! roxy library
//!
//! A caching proxy for remote images: each resource is fetched once,
//! verified by content sniffing, published atomically under a content-addressed
//! directory, and referred to by a stable pointer URL.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod upstream;

pub use config::Config;
pub use error::CacheError;
