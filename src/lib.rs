//! Caching read-through proxy for the Hacker News API.
//!
//! [`fetcher::Fetcher`] does the work: it serves the ranked story list and
//! whole comment trees out of a bounded [`cache::CacheStore`], refetching
//! from upstream when entries go stale and falling back to stale data when
//! upstream misbehaves. [`server`] exposes it over HTTP and [`warmer`]
//! keeps it warm in the background.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod hn_client;
pub mod logging;
pub mod models;
pub mod server;
pub mod views;
pub mod warmer;
