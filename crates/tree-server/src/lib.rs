//! HTTP server, client and command-line plumbing for tree-map.

pub mod api;
pub mod client;
pub mod config;
pub mod migrate;
pub mod mongo_store;
pub mod page;
pub mod redis_store;
pub mod remote;

pub use api::{router, AppState};
pub use client::HttpSyncClient;
