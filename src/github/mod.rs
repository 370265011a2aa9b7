//! GitHub as an upstream metrics provider.

pub mod api_types;
mod client;

pub use client::GithubClient;
