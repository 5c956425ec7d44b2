// Feed access: the read-only client contract and its Reddit implementation.
//
// The ingestion loop only sees the `FeedClient` trait, so tests drive it with
// scripted pages and the Reddit client stays a thin HTTP adapter.

pub mod client;
pub mod rate_limiter;
pub mod reddit;

pub use client::{FeedClient, FeedPage};
