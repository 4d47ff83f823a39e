//! Query cache crate.
//!
//! Fetches and memoizes server data by key, with explicit manual triggering,
//! in-flight deduplication and stale-response discarding.

pub mod cache;

pub use cache::{
    fetcher, CacheKey, FetchMode, Fetcher, QueryCache, QueryState, QueryStatus, WeakQueryCache,
};
