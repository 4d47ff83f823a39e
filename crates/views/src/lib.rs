//! View models for the screener client.
//!
//! Pure consumers of `SessionStore` and `QueryCache`: they decide what to
//! fetch and when, and expose render-ready snapshots.

pub mod access;
pub mod dashboard;
pub mod queries;
pub mod screener;

pub use access::{authorize, Access, Route};
pub use dashboard::{DashboardSnapshot, DashboardView};
pub use queries::{Queries, QueryKey};
pub use screener::{ResultRow, ScreenerView};
