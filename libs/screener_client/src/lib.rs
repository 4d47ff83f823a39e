//! Market-screener API client library.
//!
//! Provides the outbound HTTP gateway, the authentication session store and
//! typed access to the screening REST API.

pub mod api;
pub mod gateway;
pub mod persist;
pub mod rate_limit;
pub mod session;

pub use api::ScreenerApi;
pub use gateway::HttpGateway;
pub use persist::{FileStore, MemoryStore, PersistedSession, PersistenceAdapter};
pub use rate_limit::RateLimiter;
pub use session::{Session, SessionObserver, SessionStatus, SessionStore};
