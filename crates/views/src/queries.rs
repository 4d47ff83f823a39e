//! Cache keys and the typed caches shared by the views.

use std::fmt;
use std::sync::Arc;

use common::{Market, MarketSummary, MarketType, ScreeningResult, ScreeningSummary, ScreeningType};
use query_cache::{CacheKey, QueryCache};
use screener_client::SessionStore;

/// Every parameter that shapes a server response is part of its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    MarketSummary,
    ScreeningSummary,
    Markets {
        market_type: MarketType,
    },
    Screening {
        market_type: MarketType,
        screening_type: ScreeningType,
    },
}

// All screener endpoints are per-user.
impl CacheKey for QueryKey {}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::MarketSummary => f.write_str("market-summary"),
            QueryKey::ScreeningSummary => f.write_str("screening-summary"),
            QueryKey::Markets { market_type } => write!(f, "markets/{market_type}"),
            QueryKey::Screening {
                market_type,
                screening_type,
            } => write!(f, "screening/{market_type}/{screening_type}"),
        }
    }
}

/// One cache per response type. Cloning shares the entries.
#[derive(Clone, Default)]
pub struct Queries {
    pub market_summary: QueryCache<QueryKey, MarketSummary>,
    pub screening_summary: QueryCache<QueryKey, ScreeningSummary>,
    pub markets: QueryCache<QueryKey, Vec<Market>>,
    pub screening: QueryCache<QueryKey, Vec<ScreeningResult>>,
}

impl Queries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the caches and have `session` purge them whenever it ends.
    ///
    /// The session only holds weak handles; the caches live as long as some
    /// clone of the returned `Queries` does.
    pub fn attached_to(session: &SessionStore) -> Self {
        let queries = Self::new();
        session.add_observer(Arc::new(queries.market_summary.downgrade()));
        session.add_observer(Arc::new(queries.screening_summary.downgrade()));
        session.add_observer(Arc::new(queries.markets.downgrade()));
        session.add_observer(Arc::new(queries.screening.downgrade()));
        queries
    }
}
