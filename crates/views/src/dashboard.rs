//! Dashboard: greeting, subscription status and the two summary cards.

use common::{MarketCounts, SubscriptionStatus};
use query_cache::{fetcher, FetchMode, QueryStatus};
use screener_client::ScreenerApi;
use tracing::debug;

use crate::queries::{Queries, QueryKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSnapshot {
    /// `None` without a signed-in user.
    pub greeting: Option<String>,
    pub subscription: Option<SubscriptionStatus>,
    pub total_markets: u64,
    pub by_type: MarketCounts,
    pub total_screens: u64,
    pub recent_results: u64,
    pub active_screens: u64,
    pub market_status: QueryStatus,
    pub screening_status: QueryStatus,
}

pub struct DashboardView {
    api: ScreenerApi,
    queries: Queries,
}

impl DashboardView {
    pub fn new(api: ScreenerApi, queries: Queries) -> Self {
        Self { api, queries }
    }

    /// Load both summaries (cached values are reused) and render.
    pub async fn load(&self) -> DashboardSnapshot {
        let api = self.api.clone();
        let market = self.queries.market_summary.request(
            QueryKey::MarketSummary,
            fetcher(move || {
                let api = api.clone();
                async move { api.market_summary().await }
            }),
            FetchMode::Auto,
        );

        let api = self.api.clone();
        let screening = self.queries.screening_summary.request(
            QueryKey::ScreeningSummary,
            fetcher(move || {
                let api = api.clone();
                async move { api.screening_summary().await }
            }),
            FetchMode::Auto,
        );

        let (market, screening) = tokio::join!(market, screening);
        debug!(market = ?market.status, screening = ?screening.status, "dashboard loaded");
        self.snapshot()
    }

    /// Render from whatever is cached right now. Missing data shows as zero.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let user = self.api.session().user();
        let market = self.queries.market_summary.state(&QueryKey::MarketSummary);
        let screening = self
            .queries
            .screening_summary
            .state(&QueryKey::ScreeningSummary);

        let summary = market.data().cloned().unwrap_or_default();
        let activity = screening.data().cloned().unwrap_or_default();

        DashboardSnapshot {
            greeting: user.as_ref().map(|u| format!("Welcome back, {}", u.label())),
            subscription: user.as_ref().map(|u| u.tier_status),
            total_markets: summary.total_markets,
            by_type: summary.by_type,
            total_screens: activity.total_screens,
            recent_results: activity.recent_results,
            active_screens: activity.active_screens,
            market_status: market.status,
            screening_status: screening.status,
        }
    }
}
