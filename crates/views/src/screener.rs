//! Screener page: pick a market type and a screen, then run it on demand.
//!
//! The market list follows the selection automatically. Screening results
//! do not: they are fetched only by `run_screening`, and the rows on display
//! stay those of the last run until the next one.

use std::sync::Arc;

use common::{Market, MarketType, ScreeningRequest, ScreeningResult, ScreeningType};
use query_cache::{fetcher, FetchMode, QueryState};
use screener_client::ScreenerApi;
use tracing::{debug, info};

use crate::queries::{Queries, QueryKey};

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub symbol: String,
    pub name: String,
    pub criteria_met: String,
    pub details: String,
    pub passes: bool,
}

impl From<&ScreeningResult> for ResultRow {
    fn from(result: &ScreeningResult) -> Self {
        let (symbol, name) = match &result.market {
            Some(m) => (m.symbol.clone(), m.name.clone()),
            None => (format!("#{}", result.market_id), String::new()),
        };
        Self {
            symbol,
            name,
            criteria_met: result.result_data.criteria_met.join(", "),
            details: result.result_data.details_line(),
            passes: result.result_data.passes,
        }
    }
}

pub struct ScreenerView {
    api: ScreenerApi,
    queries: Queries,
    market_type: MarketType,
    screening_type: ScreeningType,
    /// Key of the last run; its results are what the page shows.
    shown: Option<QueryKey>,
}

impl ScreenerView {
    pub fn new(api: ScreenerApi, queries: Queries) -> Self {
        Self {
            api,
            queries,
            market_type: MarketType::Stock,
            screening_type: ScreeningType::Minervini,
            shown: None,
        }
    }

    pub fn market_type(&self) -> MarketType {
        self.market_type
    }

    pub fn screening_type(&self) -> ScreeningType {
        self.screening_type
    }

    /// Change the selection. Nothing is fetched until `refresh` or a run.
    pub fn set_market_type(&mut self, market_type: MarketType) {
        self.market_type = market_type;
    }

    pub fn set_screening_type(&mut self, screening_type: ScreeningType) {
        self.screening_type = screening_type;
    }

    fn markets_key(&self) -> QueryKey {
        QueryKey::Markets {
            market_type: self.market_type,
        }
    }

    fn screening_key(&self) -> QueryKey {
        QueryKey::Screening {
            market_type: self.market_type,
            screening_type: self.screening_type,
        }
    }

    /// Bring the page in line with the current selection: load the market
    /// list and register the screening query without running it.
    pub async fn refresh(&self) -> QueryState<Vec<Market>> {
        self.register_screening().await;

        let api = self.api.clone();
        let market_type = self.market_type;
        self.queries
            .markets
            .request(
                self.markets_key(),
                fetcher(move || {
                    let api = api.clone();
                    async move { api.markets(Some(market_type)).await }
                }),
                FetchMode::Auto,
            )
            .await
    }

    async fn register_screening(&self) {
        let api = self.api.clone();
        let request = Arc::new(ScreeningRequest::for_market_type(
            self.screening_type,
            self.market_type,
        ));
        self.queries
            .screening
            .request(
                self.screening_key(),
                fetcher(move || {
                    let api = api.clone();
                    let request = Arc::clone(&request);
                    async move { api.run_screen(&request).await }
                }),
                FetchMode::Manual,
            )
            .await;
    }

    /// Run the selected screen and show its results.
    pub async fn run_screening(&mut self) -> QueryState<Vec<ScreeningResult>> {
        let key = self.screening_key();
        self.register_screening().await;
        self.shown = Some(key.clone());

        info!(%key, "running screen");
        let state = self.queries.screening.trigger(&key).await;
        debug!(%key, status = ?state.status, "screen finished");
        state
    }

    /// False while the market list or the selected screen is loading.
    pub fn can_run(&self) -> bool {
        let markets = self.queries.markets.state(&self.markets_key());
        let screening = self.queries.screening.state(&self.screening_key());
        !markets.is_pending() && !screening.is_pending()
    }

    pub fn markets(&self) -> QueryState<Vec<Market>> {
        self.queries.markets.state(&self.markets_key())
    }

    /// State of the last run, `Idle` if nothing has been run yet.
    pub fn results(&self) -> QueryState<Vec<ScreeningResult>> {
        match &self.shown {
            Some(key) => self.queries.screening.state(key),
            None => QueryState::idle(),
        }
    }

    /// `(market_type, screening_type)` of the results on display.
    pub fn shown_selection(&self) -> Option<(MarketType, ScreeningType)> {
        match self.shown {
            Some(QueryKey::Screening {
                market_type,
                screening_type,
            }) => Some((market_type, screening_type)),
            _ => None,
        }
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        self.results()
            .data()
            .map(|results| results.iter().map(ResultRow::from).collect())
            .unwrap_or_default()
    }
}
