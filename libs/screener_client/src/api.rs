//! Typed REST endpoints for the screening service.
//!
//! Every call goes through the shared `HttpGateway`, so it carries whatever
//! credential the `SessionStore` currently holds. A 401 on any of them ends
//! the session.

use std::future::Future;
use std::sync::Arc;

use common::{
    Error, Market, MarketSummary, MarketType, NewSavedScreen, SavedScreen, ScreeningRequest,
    ScreeningResult, ScreeningSummary,
};
use tracing::{debug, info};

use crate::gateway::HttpGateway;
use crate::session::SessionStore;

#[derive(Debug, Clone)]
pub struct ScreenerApi {
    gateway: HttpGateway,
    session: Arc<SessionStore>,
}

impl ScreenerApi {
    pub fn new(gateway: HttpGateway, session: Arc<SessionStore>) -> Self {
        Self { gateway, session }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    // ── Dashboard ─────────────────────────────────────────────────────

    pub async fn market_summary(&self) -> Result<MarketSummary, Error> {
        self.guarded(self.gateway.get("/markets/summary")).await
    }

    pub async fn screening_summary(&self) -> Result<ScreeningSummary, Error> {
        self.guarded(self.gateway.get("/markets/screening-summary"))
            .await
    }

    // ── Markets ───────────────────────────────────────────────────────

    /// Markets of one type, or all of them.
    pub async fn markets(&self, market_type: Option<MarketType>) -> Result<Vec<Market>, Error> {
        let markets: Vec<Market> = match market_type {
            Some(t) => {
                self.guarded(
                    self.gateway
                        .get_query("/markets", &[("market_type", t.as_str())]),
                )
                .await?
            }
            None => self.guarded(self.gateway.get("/markets")).await?,
        };
        debug!("Fetched {} markets (type={:?})", markets.len(), market_type);
        Ok(markets)
    }

    // ── Screening ─────────────────────────────────────────────────────

    pub async fn run_screen(&self, request: &ScreeningRequest) -> Result<Vec<ScreeningResult>, Error> {
        let results: Vec<ScreeningResult> = self
            .guarded(self.gateway.post_json("/markets/screen", request))
            .await?;
        let passed = results.iter().filter(|r| r.result_data.passes).count();
        info!(
            screening_type = %request.screening_type,
            results = results.len(),
            passed,
            "screen completed"
        );
        Ok(results)
    }

    pub async fn saved_screens(&self) -> Result<Vec<SavedScreen>, Error> {
        self.guarded(self.gateway.get("/markets/screens")).await
    }

    pub async fn create_saved_screen(&self, screen: &NewSavedScreen) -> Result<SavedScreen, Error> {
        let saved: SavedScreen = self
            .guarded(self.gateway.post_json("/markets/screens", screen))
            .await?;
        info!(id = saved.id, name = %saved.name, "saved screen");
        Ok(saved)
    }

    /// Run `call`, ending the session if the server rejects the credential.
    ///
    /// The epoch is captured before the request is sent so a rejection that
    /// arrives after a fresh login does not log the new session out.
    async fn guarded<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let epoch = self.session.epoch();
        let outcome = call.await;
        if let Err(Error::Unauthorized(_)) = &outcome {
            self.session.expire(epoch);
        }
        outcome
    }
}
