//! Read API Routes
//!
//! Display-side HTTP surface over the trade orchestrator. Nothing here
//! signs or submits. Market reads and quotes go to the ledger, with the
//! cached view served only while it is unreachable. Price history comes
//! from the trade log.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use tracing::{debug, warn};

use super::response::{success, success_fields, ApiError};
use crate::adapters::metrics::{HealthState, MetricsRegistry};
use crate::domain::error::EngineError;
use crate::domain::market::Side;
use crate::ports::ledger::LedgerReader;
use crate::ports::repository::{MarketRepository, TradeHistory};
use crate::ports::submitter::TransactionSubmitter;
use crate::usecases::market_view::{
  load_history, HistoryRange, MarketStats, MarketSummary, Participation, PositionView, PricePoint,
};
use crate::usecases::orchestrator::TradeOrchestrator;
use crate::usecases::quote_service::quote;

/// Shared state behind every route.
pub struct ApiState<L, S, R>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  pub orchestrator: Arc<TradeOrchestrator<L, S, R>>,
  pub history: Arc<dyn TradeHistory>,
  pub metrics: Arc<MetricsRegistry>,
}

/// `GET /markets/:id/quote` query string.
#[derive(Debug, Deserialize)]
pub struct QuoteParams {
  pub side: String,
  /// Deposit in lamports.
  pub amount: u64,
}

/// `GET /markets/:id/history` query string.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  /// One of 1h, 24h, 7d, 30d, all; anything else reads as 24h.
  pub range: Option<String>,
}

#[derive(Serialize)]
struct HistoryBody {
  history: Vec<PricePoint>,
  range: HistoryRange,
}

/// Build the API router, health routes included.
pub fn router<L, S, R>(state: Arc<ApiState<L, S, R>>, health: Arc<HealthState>) -> Router
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  Router::new()
    .route("/markets", get(list_markets::<L, S, R>))
    .route("/markets/:id", get(get_market::<L, S, R>))
    .route("/markets/:id/quote", get(get_quote::<L, S, R>))
    .route("/markets/:id/history", get(get_history::<L, S, R>))
    .route("/positions/:owner", get(get_positions::<L, S, R>))
    .route("/stats", get(get_stats::<L, S, R>))
    .route("/metrics", get(get_metrics::<L, S, R>))
    .with_state(state)
    .merge(health.routes())
}

async fn list_markets<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let deriver = state.orchestrator.deriver();
  let participation = Participation::from_positions(&state.orchestrator.all_positions().await?);
  let markets: Vec<MarketSummary> = state
    .orchestrator
    .list_markets()
    .await?
    .iter()
    .map(|m| MarketSummary::from_market(m, deriver, &participation))
    .collect();
  Ok(success("markets", markets))
}

async fn get_market<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
  Path(project_id): Path<u64>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let market = state.orchestrator.market_view(project_id).await?;
  let participation =
    Participation::from_positions(&state.orchestrator.market_positions(project_id).await?);
  Ok(success(
    "market",
    MarketSummary::from_market(&market, state.orchestrator.deriver(), &participation),
  ))
}

async fn get_history<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
  Path(project_id): Path<u64>,
  Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let range = HistoryRange::parse_or_default(params.range.as_deref());
  let history = load_history(state.history.as_ref(), project_id, range, Utc::now()).await?;
  debug!(project_id, ?range, points = history.len(), "Served price history");
  Ok(success_fields(HistoryBody { history, range }))
}

async fn get_quote<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
  Path(project_id): Path<u64>,
  Query(params): Query<QuoteParams>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let quoted = async {
    let side = Side::from_str(&params.side)?;
    let market = state.orchestrator.market_view(project_id).await?;
    quote(&market, side, params.amount)
  }
  .await;

  match quoted {
    Ok(q) => {
      let side = q.side.to_string();
      state
        .metrics
        .quotes_served
        .with_label_values(&[side.as_str()])
        .inc();
      if q.warning.is_some() {
        warn!(
          project_id,
          impact = q.price_impact.points,
          "High price impact quote"
        );
      }
      Ok(success("quote", q))
    }
    Err(e) => {
      state
        .metrics
        .quotes_rejected
        .with_label_values(&[e.kind()])
        .inc();
      debug!(project_id, error = %e, "Quote rejected");
      Err(e.into())
    }
  }
}

async fn get_positions<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
  Path(owner): Path<String>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let owner = Pubkey::from_str(&owner)
    .map_err(|e| EngineError::Validation(format!("invalid owner {owner:?}: {e}")))?;
  let positions: Vec<PositionView> = state
    .orchestrator
    .positions_by_owner(&owner)
    .await?
    .iter()
    .map(PositionView::from)
    .collect();
  Ok(success("positions", positions))
}

async fn get_stats<L, S, R>(
  State(state): State<Arc<ApiState<L, S, R>>>,
) -> Result<Response, ApiError>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  let markets = state.orchestrator.list_markets().await?;
  let participation = Participation::from_positions(&state.orchestrator.all_positions().await?);
  Ok(success("stats", MarketStats::from_markets(&markets, &participation)))
}

async fn get_metrics<L, S, R>(State(state): State<Arc<ApiState<L, S, R>>>) -> Response
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  match state.metrics.render() {
    Ok(body) => (
      StatusCode::OK,
      [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
      body,
    )
      .into_response(),
    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  }
}
