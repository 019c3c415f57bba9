// API module - HTTP endpoints

pub mod cards;
pub mod health;
pub mod import;
pub mod inventory;
pub mod middleware;
pub mod patients;
pub mod templates;

use axum::Router;
use tower_http::trace::TraceLayer;

use middleware::state::AppState;

/// All routes, still waiting for state
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(cards::router())
        .merge(inventory::router())
        .merge(templates::router())
        .merge(import::router())
        .merge(patients::router())
}

pub fn app(state: AppState) -> Router {
    router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
