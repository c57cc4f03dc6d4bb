use crate::AppState;
use axum::Router;

pub mod health;

/// Routes every application gets
pub fn routes() -> Router<AppState> {
    Router::new().merge(health::routes())
}
