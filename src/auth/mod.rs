use crate::state::AppState;
use axum::Router;

mod dto;
pub mod flow;
pub mod handlers;
pub mod password;
pub mod reconcile;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
