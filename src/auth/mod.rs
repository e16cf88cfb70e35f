use axum::Router;

use crate::state::AppState;

mod dto;
pub mod extractors;
pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod session;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
