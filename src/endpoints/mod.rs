use axum::Router;

use crate::AppState;

mod reports;
mod sync;

pub fn routes() -> Router<AppState> {
    Router::new().merge(reports::routes()).merge(sync::routes())
}
