use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::debug;

use crate::{auth::MaybeActor, firehose::FirehoseProducer, AppState};

/// Stream report lifecycle events over a websocket.
///
/// Flaggers are hidden unless the bearer is an administrator.
///
/// - GET /subscribe
async fn subscribe(
    ws: WebSocketUpgrade,
    State(fh): State<FirehoseProducer>,
    MaybeActor(viewer): MaybeActor,
) -> impl IntoResponse {
    ws.on_upgrade(move |ws| async move {
        // No replay: clients fetch the snapshot once this socket is open.
        let sub = fh.subscribe().await;
        debug!("firehose client connected");
        crate::firehose::serve_socket(ws, sub, viewer).await;
    })
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/subscribe", get(subscribe))
}
