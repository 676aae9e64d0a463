//! Server identity endpoint.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::Result;
use crate::json::{InfoJson, SuccessResponse};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/info", get(server_info))
}

/// The device id and name clients see when linking to this server.
async fn server_info(State(state): State<AppState>) -> Result<Json<SuccessResponse<InfoJson>>> {
    let identity = state.store.device_identity().await?;
    Ok(Json(SuccessResponse::new(InfoJson {
        device_id: identity.device_id,
        name: identity.name,
    })))
}
