use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use super::{dto::UpdateProfileRequest, model::PublicUser};
use crate::{
    auth::{dto::MessageResponse, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me).put(update_me).delete(delete_me))
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".into())
}

#[instrument(skip(state, user), fields(user_id = %user.0))]
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<PublicUser>> {
    let user = state
        .store
        .find_user(user.0)
        .await?
        .ok_or_else(user_not_found)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.0))]
pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<PublicUser>> {
    let Json(payload) = payload?;
    let updated = match payload.full_name {
        Some(full_name) => {
            let full_name = full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
            state.store.update_user_name(user.0, full_name).await?
        }
        None => state.store.find_user(user.0).await?,
    };
    let updated = updated.ok_or_else(user_not_found)?;
    info!("profile updated");
    Ok(Json(updated.into()))
}

#[instrument(skip(state, user), fields(user_id = %user.0))]
pub async fn delete_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<MessageResponse>> {
    if !state.store.delete_user(user.0).await? {
        return Err(user_not_found());
    }
    info!("account deleted");
    Ok(Json(MessageResponse {
        message: "Account deleted successfully".into(),
    }))
}
