use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{CreateGenerationRequest, GenerationList, ListQuery, UpdateGenerationRequest},
    model::{Generation, GenerationFilter, GenerationPatch, NewGeneration},
};
use crate::{
    auth::{dto::MessageResponse, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn generation_routes() -> Router<AppState> {
    Router::new()
        .route("/generations", get(list_generations).post(create_generation))
        .route(
            "/generations/:id",
            get(get_generation)
                .put(update_generation)
                .delete(delete_generation),
        )
}

fn not_found() -> ApiError {
    ApiError::NotFound("Generation not found".into())
}

#[instrument(skip(state, user, query), fields(user_id = %user.0))]
pub async fn list_generations(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<GenerationList>> {
    let Query(q) = query?;
    let filter = GenerationFilter {
        kind: q.kind(),
        limit: q.limit(),
        offset: q.offset(),
    };
    let (total, items) = state.store.list_generations(user.0, filter).await?;
    Ok(Json(GenerationList { total, items }))
}

#[instrument(skip(state, user, id), fields(user_id = %user.0))]
pub async fn get_generation(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Generation>> {
    let Path(id) = id?;
    let generation = state
        .store
        .find_generation(user.0, id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(generation))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.0))]
pub async fn create_generation(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreateGenerationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Generation>)> {
    let Json(payload) = payload?;
    let (Some(kind), Some(input_images), Some(parameters)) =
        (payload.kind, payload.input_images, payload.parameters)
    else {
        return Err(ApiError::Validation(
            "Type, input_images, and parameters are required".into(),
        ));
    };
    if !parameters.is_object() {
        return Err(ApiError::Validation("parameters must be an object".into()));
    }

    let generation = state
        .store
        .create_generation(
            user.0,
            NewGeneration {
                kind,
                input_images,
                parameters,
            },
        )
        .await?;
    info!(generation_id = %generation.id, kind = %generation.kind, "generation created");
    Ok((StatusCode::CREATED, Json(generation)))
}

#[instrument(skip(state, user, id, payload), fields(user_id = %user.0))]
pub async fn update_generation(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateGenerationRequest>, JsonRejection>,
) -> ApiResult<Json<Generation>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let patch = GenerationPatch {
        status: payload.status,
        output_images: payload.output_images,
        error_message: payload.error_message,
    };
    let generation = state
        .store
        .update_generation(user.0, id, patch)
        .await?
        .ok_or_else(not_found)?;
    info!(generation_id = %id, status = generation.status.as_str(), "generation updated");
    Ok(Json(generation))
}

#[instrument(skip(state, user, id), fields(user_id = %user.0))]
pub async fn delete_generation(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Path(id) = id?;
    if !state.store.delete_generation(user.0, id).await? {
        return Err(not_found());
    }
    info!(generation_id = %id, "generation deleted");
    Ok(Json(MessageResponse {
        message: "Generation deleted successfully".into(),
    }))
}
