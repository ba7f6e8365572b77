//! HTTP handlers for favorites and folders

use axum::{
    Form, Json,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{FavoritesError, FavoritesResult};
use crate::handler::{AppState, CurrentUser, HostHook, MaybeUser};
use crate::model::{ContentType, EntityRef, ScoreSummary};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddFavoriteForm {
    pub object_id: String,
    pub content_type_id: i64,
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveFavoriteForm {
    pub object_id: String,
    pub content_type_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub content_type_id: i64,
    pub object_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolder {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveToFolder {
    pub folder_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetShared {
    pub shared: bool,
}

#[derive(Debug, Deserialize)]
pub struct EntityDeleted {
    pub content_type_id: i64,
    pub object_id: String,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FavoritesApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: u64,
}

fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(FavoritesApiResponse { data })).into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(FavoritesApiResponse { data })).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

async fn content_type(state: &AppState, id: i64) -> FavoritesResult<ContentType> {
    state
        .repository()
        .get_content_type(id)
        .await?
        .ok_or(FavoritesError::NotFound("content type"))
}

/// Resolves the target entity, failing with 404 when the host doesn't have it.
async fn resolve_entity(state: &AppState, content_type_id: i64, object_id: &str) -> FavoritesResult<EntityRef> {
    let ct = content_type(state, content_type_id).await?;
    if !state
        .resolver
        .exists(state.db.connection(), &ct, object_id)
        .await?
    {
        return Err(FavoritesError::NotFound("object"));
    }
    Ok(EntityRef::new(ct.id, object_id))
}

/// Only same-site paths are honoured; anything else falls back to the default.
fn redirect_target(state: &AppState, requested: Option<&str>) -> String {
    match requested {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_string(),
        _ => state.settings.redirect_to.clone(),
    }
}

// ============================================================================
// AJAX Handlers
// ============================================================================

pub async fn ajax_add_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Form(form): Form<AddFavoriteForm>,
) -> FavoritesResult<Json<ScoreSummary>> {
    let score = form.score.unwrap_or(state.settings.default_score);
    if !score.is_finite() {
        return Err(FavoritesError::Validation("score must be a finite number".to_string()));
    }

    let entity = resolve_entity(&state, form.content_type_id, &form.object_id).await?;
    let repo = state.repository();
    let (favorite, _) = repo.get_or_create_favorite(&entity, user_id, score).await?;
    let (count, score_avg) = repo.score_summary(&entity).await?;

    Ok(Json(ScoreSummary {
        score: Some(favorite.score),
        score_avg,
        count,
    }))
}

pub async fn ajax_remove_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Form(form): Form<RemoveFavoriteForm>,
) -> FavoritesResult<Json<ScoreSummary>> {
    let ct = content_type(&state, form.content_type_id).await?;
    let entity = EntityRef::new(ct.id, form.object_id);
    let repo = state.repository();

    repo.delete_favorite_for_user(&entity, user_id).await?;
    tracing::info!(user_id, object_id = %entity.object_id, "favorite removed");

    let (count, score_avg) = repo.score_summary(&entity).await?;
    Ok(Json(ScoreSummary {
        score: None,
        score_avg,
        count,
    }))
}

/// Counts and the caller's favorite flags for a batch of objects.
pub async fn favorite_status(
    State(state): State<AppState>,
    MaybeUser(user_id): MaybeUser,
    Json(payload): Json<StatusRequest>,
) -> FavoritesResult<Response> {
    let ct = content_type(&state, payload.content_type_id).await?;
    let entities: Vec<EntityRef> = payload
        .object_ids
        .into_iter()
        .map(|id| EntityRef::new(ct.id, id))
        .collect();

    let stats = state.repository().favorites_for_objects(&entities, user_id).await?;
    Ok(success(stats))
}

// ============================================================================
// Page-flow Handlers
// ============================================================================

pub async fn create_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((content_type_id, object_id)): Path<(i64, String)>,
    Query(params): Query<RedirectParams>,
) -> FavoritesResult<Redirect> {
    let entity = resolve_entity(&state, content_type_id, &object_id).await?;
    let target = redirect_target(&state, params.redirect_to.as_deref());
    let repo = state.repository();

    if !repo.favorites_for_object(&entity, Some(user_id)).await?.is_empty() {
        return Ok(Redirect::to(&target));
    }

    match repo.create_favorite(&entity, user_id, state.settings.default_score).await {
        Ok(_) | Err(FavoritesError::UniqueConstraintViolation { .. }) => Ok(Redirect::to(&target)),
        Err(e) => Err(e),
    }
}

pub async fn favorite_list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(content_type_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> FavoritesResult<Response> {
    let ct = content_type(&state, content_type_id).await?;
    let per_page = params
        .per_page
        .unwrap_or(state.settings.get_paginate_by())
        .clamp(1, crate::config::MAX_PAGE_SIZE);
    let page = params.page.unwrap_or(1);

    let favorites = state
        .repository()
        .favorites_for_model_paginated(ct.id, user_id, page, per_page)
        .await?;
    Ok(success(favorites))
}

pub async fn my_favorites(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> FavoritesResult<Response> {
    Ok(success(state.repository().favorites_for_user(user_id).await?))
}

pub async fn confirm_delete_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    OriginalUri(uri): OriginalUri,
) -> FavoritesResult<Html<String>> {
    let favorite = state.repository().get_favorite(id, user_id).await?;

    Ok(Html(format!(
        r#"
        <!doctype html>
        <html>
            <head></head>
            <body>
                <form action="{action}" method="post">
                    <p>Remove favorite {object_id} from your favorites?</p>
                    <input type="submit" value="Delete">
                </form>
            </body>
        </html>
        "#,
        action = html_escape(uri.path()),
        object_id = html_escape(&favorite.object_id),
    )))
}

pub async fn delete_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<RedirectParams>,
) -> FavoritesResult<Redirect> {
    if !state.repository().delete_favorite_by_id(id, user_id).await? {
        return Err(FavoritesError::NotFound("favorite"));
    }
    tracing::info!(user_id, favorite_id = id, "favorite deleted");
    Ok(Redirect::to(&redirect_target(&state, params.redirect_to.as_deref())))
}

/// Deletes without confirmation and sends the caller back where they came from.
pub async fn drop_favorite(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<RedirectParams>,
    headers: HeaderMap,
) -> FavoritesResult<Redirect> {
    state.repository().delete_favorite_by_id(id, user_id).await?;

    let target = match params.redirect_to {
        Some(path) => redirect_target(&state, Some(&path)),
        None => headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| state.settings.redirect_to.clone()),
    };
    Ok(Redirect::to(&target))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Folder Handlers
// ============================================================================

pub async fn list_folders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> FavoritesResult<Response> {
    Ok(success(state.repository().folders_for_user(user_id).await?))
}

pub async fn create_folder(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(payload): Json<CreateFolder>,
) -> FavoritesResult<Response> {
    Ok(created(state.repository().create_folder(user_id, &payload.name).await?))
}

pub async fn delete_folder(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> FavoritesResult<StatusCode> {
    state.repository().delete_folder(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn folder_favorites(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> FavoritesResult<Response> {
    Ok(success(state.repository().favorites_in_folder(id, user_id).await?))
}

pub async fn move_to_folder(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<MoveToFolder>,
) -> FavoritesResult<Response> {
    Ok(success(state.repository().move_to_folder(id, user_id, payload.folder_id).await?))
}

pub async fn set_shared(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<SetShared>,
) -> FavoritesResult<Response> {
    Ok(success(state.repository().set_shared(id, user_id, payload.shared).await?))
}

// ============================================================================
// Host Hooks
// ============================================================================

/// Called by the host after it deleted an entity. Refuses with 409 while the
/// entity is still present, so live objects keep their favorites.
pub async fn entity_deleted(
    State(state): State<AppState>,
    _hook: HostHook,
    Json(payload): Json<EntityDeleted>,
) -> FavoritesResult<Response> {
    let ct = content_type(&state, payload.content_type_id).await?;
    if state
        .resolver
        .exists(state.db.connection(), &ct, &payload.object_id)
        .await?
    {
        tracing::warn!(
            content_type_id = ct.id,
            object_id = %payload.object_id,
            "entity-deleted hook for an entity that still exists"
        );
        return Err(FavoritesError::StillExists("object"));
    }

    let entity = EntityRef::new(ct.id, payload.object_id);
    let removed = state.repository().on_entity_deleted(&entity).await;
    Ok(success(CleanupResponse { removed }))
}
