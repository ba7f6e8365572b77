use axum::{
    Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};

use super::handler;
use crate::error::FavoritesError;
use crate::handler::AppState;

/// Gives 405s from method routing the same `{error}` body as other failures.
async fn method_not_allowed_body(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let allow = response.headers().get(header::ALLOW).cloned();
    let mut rewritten = FavoritesError::MethodNotAllowed.into_response();
    if let Some(allow) = allow {
        rewritten.headers_mut().insert(header::ALLOW, allow);
    }
    rewritten
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::my_favorites))
        .route("/ajax/add", post(handler::ajax_add_favorite))
        .route("/ajax/remove", post(handler::ajax_remove_favorite))
        .route("/status", post(handler::favorite_status))
        .route("/add/:content_type_id/:object_id", post(handler::create_favorite))
        .route("/list/:content_type_id", get(handler::favorite_list))
        .route(
            "/delete/:id",
            get(handler::confirm_delete_favorite).post(handler::delete_favorite),
        )
        .route("/drop/:id", get(handler::drop_favorite).post(handler::drop_favorite))
        .route("/folders", get(handler::list_folders))
        .route("/folders", post(handler::create_folder))
        .route("/folders/:id", delete(handler::delete_folder))
        .route("/folders/:id/favorites", get(handler::folder_favorites))
        .route("/items/:id/folder", put(handler::move_to_folder))
        .route("/items/:id/shared", put(handler::set_shared))
        .route("/hooks/entity-deleted", post(handler::entity_deleted))
        .layer(middleware::map_response(method_not_allowed_body))
}
