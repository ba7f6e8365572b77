use std::sync::Arc;

use axum::{
    Json, async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::IntoResponse,
};
use serde::Serialize;
use tracing::info;

use crate::config::FavoritesSettings;
use crate::db::Database;
use crate::error::FavoritesError;
use crate::favorites::{EntityResolver, EventBus, FavoriteRepository};
use crate::model::UserId;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the shared secret on host hook calls.
pub const HOOK_SECRET_HEADER: &str = "x-favorites-hook-secret";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub events: Arc<EventBus>,
    pub resolver: Arc<dyn EntityResolver>,
    pub settings: Arc<FavoritesSettings>,
}

impl AppState {
    pub fn repository(&self) -> FavoriteRepository<'_> {
        FavoriteRepository::new(&self.db, &self.events)
    }
}

/// The authenticated caller. Rejects with 401 when the header is missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentUser(pub UserId);

/// The caller if authenticated, otherwise `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaybeUser(pub Option<UserId>);

fn user_from_parts(parts: &Parts) -> Result<Option<UserId>, FavoritesError> {
    let Some(value) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<UserId>().ok())
        .map(Some)
        .ok_or(FavoritesError::Unauthorized)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = FavoritesError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_parts(parts)?
            .map(CurrentUser)
            .ok_or(FavoritesError::Unauthorized)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = FavoritesError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(user_from_parts(parts).unwrap_or(None)))
    }
}

/// A call from the host application, authenticated by the configured hook
/// secret. Rejects with 401 when no secret is configured or it doesn't match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostHook;

#[async_trait]
impl FromRequestParts<AppState> for HostHook {
    type Rejection = FavoritesError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.settings.hook_secret.as_deref().filter(|s| !s.is_empty()) else {
            tracing::warn!("hook call refused, no hook secret configured");
            return Err(FavoritesError::Unauthorized);
        };

        match parts.headers.get(HOOK_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
            Some(given) if given == expected => Ok(HostHook),
            _ => Err(FavoritesError::Unauthorized),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_current_user_from_header() {
        let mut p = parts(Some("42"));
        assert_eq!(CurrentUser::from_request_parts(&mut p, &()).await.unwrap(), CurrentUser(42));
    }

    #[tokio::test]
    async fn test_current_user_rejects_missing_or_malformed_header() {
        let mut missing = parts(None);
        assert!(matches!(
            CurrentUser::from_request_parts(&mut missing, &()).await,
            Err(FavoritesError::Unauthorized)
        ));

        let mut malformed = parts(Some("alice"));
        assert!(matches!(
            CurrentUser::from_request_parts(&mut malformed, &()).await,
            Err(FavoritesError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_maybe_user_is_anonymous_without_valid_header() {
        let mut missing = parts(None);
        assert_eq!(MaybeUser::from_request_parts(&mut missing, &()).await.unwrap(), MaybeUser(None));

        let mut malformed = parts(Some("alice"));
        assert_eq!(MaybeUser::from_request_parts(&mut malformed, &()).await.unwrap(), MaybeUser(None));

        let mut present = parts(Some("7"));
        assert_eq!(MaybeUser::from_request_parts(&mut present, &()).await.unwrap(), MaybeUser(Some(7)));
    }
}
