//! Favorites Module
//!
//! Lets users mark any entity of the host application as a favorite, group
//! favorites into folders, score them, and read back per-object counts and
//! average scores.
//!
//! Entities are named by a polymorphic reference: a registered content type
//! plus the entity's primary key as text. The host supplies an
//! [`EntityResolver`] to check references against its own storage, and tells
//! us about deleted entities through [`FavoriteRepository::on_entity_deleted`]
//! (or the `/hooks/entity-deleted` route) so their favorites are removed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use favorites::favorites;
//!
//! let repo = favorites::FavoriteRepository::new(&db, &events);
//! let (favorite, created) = repo.get_or_create_favorite(&entity, user_id, 2.5).await?;
//!
//! let app = Router::new()
//!     .nest("/favorites", favorites::routes())
//!     .with_state(app_state);
//! ```

mod events;
mod handler;
mod repository;
mod resolver;
mod routes;

pub use events::{ChannelSubscriber, EventBus, FavoriteCreated, FavoriteSubscriber};
pub use repository::FavoriteRepository;
pub use resolver::{EntityResolver, TableResolver};
pub use routes::routes;

use crate::config::ContentTypeRegistration;
use crate::db::Database;
use crate::error::FavoritesResult;
use crate::model::ContentType;

/// Returns the migrations for the favorites module, in application order.
pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("favorites_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}

/// Makes sure every configured content type has a row, returning them in
/// configuration order.
pub async fn register_content_types(
    db: &Database,
    registrations: &[ContentTypeRegistration],
) -> FavoritesResult<Vec<ContentType>> {
    let events = EventBus::new();
    let repo = FavoriteRepository::new(db, &events);

    let mut content_types = Vec::with_capacity(registrations.len());
    for reg in registrations {
        let ct = repo.get_or_create_content_type(&reg.app_label, &reg.model).await?;
        tracing::info!(
            content_type_id = ct.id,
            app_label = %ct.app_label,
            model = %ct.model,
            table = %reg.table,
            "registered content type"
        );
        content_types.push(ct);
    }
    Ok(content_types)
}
