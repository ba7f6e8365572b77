use std::collections::HashMap;

use chrono::{DateTime, Utc};
use libsql::{Connection, Row};

use super::events::{EventBus, FavoriteCreated};
use crate::db::Database;
use crate::error::{FavoritesError, FavoritesResult};
use crate::model::{ContentType, EntityRef, Favorite, FavoritePage, Folder, ObjectStats, UserId};

const FAVORITE_COLUMNS: &str =
    "id, user_id, content_type_id, object_id, folder_id, score, shared, created_on";

/// Query and aggregation operations over favorites and folders.
///
/// Built per request from the shared database handle and the event bus the
/// host application registered its subscribers on.
pub struct FavoriteRepository<'a> {
    db: &'a Database,
    events: &'a EventBus,
}

impl<'a> FavoriteRepository<'a> {
    pub fn new(db: &'a Database, events: &'a EventBus) -> Self {
        Self { db, events }
    }

    fn conn(&self) -> &Connection {
        self.db.connection()
    }

    // ------------------------------------------------------------------
    // Content types
    // ------------------------------------------------------------------

    pub async fn get_or_create_content_type(&self, app_label: &str, model: &str) -> FavoritesResult<ContentType> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO content_types (app_label, model) VALUES (?, ?)",
                libsql::params![app_label, model],
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                "SELECT id, app_label, model FROM content_types WHERE app_label = ? AND model = ? LIMIT 1",
                libsql::params![app_label, model],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_content_type(&row)?),
            None => Err(anyhow::anyhow!("failed to get or create content type {app_label}.{model}").into()),
        }
    }

    pub async fn get_content_type(&self, id: i64) -> FavoritesResult<Option<ContentType>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, app_label, model FROM content_types WHERE id = ?",
                libsql::params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_content_type(&row)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Favorite queries
    // ------------------------------------------------------------------

    pub async fn favorites_for_user(&self, user_id: UserId) -> FavoritesResult<Vec<Favorite>> {
        let query = format!("SELECT {FAVORITE_COLUMNS} FROM favorites WHERE user_id = ? ORDER BY id");
        self.collect(&query, vec![user_id.into()]).await
    }

    pub async fn favorites_for_model(
        &self,
        content_type_id: i64,
        user_id: Option<UserId>,
    ) -> FavoritesResult<Vec<Favorite>> {
        match user_id {
            Some(user_id) => {
                let query = format!(
                    "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? AND user_id = ? ORDER BY id"
                );
                self.collect(&query, vec![content_type_id.into(), user_id.into()]).await
            }
            None => {
                let query = format!("SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? ORDER BY id");
                self.collect(&query, vec![content_type_id.into()]).await
            }
        }
    }

    pub async fn favorites_for_model_paginated(
        &self,
        content_type_id: i64,
        user_id: UserId,
        page: u32,
        per_page: u32,
    ) -> FavoritesResult<FavoritePage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = (page - 1) as i64 * per_page as i64;

        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM favorites WHERE content_type_id = ? AND user_id = ?",
                libsql::params![content_type_id, user_id],
            )
            .await?;
        let total: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let query = format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? AND user_id = ? ORDER BY id LIMIT ? OFFSET ?"
        );
        let favorites = self
            .collect(
                &query,
                vec![
                    content_type_id.into(),
                    user_id.into(),
                    (per_page as i64).into(),
                    offset.into(),
                ],
            )
            .await?;

        Ok(FavoritePage {
            has_next: offset + (favorites.len() as i64) < total,
            favorites,
            page,
            per_page,
            total,
        })
    }

    pub async fn favorites_for_object(
        &self,
        entity: &EntityRef,
        user_id: Option<UserId>,
    ) -> FavoritesResult<Vec<Favorite>> {
        match user_id {
            Some(user_id) => {
                let query = format!(
                    "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? AND object_id = ? AND user_id = ? ORDER BY id"
                );
                self.collect(
                    &query,
                    vec![
                        entity.content_type_id.into(),
                        entity.object_id.clone().into(),
                        user_id.into(),
                    ],
                )
                .await
            }
            None => {
                let query = format!(
                    "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? AND object_id = ? ORDER BY id"
                );
                self.collect(
                    &query,
                    vec![entity.content_type_id.into(), entity.object_id.clone().into()],
                )
                .await
            }
        }
    }

    /// Counts and favorite flags for a batch of entities of one content type.
    ///
    /// The content type is taken from the first entity. Every requested
    /// object id gets an entry; `is_favorite` is only ever set for `user_id`.
    pub async fn favorites_for_objects(
        &self,
        entities: &[EntityRef],
        user_id: Option<UserId>,
    ) -> FavoritesResult<HashMap<String, ObjectStats>> {
        let Some(first) = entities.first() else {
            return Ok(HashMap::new());
        };
        let content_type_id = first.content_type_id;

        let mut results: HashMap<String, ObjectStats> = HashMap::new();
        for entity in entities {
            results.entry(entity.object_id.clone()).or_insert(ObjectStats {
                count: 0,
                is_favorite: false,
                content_type_id,
            });
        }

        let placeholders = vec!["?"; results.len()].join(", ");
        let query = format!(
            r#"
            SELECT object_id, COUNT(*), MAX(CASE WHEN user_id = ? THEN 1 ELSE 0 END)
            FROM favorites
            WHERE content_type_id = ? AND object_id IN ({placeholders})
            GROUP BY object_id
            "#
        );

        let mut params: Vec<libsql::Value> = Vec::with_capacity(results.len() + 2);
        params.push(match user_id {
            Some(id) => id.into(),
            None => libsql::Value::Null,
        });
        params.push(content_type_id.into());
        for object_id in results.keys() {
            params.push(object_id.clone().into());
        }

        let mut rows = self.conn().query(&query, params).await?;
        while let Some(row) = rows.next().await? {
            let object_id: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let is_favorite: i64 = row.get(2)?;

            if let Some(stats) = results.get_mut(&object_id) {
                stats.count = count;
                stats.is_favorite = is_favorite != 0;
            }
        }

        Ok(results)
    }

    pub async fn favorite_for_user(&self, entity: &EntityRef, user_id: UserId) -> FavoritesResult<Favorite> {
        let query = format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE content_type_id = ? AND object_id = ? AND user_id = ?"
        );
        self.fetch_one(
            &query,
            vec![
                entity.content_type_id.into(),
                entity.object_id.clone().into(),
                user_id.into(),
            ],
        )
        .await?
        .ok_or(FavoritesError::NotFound("favorite"))
    }

    /// Favorite by primary key, visible only to its owner.
    pub async fn get_favorite(&self, id: i64, user_id: UserId) -> FavoritesResult<Favorite> {
        let query = format!("SELECT {FAVORITE_COLUMNS} FROM favorites WHERE id = ? AND user_id = ?");
        self.fetch_one(&query, vec![id.into(), user_id.into()])
            .await?
            .ok_or(FavoritesError::NotFound("favorite"))
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Returns `(count, average score)`; the average is `None` when there
    /// are no favorites.
    pub async fn score_summary(&self, entity: &EntityRef) -> FavoritesResult<(i64, Option<f64>)> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*), AVG(score) FROM favorites WHERE content_type_id = ? AND object_id = ?",
                libsql::params![entity.content_type_id, entity.object_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok((row.get(0)?, row.get::<Option<f64>>(1)?)),
            None => Ok((0, None)),
        }
    }

    pub async fn average_score_for_object(&self, entity: &EntityRef) -> FavoritesResult<Option<f64>> {
        Ok(self.score_summary(entity).await?.1)
    }

    pub async fn num_favorites_for_object(&self, entity: &EntityRef) -> FavoritesResult<i64> {
        Ok(self.score_summary(entity).await?.0)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Inserts a new favorite. A second favorite of the same entity by the
    /// same user fails with `UniqueConstraintViolation`.
    pub async fn create_favorite(&self, entity: &EntityRef, user_id: UserId, score: f64) -> FavoritesResult<Favorite> {
        let query = format!(
            r#"
            INSERT INTO favorites (user_id, content_type_id, object_id, score)
            VALUES (?, ?, ?, ?)
            RETURNING {FAVORITE_COLUMNS}
            "#
        );

        let inserted = async {
            let mut rows = self
                .conn()
                .query(
                    &query,
                    libsql::params![user_id, entity.content_type_id, entity.object_id.as_str(), score],
                )
                .await?;
            rows.next().await
        }
        .await;

        let row = match inserted {
            Ok(Some(row)) => row,
            Ok(None) => return Err(anyhow::anyhow!("failed to create favorite").into()),
            Err(e) if is_unique_violation(&e) => {
                return Err(FavoritesError::UniqueConstraintViolation {
                    user_id,
                    content_type_id: entity.content_type_id,
                    object_id: entity.object_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let favorite = row_to_favorite(&row)?;
        tracing::info!(
            favorite_id = favorite.id,
            user_id,
            content_type_id = entity.content_type_id,
            object_id = %entity.object_id,
            "favorite created"
        );
        self.notify_created(&favorite).await;
        Ok(favorite)
    }

    /// Returns the caller's existing favorite or creates it. Safe under
    /// concurrent callers: exactly one row is inserted and the others get it
    /// back with `created == false`.
    pub async fn get_or_create_favorite(
        &self,
        entity: &EntityRef,
        user_id: UserId,
        score: f64,
    ) -> FavoritesResult<(Favorite, bool)> {
        let query = format!(
            r#"
            INSERT INTO favorites (user_id, content_type_id, object_id, score)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, content_type_id, object_id) DO NOTHING
            RETURNING {FAVORITE_COLUMNS}
            "#
        );

        let inserted = self
            .fetch_one(
                &query,
                vec![
                    user_id.into(),
                    entity.content_type_id.into(),
                    entity.object_id.clone().into(),
                    score.into(),
                ],
            )
            .await?;

        match inserted {
            Some(favorite) => {
                tracing::info!(
                    favorite_id = favorite.id,
                    user_id,
                    content_type_id = entity.content_type_id,
                    object_id = %entity.object_id,
                    "favorite created"
                );
                self.notify_created(&favorite).await;
                Ok((favorite, true))
            }
            None => {
                tracing::debug!(user_id, object_id = %entity.object_id, "favorite already exists");
                Ok((self.favorite_for_user(entity, user_id).await?, false))
            }
        }
    }

    async fn notify_created(&self, favorite: &Favorite) {
        if self.events.is_empty() {
            return;
        }

        let entity = favorite.entity();
        match self.score_summary(&entity).await {
            Ok((count, average_score)) => self.events.publish(&FavoriteCreated {
                content_type_id: entity.content_type_id,
                object_id: entity.object_id,
                count,
                average_score,
            }),
            Err(e) => tracing::warn!(
                favorite_id = favorite.id,
                error = %e,
                "failed to compute aggregates for favorite event"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Mutation and deletion
    // ------------------------------------------------------------------

    pub async fn delete_favorite_for_user(&self, entity: &EntityRef, user_id: UserId) -> FavoritesResult<()> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM favorites WHERE content_type_id = ? AND object_id = ? AND user_id = ?",
                libsql::params![entity.content_type_id, entity.object_id.as_str(), user_id],
            )
            .await?;

        if deleted == 0 {
            return Err(FavoritesError::NotFound("favorite"));
        }
        Ok(())
    }

    pub async fn delete_favorite_by_id(&self, id: i64, user_id: UserId) -> FavoritesResult<bool> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM favorites WHERE id = ? AND user_id = ?",
                libsql::params![id, user_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Removes every favorite that references `entity`, whoever owns it.
    ///
    /// Called by the host after it deletes an entity. Failures are logged and
    /// reported as zero removed rows so they never block the host's delete.
    pub async fn on_entity_deleted(&self, entity: &EntityRef) -> u64 {
        let result = self
            .conn()
            .execute(
                "DELETE FROM favorites WHERE content_type_id = ? AND object_id = ?",
                libsql::params![entity.content_type_id, entity.object_id.as_str()],
            )
            .await;

        match result {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(
                        content_type_id = entity.content_type_id,
                        object_id = %entity.object_id,
                        removed,
                        "removed favorites of deleted entity"
                    );
                }
                removed
            }
            Err(e) => {
                tracing::warn!(
                    content_type_id = entity.content_type_id,
                    object_id = %entity.object_id,
                    error = %e,
                    "failed to clean up favorites of deleted entity"
                );
                0
            }
        }
    }

    pub async fn move_to_folder(
        &self,
        favorite_id: i64,
        user_id: UserId,
        folder_id: Option<i64>,
    ) -> FavoritesResult<Favorite> {
        if let Some(folder_id) = folder_id {
            self.get_folder(folder_id, user_id).await?;
        }

        let updated = self
            .conn()
            .execute(
                "UPDATE favorites SET folder_id = ? WHERE id = ? AND user_id = ?",
                libsql::params![folder_id, favorite_id, user_id],
            )
            .await?;

        if updated == 0 {
            return Err(FavoritesError::NotFound("favorite"));
        }
        self.get_favorite(favorite_id, user_id).await
    }

    pub async fn set_shared(&self, favorite_id: i64, user_id: UserId, shared: bool) -> FavoritesResult<Favorite> {
        let updated = self
            .conn()
            .execute(
                "UPDATE favorites SET shared = ? WHERE id = ? AND user_id = ?",
                libsql::params![shared as i64, favorite_id, user_id],
            )
            .await?;

        if updated == 0 {
            return Err(FavoritesError::NotFound("favorite"));
        }
        self.get_favorite(favorite_id, user_id).await
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    pub async fn create_folder(&self, user_id: UserId, name: &str) -> FavoritesResult<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FavoritesError::Validation("folder name must not be empty".to_string()));
        }

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO folders (user_id, name) VALUES (?, ?) RETURNING id, user_id, name",
                libsql::params![user_id, name],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_folder(&row)?),
            None => Err(anyhow::anyhow!("failed to create folder").into()),
        }
    }

    pub async fn folders_for_user(&self, user_id: UserId) -> FavoritesResult<Vec<Folder>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name FROM folders WHERE user_id = ? ORDER BY id",
                libsql::params![user_id],
            )
            .await?;

        let mut folders = Vec::new();
        while let Some(row) = rows.next().await? {
            folders.push(row_to_folder(&row)?);
        }
        Ok(folders)
    }

    pub async fn get_folder(&self, id: i64, user_id: UserId) -> FavoritesResult<Folder> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, name FROM folders WHERE id = ? AND user_id = ?",
                libsql::params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row_to_folder(&row)?),
            None => Err(FavoritesError::NotFound("folder")),
        }
    }

    pub async fn favorites_in_folder(&self, folder_id: i64, user_id: UserId) -> FavoritesResult<Vec<Favorite>> {
        self.get_folder(folder_id, user_id).await?;
        let query = format!("SELECT {FAVORITE_COLUMNS} FROM favorites WHERE folder_id = ? AND user_id = ? ORDER BY id");
        self.collect(&query, vec![folder_id.into(), user_id.into()]).await
    }

    /// Deletes a folder. Its favorites survive, detached from any folder.
    ///
    /// Runs under [`Database::lock_tx`], which serializes transactional writers
    /// only.
    pub async fn delete_folder(&self, id: i64, user_id: UserId) -> FavoritesResult<()> {
        self.get_folder(id, user_id).await?;

        let _guard = self.db.lock_tx().await;
        self.conn().execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            self.conn()
                .execute(
                    "UPDATE favorites SET folder_id = NULL WHERE folder_id = ?",
                    libsql::params![id],
                )
                .await?;
            self.conn()
                .execute(
                    "DELETE FROM folders WHERE id = ? AND user_id = ?",
                    libsql::params![id, user_id],
                )
                .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;

        match result {
            Ok(_) => {
                self.conn().execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(e) => {
                let _ = self.conn().execute("ROLLBACK", ()).await;
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Row helpers
    // ------------------------------------------------------------------

    async fn collect(&self, query: &str, params: Vec<libsql::Value>) -> FavoritesResult<Vec<Favorite>> {
        let mut rows = self.conn().query(query, params).await?;
        let mut favorites = Vec::new();
        while let Some(row) = rows.next().await? {
            favorites.push(row_to_favorite(&row)?);
        }
        Ok(favorites)
    }

    async fn fetch_one(&self, query: &str, params: Vec<libsql::Value>) -> FavoritesResult<Option<Favorite>> {
        let mut rows = self.conn().query(query, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_favorite(&row)?)),
            None => Ok(None),
        }
    }
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn row_to_content_type(row: &Row) -> anyhow::Result<ContentType> {
    Ok(ContentType {
        id: row.get(0)?,
        app_label: row.get(1)?,
        model: row.get(2)?,
    })
}

fn row_to_folder(row: &Row) -> anyhow::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
    })
}

fn row_to_favorite(row: &Row) -> anyhow::Result<Favorite> {
    let created_on: String = row.get(7)?;
    let created_on = DateTime::parse_from_rfc3339(&created_on)
        .map_err(|e| anyhow::anyhow!("invalid created_on {created_on:?}: {e}"))?
        .with_timezone(&Utc);
    let shared: i64 = row.get(6)?;

    Ok(Favorite {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content_type_id: row.get(2)?,
        object_id: row.get(3)?,
        folder_id: row.get(4)?,
        score: row.get(5)?,
        shared: shared != 0,
        created_on,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::favorites::events::ChannelSubscriber;
    use std::sync::Arc;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let events = EventBus::new();
        let book = FavoriteRepository::new(&db, &events)
            .get_or_create_content_type("library", "book")
            .await
            .unwrap();
        (db, book.id)
    }

    fn book(content_type_id: i64, id: &str) -> EntityRef {
        EntityRef::new(content_type_id, id)
    }

    #[tokio::test]
    async fn test_content_type_get_or_create_is_idempotent() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        let again = repo.get_or_create_content_type("library", "book").await.unwrap();
        assert_eq!(again.id, book_type);

        let other = repo.get_or_create_content_type("library", "author").await.unwrap();
        assert_ne!(other.id, book_type);
        assert_eq!(repo.get_content_type(other.id).await.unwrap(), Some(other));
        assert_eq!(repo.get_content_type(9999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_favorite_twice_is_rejected() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        let created = repo.create_favorite(&dune, 10, 2.5).await.unwrap();
        assert_eq!(created.score, 2.5);
        assert!(!created.shared);
        assert_eq!(created.folder_id, None);

        let err = repo.create_favorite(&dune, 10, 4.0).await.unwrap_err();
        assert!(matches!(err, FavoritesError::UniqueConstraintViolation { user_id: 10, .. }));
        assert_eq!(repo.num_favorites_for_object(&dune).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing_row() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        let (first, created) = repo.get_or_create_favorite(&dune, 10, 3.0).await.unwrap();
        assert!(created);
        let (second, created) = repo.get_or_create_favorite(&dune, 10, 5.0).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.score, 3.0);
        assert_eq!(repo.favorites_for_user(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_yields_one_row() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo_a = FavoriteRepository::new(&db, &events);
        let repo_b = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        let (a, b) = tokio::join!(
            repo_a.get_or_create_favorite(&dune, 10, 2.5),
            repo_b.get_or_create_favorite(&dune, 10, 2.5),
        );
        let (a, a_created) = a.unwrap();
        let (b, b_created) = b.unwrap();

        assert_eq!(a.id, b.id);
        assert!(a_created ^ b_created);
        assert_eq!(repo_a.num_favorites_for_object(&dune).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_aggregates_without_favorites() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        assert_eq!(repo.average_score_for_object(&dune).await.unwrap(), None);
        assert_eq!(repo.num_favorites_for_object(&dune).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_average_scores() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        for (user, score) in [(1, 2.0), (2, 3.0), (3, 4.0)] {
            repo.create_favorite(&dune, user, score).await.unwrap();
        }

        assert_eq!(repo.average_score_for_object(&dune).await.unwrap(), Some(3.0));
        assert_eq!(repo.num_favorites_for_object(&dune).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_favorite_for_user_not_found() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        let err = repo.favorite_for_user(&book(book_type, "1"), 10).await.unwrap_err();
        assert!(matches!(err, FavoritesError::NotFound("favorite")));
    }

    #[tokio::test]
    async fn test_filters_by_model_object_and_user() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let author_type = repo.get_or_create_content_type("library", "author").await.unwrap().id;

        repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.unwrap();
        repo.create_favorite(&book(book_type, "1"), 2, 2.5).await.unwrap();
        repo.create_favorite(&book(book_type, "2"), 1, 2.5).await.unwrap();
        repo.create_favorite(&book(author_type, "1"), 1, 2.5).await.unwrap();

        assert_eq!(repo.favorites_for_user(1).await.unwrap().len(), 3);
        assert_eq!(repo.favorites_for_model(book_type, None).await.unwrap().len(), 3);
        assert_eq!(repo.favorites_for_model(book_type, Some(2)).await.unwrap().len(), 1);
        assert_eq!(repo.favorites_for_object(&book(book_type, "1"), None).await.unwrap().len(), 2);

        let mine = repo.favorites_for_object(&book(book_type, "1"), Some(1)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, 1);
    }

    #[tokio::test]
    async fn test_favorites_for_objects_marks_only_callers_favorites() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let e1 = book(book_type, "1");
        let e2 = book(book_type, "2");
        let e3 = book(book_type, "3");

        repo.create_favorite(&e1, 10, 2.5).await.unwrap();
        repo.create_favorite(&e1, 11, 2.5).await.unwrap();
        repo.create_favorite(&e2, 11, 2.5).await.unwrap();

        let stats = repo
            .favorites_for_objects(&[e1.clone(), e2.clone(), e3.clone()], Some(10))
            .await
            .unwrap();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats["1"], ObjectStats { count: 2, is_favorite: true, content_type_id: book_type });
        assert_eq!(stats["2"], ObjectStats { count: 1, is_favorite: false, content_type_id: book_type });
        assert_eq!(stats["3"], ObjectStats { count: 0, is_favorite: false, content_type_id: book_type });

        let anonymous = repo.favorites_for_objects(&[e1, e2], None).await.unwrap();
        assert!(anonymous.values().all(|s| !s.is_favorite));
        assert_eq!(anonymous["1"].count, 2);
    }

    #[tokio::test]
    async fn test_favorites_for_objects_empty_input() {
        let (db, _) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        assert!(repo.favorites_for_objects(&[], Some(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entity_deletion_removes_every_owners_favorite() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let doomed = book(book_type, "1");
        let kept = book(book_type, "2");

        repo.create_favorite(&doomed, 1, 2.5).await.unwrap();
        repo.create_favorite(&doomed, 2, 2.5).await.unwrap();
        repo.create_favorite(&kept, 1, 2.5).await.unwrap();

        assert_eq!(repo.on_entity_deleted(&doomed).await, 2);
        assert_eq!(repo.num_favorites_for_object(&doomed).await.unwrap(), 0);
        assert_eq!(repo.num_favorites_for_object(&kept).await.unwrap(), 1);
        assert_eq!(repo.on_entity_deleted(&doomed).await, 0);
    }

    #[tokio::test]
    async fn test_entity_deletion_swallows_storage_errors() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.unwrap();

        db.connection().execute("DROP TABLE favorites", ()).await.unwrap();

        assert_eq!(repo.on_entity_deleted(&book(book_type, "1")).await, 0);
    }

    #[tokio::test]
    async fn test_created_event_fires_once_with_aggregates() {
        let (db, book_type) = setup().await;
        let (subscriber, mut rx) = ChannelSubscriber::new();
        let mut events = EventBus::new();
        events.subscribe(Arc::new(subscriber));
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        repo.create_favorite(&dune, 1, 2.0).await.unwrap();
        repo.get_or_create_favorite(&dune, 2, 4.0).await.unwrap();
        repo.get_or_create_favorite(&dune, 2, 4.0).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.average_score, Some(2.0));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.object_id, "1");
        assert_eq!(second.count, 2);
        assert_eq!(second.average_score, Some(3.0));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_created_event_with_dropped_receiver_does_not_fail_creation() {
        let (db, book_type) = setup().await;
        let (subscriber, rx) = ChannelSubscriber::new();
        drop(rx);
        let mut events = EventBus::new();
        events.subscribe(Arc::new(subscriber));
        let repo = FavoriteRepository::new(&db, &events);

        assert!(repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_favorite_for_user() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);
        let dune = book(book_type, "1");

        repo.create_favorite(&dune, 1, 2.5).await.unwrap();
        repo.create_favorite(&dune, 2, 2.5).await.unwrap();

        repo.delete_favorite_for_user(&dune, 1).await.unwrap();
        assert!(matches!(
            repo.delete_favorite_for_user(&dune, 1).await,
            Err(FavoritesError::NotFound(_))
        ));
        assert_eq!(repo.num_favorites_for_object(&dune).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_id_requires_owner() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        let fav = repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.unwrap();
        assert!(!repo.delete_favorite_by_id(fav.id, 2).await.unwrap());
        assert!(repo.delete_favorite_by_id(fav.id, 1).await.unwrap());
        assert!(matches!(repo.get_favorite(fav.id, 1).await, Err(FavoritesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paginated_listing() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        for id in 1..=5 {
            repo.create_favorite(&book(book_type, &id.to_string()), 1, 2.5).await.unwrap();
        }
        repo.create_favorite(&book(book_type, "1"), 2, 2.5).await.unwrap();

        let page = repo.favorites_for_model_paginated(book_type, 1, 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.favorites.len(), 2);
        assert!(page.has_next);

        let last = repo.favorites_for_model_paginated(book_type, 1, 3, 2).await.unwrap();
        assert_eq!(last.favorites.len(), 1);
        assert_eq!(last.favorites[0].object_id, "5");
        assert!(!last.has_next);

        let clamped = repo.favorites_for_model_paginated(book_type, 1, 0, 2).await.unwrap();
        assert_eq!(clamped.page, 1);
    }

    #[tokio::test]
    async fn test_folders_group_favorites() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        let reading = repo.create_folder(1, " To read ").await.unwrap();
        assert_eq!(reading.name, "To read");
        repo.create_folder(1, "To read").await.unwrap();
        let theirs = repo.create_folder(2, "Mine").await.unwrap();
        assert_eq!(repo.folders_for_user(1).await.unwrap().len(), 2);
        assert!(matches!(repo.create_folder(1, "  ").await, Err(FavoritesError::Validation(_))));

        let fav = repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.unwrap();
        let moved = repo.move_to_folder(fav.id, 1, Some(reading.id)).await.unwrap();
        assert_eq!(moved.folder_id, Some(reading.id));
        assert_eq!(repo.favorites_in_folder(reading.id, 1).await.unwrap().len(), 1);

        assert!(matches!(
            repo.move_to_folder(fav.id, 1, Some(theirs.id)).await,
            Err(FavoritesError::NotFound("folder"))
        ));
        assert!(matches!(
            repo.favorites_in_folder(reading.id, 2).await,
            Err(FavoritesError::NotFound("folder"))
        ));

        repo.delete_folder(reading.id, 1).await.unwrap();
        let detached = repo.get_favorite(fav.id, 1).await.unwrap();
        assert_eq!(detached.folder_id, None);
        assert!(matches!(repo.get_folder(reading.id, 1).await, Err(FavoritesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_shared() {
        let (db, book_type) = setup().await;
        let events = EventBus::new();
        let repo = FavoriteRepository::new(&db, &events);

        let fav = repo.create_favorite(&book(book_type, "1"), 1, 2.5).await.unwrap();
        assert!(repo.set_shared(fav.id, 1, true).await.unwrap().shared);
        assert!(matches!(repo.set_shared(fav.id, 2, true).await, Err(FavoritesError::NotFound(_))));
    }
}
