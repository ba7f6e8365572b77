use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use libsql::Connection;

use crate::config::ContentTypeRegistration;
use crate::model::ContentType;

/// Resolves a polymorphic reference against the host application's storage.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn exists(&self, conn: &Connection, content_type: &ContentType, object_id: &str) -> Result<bool>;
}

/// Looks entities up by primary key in host tables that share our database.
#[derive(Debug, Default, Clone)]
pub struct TableResolver {
    tables: HashMap<(String, String), String>,
}

impl TableResolver {
    pub fn new(registrations: &[ContentTypeRegistration]) -> Result<Self> {
        let mut tables = HashMap::new();
        for reg in registrations {
            if !is_identifier(&reg.table) {
                anyhow::bail!(
                    "invalid table name {:?} for content type {}.{}",
                    reg.table,
                    reg.app_label,
                    reg.model
                );
            }
            tables.insert((reg.app_label.clone(), reg.model.clone()), reg.table.clone());
        }
        Ok(Self { tables })
    }

    pub fn table_for(&self, content_type: &ContentType) -> Option<&str> {
        self.tables
            .get(&(content_type.app_label.clone(), content_type.model.clone()))
            .map(|s| s.as_str())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl EntityResolver for TableResolver {
    async fn exists(&self, conn: &Connection, content_type: &ContentType, object_id: &str) -> Result<bool> {
        let Some(table) = self.table_for(content_type) else {
            tracing::debug!(
                app_label = %content_type.app_label,
                model = %content_type.model,
                "no table registered for content type"
            );
            return Ok(false);
        };

        let query = format!("SELECT 1 FROM \"{}\" WHERE id = ? LIMIT 1", table);
        let mut rows = conn.query(&query, libsql::params![object_id]).await?;
        Ok(rows.next().await?.is_some())
    }
}
