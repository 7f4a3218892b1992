use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::queries;
use crate::models::image::{ImageFilter, ImageRecord, ImageStats, NewImage};

/// Metadata store for imported images.
///
/// Shared by the transfer pipeline (dedupe lookups, inserts), the reconciliation
/// sweep (full scan, deletes) and the HTTP layer (listing, stats).
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn ping(&self) -> Result<(), sqlx::Error>;

    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<ImageRecord>, sqlx::Error>;

    async fn insert(&self, image: &NewImage) -> Result<ImageRecord, sqlx::Error>;

    async fn get(&self, id: Uuid) -> Result<Option<ImageRecord>, sqlx::Error>;

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>, sqlx::Error>;

    async fn count(&self, source: Option<&str>) -> Result<i64, sqlx::Error>;

    async fn list_all(&self) -> Result<Vec<ImageRecord>, sqlx::Error>;

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn stats(&self) -> Result<ImageStats, sqlx::Error>;
}

/// PostgreSQL-backed [`ImageRepository`].
#[derive(Clone)]
pub struct PgImageRepository {
    pool: PgPool,
}

impl PgImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ImageRecord>, sqlx::Error> {
        queries::find_by_external_id(&self.pool, external_id).await
    }

    async fn insert(&self, image: &NewImage) -> Result<ImageRecord, sqlx::Error> {
        queries::insert_image(&self.pool, image).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageRecord>, sqlx::Error> {
        queries::get_image(&self.pool, id).await
    }

    async fn list(&self, filter: &ImageFilter) -> Result<Vec<ImageRecord>, sqlx::Error> {
        queries::list_images(&self.pool, filter).await
    }

    async fn count(&self, source: Option<&str>) -> Result<i64, sqlx::Error> {
        queries::count_images(&self.pool, source).await
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, sqlx::Error> {
        queries::list_all_images(&self.pool).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        queries::delete_image(&self.pool, id).await
    }

    async fn stats(&self) -> Result<ImageStats, sqlx::Error> {
        queries::image_stats(&self.pool).await
    }
}
