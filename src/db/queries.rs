use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::image::{ImageFilter, ImageRecord, ImageStats, NewImage};

const IMAGE_COLUMNS: &str =
    "id, name, external_id, size, mime_type, storage_path, source, created_at";

fn image_from_row(row: &PgRow) -> Result<ImageRecord, sqlx::Error> {
    Ok(ImageRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        external_id: row.try_get("external_id")?,
        size: row.try_get("size")?,
        mime_type: row.try_get("mime_type")?,
        storage_location: row.try_get("storage_path")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Look up an image by its source-provider identifier (idempotency check).
pub async fn find_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE external_id = $1 LIMIT 1"
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Insert a new image record
pub async fn insert_image(pool: &PgPool, image: &NewImage) -> Result<ImageRecord, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO images (name, external_id, size, mime_type, storage_path, source)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {IMAGE_COLUMNS}
        "#
    ))
    .bind(&image.name)
    .bind(&image.external_id)
    .bind(image.size)
    .bind(&image.mime_type)
    .bind(&image.storage_location)
    .bind(&image.source)
    .fetch_one(pool)
    .await?;

    image_from_row(&row)
}

/// Get an image by ID
pub async fn get_image(pool: &PgPool, id: Uuid) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Newest-first page of images, optionally restricted to one source.
pub async fn list_images(
    pool: &PgPool,
    filter: &ImageFilter,
) -> Result<Vec<ImageRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {IMAGE_COLUMNS}
        FROM images
        WHERE ($1::TEXT IS NULL OR source = $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(filter.source.as_deref())
    .bind(filter.limit)
    .bind(filter.offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(image_from_row).collect()
}

pub async fn count_images(pool: &PgPool, source: Option<&str>) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS total FROM images WHERE ($1::TEXT IS NULL OR source = $1)",
    )
    .bind(source)
    .fetch_one(pool)
    .await?;

    row.try_get("total")
}

/// Every image record, oldest first (reconciliation input).
pub async fn list_all_images(pool: &PgPool) -> Result<Vec<ImageRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(image_from_row).collect()
}

/// Delete an image record. Returns false if no row matched.
pub async fn delete_image(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn image_stats(pool: &PgPool) -> Result<ImageStats, sqlx::Error> {
    let totals = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(size), 0)::BIGINT AS total_size,
               COUNT(*) FILTER (WHERE created_at > NOW() - INTERVAL '24 hours') AS recent
        FROM images
        "#,
    )
    .fetch_one(pool)
    .await?;

    let by_source_rows = sqlx::query(
        "SELECT source, COUNT(*) AS count FROM images GROUP BY source ORDER BY source",
    )
    .fetch_all(pool)
    .await?;

    let mut by_source = BTreeMap::new();
    for row in &by_source_rows {
        by_source.insert(row.try_get::<String, _>("source")?, row.try_get::<i64, _>("count")?);
    }

    Ok(ImageStats {
        total_images: totals.try_get("total")?,
        total_size: totals.try_get("total_size")?,
        recent_imports_24h: totals.try_get("recent")?,
        by_source,
    })
}
