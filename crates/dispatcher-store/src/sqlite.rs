use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatcher_model::{
  DispatchAssets, DispatchMetadata, DispatchStatus, Lattice, Lifecycle, Manifest,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::{AssetCatalog, AssetRecord, DispatchFilter, DispatchStore, Page, StoreError};

/// Open a SQLite pool for `url`, creating the database file if needed, and
/// run migrations.
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
  let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
  let pool = SqlitePoolOptions::new()
    .max_connections(8)
    .connect_with(options)
    .await?;
  migrate(&pool).await?;
  Ok(pool)
}

/// Run database migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
  sqlx::migrate!("../../migrations").run(pool).await?;
  Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
  e.as_database_error()
    .is_some_and(|db| db.is_unique_violation())
}

#[derive(FromRow)]
struct AssetRow {
  key: String,
  size: i64,
  digest_alg: Option<String>,
  digest: Option<String>,
}

impl From<AssetRow> for AssetRecord {
  fn from(row: AssetRow) -> Self {
    Self {
      key: row.key,
      size: u64::try_from(row.size).unwrap_or_default(),
      digest_alg: row.digest_alg,
      digest: row.digest,
    }
  }
}

/// SQLite-based asset catalog.
pub struct SqliteCatalog {
  pool: SqlitePool,
}

impl SqliteCatalog {
  /// Create a new catalog with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl AssetCatalog for SqliteCatalog {
  async fn reserve(&self, records: &[AssetRecord]) -> Result<(), StoreError> {
    let now = Utc::now();
    let mut tx = self.pool.begin().await?;

    for record in records {
      let size = i64::try_from(record.size).map_err(|_| StoreError::InvalidAsset {
        key: record.key.clone(),
        reason: "size out of range".to_string(),
      })?;

      sqlx::query(
        r#"
            INSERT INTO assets (key, size, digest_alg, digest, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
      )
      .bind(&record.key)
      .bind(size)
      .bind(&record.digest_alg)
      .bind(&record.digest)
      .bind(now)
      .execute(&mut *tx)
      .await
      .map_err(|e| {
        if is_unique_violation(&e) {
          StoreError::Conflict(record.key.clone())
        } else {
          e.into()
        }
      })?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn record_digest(&self, key: &str, alg: &str, digest: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE assets
            SET digest_alg = ?, digest = ?
            WHERE key = ?
            "#,
    )
    .bind(alg)
    .bind(digest)
    .bind(key)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(key.to_string()));
    }
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<AssetRecord>, StoreError> {
    let row: Option<AssetRow> = sqlx::query_as(
      r#"
            SELECT key, size, digest_alg, digest
            FROM assets
            WHERE key = ?
            "#,
    )
    .bind(key)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(AssetRecord::from))
  }

  async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<AssetRecord>, StoreError> {
    // LIMIT -1 means no limit in SQLite.
    let (limit, offset) = match page {
      Some(page) => (page.limit() as i64, page.offset() as i64),
      None => (-1, 0),
    };

    let rows: Vec<AssetRow> = sqlx::query_as(
      r#"
            SELECT key, size, digest_alg, digest
            FROM assets
            WHERE substr(key, 1, length(?)) = ?
            ORDER BY key ASC
            LIMIT ? OFFSET ?
            "#,
    )
    .bind(prefix)
    .bind(prefix)
    .bind(limit)
    .bind(offset)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(AssetRecord::from).collect())
  }

  async fn remove(&self, keys: &[String]) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    for key in keys {
      sqlx::query("DELETE FROM assets WHERE key = ?")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.pool.close().await;
    Ok(())
  }
}

#[derive(FromRow)]
struct MetadataRow {
  dispatch_id: String,
  root_dispatch_id: String,
  status: String,
  start_time: Option<DateTime<Utc>>,
  end_time: Option<DateTime<Utc>>,
}

impl TryFrom<MetadataRow> for DispatchMetadata {
  type Error = StoreError;

  fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
    Ok(Self {
      dispatch_id: row.dispatch_id,
      root_dispatch_id: row.root_dispatch_id,
      status: row.status.parse()?,
      lifecycle: Lifecycle::from_times(row.start_time, row.end_time)?,
    })
  }
}

#[derive(FromRow)]
struct DispatchRow {
  #[sqlx(flatten)]
  metadata: MetadataRow,
  assets: Json<DispatchAssets>,
  lattice: Json<Lattice>,
}

impl TryFrom<DispatchRow> for Manifest {
  type Error = StoreError;

  fn try_from(row: DispatchRow) -> Result<Self, Self::Error> {
    Ok(Self {
      metadata: row.metadata.try_into()?,
      lattice: row.lattice.0,
      assets: row.assets.0,
    })
  }
}

/// SQLite-based dispatch store.
///
/// Status and lifecycle timestamps live in their own columns so the execution
/// engine can update them without rewriting the manifest document.
pub struct SqliteDispatchStore {
  pool: SqlitePool,
}

impl SqliteDispatchStore {
  /// Create a new store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl DispatchStore for SqliteDispatchStore {
  async fn create(&self, manifest: &Manifest) -> Result<Manifest, StoreError> {
    let now = Utc::now();
    let metadata = &manifest.metadata;

    sqlx::query(
      r#"
            INSERT INTO dispatches (dispatch_id, root_dispatch_id, name, status, start_time, end_time, created_at, updated_at, assets, lattice)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&metadata.dispatch_id)
    .bind(&metadata.root_dispatch_id)
    .bind(manifest.name())
    .bind(metadata.status.as_str())
    .bind(metadata.start_time())
    .bind(metadata.end_time())
    .bind(now)
    .bind(now)
    .bind(Json(&manifest.assets))
    .bind(Json(&manifest.lattice))
    .execute(&self.pool)
    .await
    .map_err(|e| {
      if is_unique_violation(&e) {
        StoreError::Conflict(metadata.dispatch_id.clone())
      } else {
        e.into()
      }
    })?;

    Ok(manifest.clone())
  }

  async fn get(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError> {
    let row: Option<DispatchRow> = sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, status, start_time, end_time, assets, lattice
            FROM dispatches
            WHERE dispatch_id = ?
            "#,
    )
    .bind(dispatch_id)
    .fetch_optional(&self.pool)
    .await?;

    row.map(Manifest::try_from).transpose()
  }

  async fn list(&self, filter: &DispatchFilter) -> Result<Vec<DispatchMetadata>, StoreError> {
    let rows: Vec<MetadataRow> = sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, status, start_time, end_time
            FROM dispatches
            WHERE ? IS NULL OR dispatch_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
    )
    .bind(&filter.dispatch_id)
    .bind(&filter.dispatch_id)
    .bind(filter.page.limit() as i64)
    .bind(filter.page.offset() as i64)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(DispatchMetadata::try_from).collect()
  }

  async fn delete(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError> {
    let mut tx = self.pool.begin().await?;

    let row: Option<DispatchRow> = sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, status, start_time, end_time, assets, lattice
            FROM dispatches
            WHERE dispatch_id = ?
            "#,
    )
    .bind(dispatch_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
      return Ok(None);
    };

    sqlx::query("DELETE FROM dispatches WHERE dispatch_id = ?")
      .bind(dispatch_id)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Manifest::try_from(row).map(Some)
  }

  async fn update_lifecycle(
    &self,
    dispatch_id: &str,
    lifecycle: Lifecycle,
    status: Option<DispatchStatus>,
  ) -> Result<DispatchMetadata, StoreError> {
    let mut tx = self.pool.begin().await?;

    let row: Option<MetadataRow> = sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, status, start_time, end_time
            FROM dispatches
            WHERE dispatch_id = ?
            "#,
    )
    .bind(dispatch_id)
    .fetch_optional(&mut *tx)
    .await?;

    let mut metadata = DispatchMetadata::try_from(
      row.ok_or_else(|| StoreError::NotFound(dispatch_id.to_string()))?,
    )?;
    metadata.lifecycle = metadata.lifecycle.transition(lifecycle)?;
    if let Some(status) = status {
      metadata.status = metadata.status.transition(status)?;
    }

    sqlx::query(
      r#"
            UPDATE dispatches
            SET status = ?, start_time = ?, end_time = ?, updated_at = ?
            WHERE dispatch_id = ?
            "#,
    )
    .bind(metadata.status.as_str())
    .bind(metadata.start_time())
    .bind(metadata.end_time())
    .bind(Utc::now())
    .bind(dispatch_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(metadata)
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.pool.close().await;
    Ok(())
  }
}
