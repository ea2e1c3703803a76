//! src/services/storage_service.rs
//!
//! StorageService: media payloads on local disk, media records in SQLite.
//! Payloads live flat beneath `base_path/{filename}`; filenames are generated
//! by the upload pipeline and never come from the client.

use crate::models::media::{Media, MediaType};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MEDIA_COLUMNS: &str = "id, url, local_path, filename, original_filename, media_type, \
                             size, checksum, created_at, updated_at";

const MAX_FILENAME_LEN: usize = 255;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Position after which a media listing resumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Clone, Debug)]
pub struct ListMediaParams {
    pub after: Option<MediaCursor>,
    pub limit: usize,
}

#[derive(Debug)]
pub struct ListMediaResult {
    pub media: Vec<Media>,
    pub is_truncated: bool,
    pub next_cursor: Option<MediaCursor>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("media `{0}` not found")]
    MediaNotFound(Uuid),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("file `{0}` already exists")]
    FileExists(String),
    #[error("invalid filename")]
    InvalidFilename,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the persistence half of the media pipeline:
/// - Store a payload (writes bytes to disk and inserts a record into SQLite)
/// - Fetch one, many or a page of records
/// - Open a stored payload for streaming
/// - Delete a record and its payload
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for media records.
    pub db: Arc<SqlitePool>,

    /// Directory on disk where payloads are stored.
    pub base_path: PathBuf,

    /// Public base URL; payload URLs are `{public_url}/files/{filename}`.
    pub public_url: String,
}

impl StorageService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Reject anything that is not a plain file name inside `base_path`.
    fn ensure_filename_safe(&self, filename: &str) -> StorageResult<()> {
        if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
            return Err(StorageError::InvalidFilename);
        }
        if filename.starts_with('.') || filename.contains("..") {
            return Err(StorageError::InvalidFilename);
        }
        if filename
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(StorageError::InvalidFilename);
        }
        Ok(())
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.base_path.join(filename)
    }

    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/files/{}", self.public_url, filename)
    }

    /// Create the storage directory if it does not exist yet.
    pub async fn ensure_base_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// Write `data` as `filename` and insert its media record.
    ///
    /// - Refuses to replace an existing payload.
    /// - Writes to a temporary file, fsyncs, then renames into place.
    /// - Computes the MD5 checksum and size from the bytes written.
    /// - Removes the payload again if the record insert fails.
    pub async fn store_media(
        &self,
        filename: &str,
        original_filename: &str,
        data: &[u8],
    ) -> StorageResult<Media> {
        self.ensure_filename_safe(filename)?;
        self.ensure_base_dir().await?;

        let file_path = self.file_path(filename);
        if fs::try_exists(&file_path).await? {
            return Err(StorageError::FileExists(filename.to_string()));
        }
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let size = data.len() as i64;
        let checksum = format!("{:x}", md5::compute(data));
        let now = Utc::now();

        let insert_result = sqlx::query_as::<_, Media>(&format!(
            "INSERT INTO media ({MEDIA_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {MEDIA_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(self.file_url(filename))
        .bind(file_path.to_string_lossy().into_owned())
        .bind(filename)
        .bind(original_filename)
        .bind(MediaType::detect(filename).as_str())
        .bind(size)
        .bind(&checksum)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(media) => {
                debug!(id = %media.id, filename, size, "stored media");
                Ok(media)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Fetch a media record by id.
    pub async fn get_media(&self, id: Uuid) -> StorageResult<Media> {
        sqlx::query_as::<_, Media>(&format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?"))
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::MediaNotFound(id),
                other => StorageError::Sqlx(other),
            })
    }

    /// Fetch every record whose id is in `ids`. Unknown ids are skipped.
    pub async fn get_many_media(&self, ids: &[Uuid]) -> StorageResult<Vec<Media>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE id IN ("
        ));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY created_at ASC, id ASC");

        let rows = builder
            .build_query_as::<Media>()
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// List records oldest first, resuming after `params.after`.
    pub async fn list_media(&self, params: ListMediaParams) -> StorageResult<ListMediaResult> {
        let limit = params.limit.clamp(1, MAX_PAGE_SIZE);
        let fetch_limit = limit + 1;

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {MEDIA_COLUMNS} FROM media"));
        if let Some(after) = &params.after {
            builder.push(" WHERE created_at > ");
            builder.push_bind(after.created_at);
            builder.push(" OR (created_at = ");
            builder.push_bind(after.created_at);
            builder.push(" AND id > ");
            builder.push_bind(after.id);
            builder.push(")");
        }
        builder.push(" ORDER BY created_at ASC, id ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Media> = builder.build_query_as().fetch_all(&*self.db).await?;

        let is_truncated = rows.len() == fetch_limit;
        if is_truncated {
            rows.pop();
        }
        let next_cursor = if is_truncated {
            rows.last().map(|last| MediaCursor {
                created_at: last.created_at,
                id: last.id,
            })
        } else {
            None
        };

        Ok(ListMediaResult {
            media: rows,
            is_truncated,
            next_cursor,
        })
    }

    /// Open a stored payload for reading. Returns the file and its length.
    pub async fn open_file(&self, filename: &str) -> StorageResult<(File, u64)> {
        self.ensure_filename_safe(filename)?;
        let path = self.file_path(filename);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::FileNotFound(filename.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Delete a media record and its payload.
    ///
    /// A payload that is already gone is logged and otherwise ignored.
    pub async fn delete_media(&self, id: Uuid) -> StorageResult<Media> {
        let media = self.get_media(id).await?;

        let result = sqlx::query("DELETE FROM media WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::MediaNotFound(id));
        }

        let file_path = self.file_path(&media.filename);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(id = %id, "file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        Ok(media)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}
