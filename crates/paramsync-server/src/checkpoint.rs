//! Durable, versioned model snapshots
//!
//! Layout under the checkpoint root:
//!
//! ```text
//! <root>/<job_id>/v00000000000000000042.ckpt   immutable artifact (gzip + bincode)
//! <root>/<job_id>/latest.json                  pointer to the newest artifact
//! ```
//!
//! Artifacts and the pointer are written to a temporary file and renamed into
//! place, so readers see either the old or the new file, never a partial one.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use paramsync_core::{CheckpointIoError, ModelSnapshot};

const POINTER_FILE: &str = "latest.json";
const ARTIFACT_PREFIX: &str = "v";
const ARTIFACT_SUFFIX: &str = ".ckpt";

/// Persists and reloads model snapshots for a job
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write `snapshot` durably and make it the latest for `job_id`.
    ///
    /// Persisting a version that already exists leaves storage unchanged.
    async fn persist(&self, snapshot: &ModelSnapshot, job_id: Uuid)
        -> Result<PathBuf, CheckpointIoError>;

    /// Most recent snapshot of `job_id`, if any was ever persisted
    async fn load_latest(&self, job_id: Uuid) -> Result<Option<ModelSnapshot>, CheckpointIoError>;

    /// Remove all but the newest `keep_last` artifacts; returns how many went
    async fn prune(&self, _job_id: Uuid, _keep_last: usize) -> Result<usize, CheckpointIoError> {
        Ok(0)
    }

    /// Directory holding the checkpoints of `job_id`
    fn location(&self, job_id: Uuid) -> PathBuf;
}

/// On-disk form of a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointRecord {
    version: u64,
    job_id: Uuid,
    created_at: DateTime<Utc>,
    weights: Vec<u8>,
}

/// Contents of `latest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LatestPointer {
    version: u64,
    artifact: String,
    created_at: DateTime<Utc>,
}

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Path to the artifact
    pub path: PathBuf,
    /// Model version stored in it
    pub version: u64,
}

/// Filesystem-backed checkpoint store
pub struct FsCheckpointStore {
    root: PathBuf,
    /// Serializes writers so the latest pointer only moves forward
    write_lock: Mutex<()>,
}

impl FsCheckpointStore {
    /// Store rooted at `root` (usually `data_dir/checkpoint/<experiment>`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All artifacts of `job_id`, oldest first
    pub async fn list(&self, job_id: Uuid) -> Result<Vec<CheckpointInfo>, CheckpointIoError> {
        let dir = self.location(job_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointIoError::io(&dir, e)),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointIoError::io(&dir, e))?
        {
            let path = entry.path();
            if let Some(version) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_artifact_name)
            {
                checkpoints.push(CheckpointInfo { path, version });
            }
        }

        checkpoints.sort_by_key(|c| c.version);
        Ok(checkpoints)
    }

    async fn read_pointer(&self, dir: &Path) -> Result<Option<LatestPointer>, CheckpointIoError> {
        let path = dir.join(POINTER_FILE);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CheckpointIoError::encoding(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointIoError::io(&path, e)),
        }
    }

    async fn read_artifact(
        &self,
        path: &Path,
        job_id: Uuid,
    ) -> Result<ModelSnapshot, CheckpointIoError> {
        let compressed = fs::read(path)
            .await
            .map_err(|e| CheckpointIoError::io(path, e))?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|e| CheckpointIoError::encoding(path, e))?;

        let record: CheckpointRecord =
            bincode::deserialize(&data).map_err(|e| CheckpointIoError::encoding(path, e))?;
        if record.job_id != job_id {
            return Err(CheckpointIoError::JobMismatch {
                path: path.to_path_buf(),
                expected: job_id,
                found: record.job_id,
            });
        }

        Ok(ModelSnapshot {
            version: record.version,
            weights: record.weights,
            created_at: record.created_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn persist(
        &self,
        snapshot: &ModelSnapshot,
        job_id: Uuid,
    ) -> Result<PathBuf, CheckpointIoError> {
        let dir = self.location(job_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointIoError::io(&dir, e))?;

        let _guard = self.write_lock.lock().await;

        let name = artifact_name(snapshot.version);
        let artifact = dir.join(&name);
        if fs::try_exists(&artifact)
            .await
            .map_err(|e| CheckpointIoError::io(&artifact, e))?
        {
            tracing::debug!(version = snapshot.version, path = ?artifact, "artifact already present");
        } else {
            let record = CheckpointRecord {
                version: snapshot.version,
                job_id,
                created_at: snapshot.created_at,
                weights: snapshot.weights.clone(),
            };
            let data =
                bincode::serialize(&record).map_err(|e| CheckpointIoError::encoding(&artifact, e))?;

            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&data)
                .map_err(|e| CheckpointIoError::io(&artifact, e))?;
            let compressed = encoder
                .finish()
                .map_err(|e| CheckpointIoError::io(&artifact, e))?;

            write_atomically(&artifact, &compressed).await?;
        }

        // Never rewind the pointer to an older version
        let current = self.read_pointer(&dir).await.unwrap_or(None);
        if current.map_or(true, |p| p.version <= snapshot.version) {
            let pointer = LatestPointer {
                version: snapshot.version,
                artifact: name,
                created_at: snapshot.created_at,
            };
            let pointer_path = dir.join(POINTER_FILE);
            let json = serde_json::to_vec_pretty(&pointer)
                .map_err(|e| CheckpointIoError::encoding(&pointer_path, e))?;
            write_atomically(&pointer_path, &json).await?;
        }

        tracing::info!(version = snapshot.version, path = ?artifact, "saved checkpoint");
        Ok(artifact)
    }

    async fn load_latest(&self, job_id: Uuid) -> Result<Option<ModelSnapshot>, CheckpointIoError> {
        let dir = self.location(job_id);

        match self.read_pointer(&dir).await {
            Ok(Some(pointer)) => {
                let path = dir.join(&pointer.artifact);
                match self.read_artifact(&path, job_id).await {
                    Ok(snapshot) if snapshot.version == pointer.version => {
                        return Ok(Some(snapshot));
                    }
                    Ok(snapshot) => tracing::warn!(
                        pointer = pointer.version,
                        artifact = snapshot.version,
                        "latest pointer disagrees with artifact, scanning"
                    ),
                    Err(e) => tracing::warn!(error = %e, "latest artifact unreadable, scanning"),
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "latest pointer unreadable, scanning"),
        }

        // Newest readable artifact wins
        for info in self.list(job_id).await?.into_iter().rev() {
            match self.read_artifact(&info.path, job_id).await {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => tracing::warn!(path = ?info.path, error = %e, "skipping unreadable checkpoint"),
            }
        }
        Ok(None)
    }

    async fn prune(&self, job_id: Uuid, keep_last: usize) -> Result<usize, CheckpointIoError> {
        if keep_last == 0 {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        let dir = self.location(job_id);
        let latest = self.read_pointer(&dir).await.unwrap_or(None).map(|p| p.version);
        let checkpoints = self.list(job_id).await?;
        let excess = checkpoints.len().saturating_sub(keep_last);

        let mut removed = 0;
        for info in checkpoints.into_iter().take(excess) {
            if Some(info.version) == latest {
                continue;
            }
            fs::remove_file(&info.path)
                .await
                .map_err(|e| CheckpointIoError::io(&info.path, e))?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, keep_last, "pruned old checkpoints");
        }
        Ok(removed)
    }

    fn location(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }
}

fn artifact_name(version: u64) -> String {
    format!("{ARTIFACT_PREFIX}{version:020}{ARTIFACT_SUFFIX}")
}

fn parse_artifact_name(name: &str) -> Option<u64> {
    name.strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?
        .parse()
        .ok()
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CheckpointIoError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("checkpoint");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    fs::write(&tmp, bytes)
        .await
        .map_err(|e| CheckpointIoError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(CheckpointIoError::io(path, e));
    }
    Ok(())
}
