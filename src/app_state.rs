use crate::Config;
use crate::encoder::Encoder;
use crate::video_id::VideoIdGenerator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

pub const TEMP_DIR: &str = "temp";
pub const UPLOADS_DIR: &str = "uploads";
/// URL prefix under which `UPLOADS_DIR` is served
pub const UPLOADS_ROUTE: &str = "/uploads";

async fn init_workspace(workspace: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(workspace.join(TEMP_DIR)).await?;
    tokio::fs::create_dir_all(workspace.join(UPLOADS_DIR)).await?;
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub encoder: Encoder,
    pub video_ids: Arc<VideoIdGenerator>,
    /// `None` when concurrent encodings are unbounded
    pub encode_permits: Option<Arc<Semaphore>>,
    pub max_upload_size: u64,

    pub temp_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let workspace = PathBuf::from(&config.workspace);
        init_workspace(&workspace).await?;

        let encode_permits = (config.permits > 0).then(|| Arc::new(Semaphore::new(config.permits)));
        info!(
            workspace = %workspace.display(),
            permits = config.permits,
            ffmpeg = %config.ffmpeg_bin,
            "Workspace ready"
        );

        Ok(Self {
            encoder: Encoder::new(config.ffmpeg_bin.clone()),
            video_ids: Arc::new(VideoIdGenerator::new()),
            encode_permits,
            max_upload_size: config.max_upload_size,

            temp_dir: workspace.join(TEMP_DIR),
            uploads_dir: workspace.join(UPLOADS_DIR),
        })
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.as_path()
    }

    pub fn uploads_dir(&self) -> &Path {
        self.uploads_dir.as_path()
    }

    /// Wait for an encoder slot. Returns `None` when no limit is configured.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.encode_permits.clone()?;
        // the semaphore is never closed
        semaphore.acquire_owned().await.ok()
    }
}
