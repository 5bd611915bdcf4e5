use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Output frame rate of every generated video
pub const FRAME_RATE: u32 = 30;
/// 4:2:0 chroma subsampling, playable almost everywhere
pub const PIXEL_FORMAT: &str = "yuv420p";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to spawn encoder {bin:?}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for encoder: {0}")]
    Wait(#[source] std::io::Error),

    #[error("encoder exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Parameters of one still-image loop encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopJob {
    pub image: PathBuf,
    pub output: PathBuf,
    pub duration: u32,
    pub width: u32,
    pub height: u32,
}

impl LoopJob {
    /// Encoder command line, without the binary name
    pub fn args(&self) -> Vec<OsString> {
        #[rustfmt::skip]
        let args: Vec<OsString> = vec![
            // Never prompt, never read the server's stdin
            "-nostdin".into(),
            "-y".into(),

            // Repeat the single frame forever; -t below cuts it
            "-loop".into(), "1".into(),
            "-i".into(), self.image.clone().into_os_string(),

            "-t".into(), self.duration.to_string().into(),
            "-r".into(), FRAME_RATE.to_string().into(),
            "-pix_fmt".into(), PIXEL_FORMAT.into(),

            // Exact geometry, aspect ratio is not preserved
            "-vf".into(), format!("scale={}:{}", self.width, self.height).into(),

            self.output.clone().into_os_string(),
        ];
        args
    }
}

/// Runs an external ffmpeg-compatible binary
#[derive(Clone, Debug)]
pub struct Encoder {
    bin: String,
}

impl Encoder {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Run the encoder to completion.
    ///
    /// The child is not killed when the returned future is dropped, so callers
    /// that must survive client disconnects should drive this from a spawned
    /// task.
    pub async fn encode(&self, job: &LoopJob) -> Result<(), EncodeError> {
        let args = job.args();
        debug!(bin = %self.bin, ?args, "Spawning encoder");

        let started = Instant::now();
        let child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(EncodeError::Wait)?;

        if !output.status.success() {
            return Err(EncodeError::Failed {
                status: output.status,
                stderr: stderr_tail(&output.stderr),
            });
        }

        info!(
            output = %job.output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Encoding finished"
        );
        Ok(())
    }
}

/// Last few lines of encoder stderr; ffmpeg prints its banner first and the
/// actual error last.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines = text.lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}
