use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const VIDEO_EXTENSION: &str = "mp4";

/// Hands out millisecond timestamps for naming generated videos.
///
/// Tokens are strictly increasing within a process: when two requests land in
/// the same millisecond (or the wall clock steps backwards) the next token is
/// `last + 1`, so concurrent requests never share an output file.
#[derive(Debug, Default)]
pub struct VideoIdGenerator {
    last: AtomicU64,
}

impl VideoIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            // the closure always returns Some
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Output file name, e.g. `1718000000000.mp4`
    pub fn next_file_name(&self) -> String {
        format!("{}.{VIDEO_EXTENSION}", self.next_id())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
