use reqwest::multipart::{Form, Part};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use still_loop::Config;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;

/// Test harness running the server in-process on a free port
struct TestServer {
    handle: JoinHandle<()>,
    port: u16,
    workspace: PathBuf,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(ffmpeg_bin: &str) -> Self {
        Self::start_with_config(Config {
            ffmpeg_bin: ffmpeg_bin.to_string(),
            ..Default::default()
        })
        .await
    }

    /// Start with `config`, overriding its port and workspace
    async fn start_with_config(config: Config) -> Self {
        let port = portpicker::pick_unused_port().expect("No available port");
        let workspace = std::env::temp_dir().join(format!(
            "still-loop-test-{}",
            uuid::Uuid::new_v4().simple()
        ));

        let config = Config {
            listen_on_port: port,
            workspace: workspace.to_string_lossy().into_owned(),
            ..config
        };

        let handle = tokio::spawn(async move {
            if let Err(error) = still_loop::run(config).await {
                eprintln!("server exited: {error:#}");
            }
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        // Poll until server is ready
        for _ in 0..200 {
            if let Ok(response) = client
                .get(format!("http://127.0.0.1:{port}/health"))
                .send()
                .await
                && response.status().is_success()
            {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        TestServer {
            handle,
            port,
            workspace,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    fn temp_dir(&self) -> PathBuf {
        self.workspace.join("temp")
    }

    fn uploads_dir(&self) -> PathBuf {
        self.workspace.join("uploads")
    }

    async fn generate(&self, form: Form) -> (reqwest::StatusCode, JsonValue) {
        let response = self
            .client
            .post(self.url("/generate-video"))
            .multipart(form)
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        let body = response.json::<JsonValue>().await.expect("json body");
        (status, body)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

fn form(image: Option<Vec<u8>>, duration: &str, width: &str, height: &str) -> Form {
    let mut form = Form::new()
        .text("duration", duration.to_string())
        .text("width", width.to_string())
        .text("height", height.to_string());
    if let Some(image) = image {
        form = form.part("image", Part::bytes(image).file_name("still.png"));
    }
    form
}

/// Shell script standing in for ffmpeg; `$last` is the output path
#[cfg(unix)]
fn fake_encoder(dir: &Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join("fake-ffmpeg");
    let script = format!("#!/bin/sh\nfor last; do :; done\n{body}\n");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn dir_len(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[tokio::test]
async fn test_missing_image_returns_400() {
    let server = TestServer::start("true").await;

    let (status, body) = server.generate(form(None, "3", "640", "480")).await;

    assert_eq!(status, 400);
    assert_eq!(body, serde_json::json!({ "error": "Invalid input" }));
}

#[tokio::test]
async fn test_invalid_numbers_return_400() {
    let server = TestServer::start("true").await;

    let cases = [
        ("0", "640", "480"),
        ("-3", "640", "480"),
        ("abc", "640", "480"),
        ("3", "0", "480"),
        ("3", "-640", "480"),
        ("3", "wide", "480"),
        ("3", "640", "0"),
        ("3", "640", "-480"),
        ("3", "640", ""),
    ];

    for (duration, width, height) in cases {
        let (status, body) = server
            .generate(form(Some(b"image".to_vec()), duration, width, height))
            .await;
        assert_eq!(status, 400, "{duration}/{width}/{height}");
        assert_eq!(body, serde_json::json!({ "error": "Invalid input" }));
    }

    // rejected uploads are not left behind
    assert!(dir_is_empty(&server.temp_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_success_removes_uploaded_image() {
    let server = TestServer::start("true").await;

    let (status, body) = server
        .generate(form(Some(b"image".to_vec()), "3", "640", "480"))
        .await;

    assert_eq!(status, 200);
    let url = body["videoUrl"].as_str().expect("videoUrl");
    assert!(url.starts_with("/uploads/"), "{url}");
    assert!(url.ends_with(".mp4"), "{url}");
    assert!(dir_is_empty(&server.temp_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_encoder_failure_returns_500_and_removes_uploaded_image() {
    let server = TestServer::start("false").await;

    let (status, body) = server
        .generate(form(Some(b"image".to_vec()), "3", "640", "480"))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body, serde_json::json!({ "error": "Error generating video" }));
    assert!(dir_is_empty(&server.temp_dir()));
    assert!(dir_is_empty(&server.uploads_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_encode_removes_partial_output() {
    let scripts = tempfile::tempdir().unwrap();
    let bin = fake_encoder(scripts.path(), "printf partial > \"$last\"\nexit 1");
    let server = TestServer::start(&bin).await;

    let (status, body) = server
        .generate(form(Some(b"image".to_vec()), "3", "640", "480"))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body, serde_json::json!({ "error": "Error generating video" }));
    assert!(dir_is_empty(&server.uploads_dir()));
    assert!(dir_is_empty(&server.temp_dir()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_request_timeout_returns_408_and_encoding_still_cleans_up() {
    let scripts = tempfile::tempdir().unwrap();
    let bin = fake_encoder(scripts.path(), "sleep 2\nprintf video > \"$last\"");
    let server = TestServer::start_with_config(Config {
        ffmpeg_bin: bin,
        request_timeout_secs: 1,
        ..Default::default()
    })
    .await;

    let response = server
        .client
        .post(server.url("/generate-video"))
        .multipart(form(Some(b"image".to_vec()), "3", "640", "480"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), 408);

    let mut finished = false;
    for _ in 0..100 {
        if dir_len(&server.uploads_dir()) == 1 && dir_is_empty(&server.temp_dir()) {
            finished = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(finished, "encoder output missing or upload not removed");
}

#[cfg(unix)]
#[tokio::test]
async fn test_concurrent_requests_get_distinct_urls() {
    let server = TestServer::start("true").await;
    let url = server.url("/generate-video");

    let mut requests = JoinSet::new();
    for _ in 0..5 {
        let client = server.client.clone();
        let url = url.clone();
        requests.spawn(async move {
            let response = client
                .post(url)
                .multipart(form(Some(b"image".to_vec()), "1", "64", "64"))
                .send()
                .await
                .expect("request failed");
            assert_eq!(response.status(), 200);
            let body = response.json::<JsonValue>().await.unwrap();
            body["videoUrl"].as_str().unwrap().to_string()
        });
    }

    let mut urls = HashSet::new();
    while let Some(result) = requests.join_next().await {
        assert!(urls.insert(result.unwrap()), "duplicate videoUrl");
    }
    assert_eq!(urls.len(), 5);
}

#[tokio::test]
async fn test_uploads_are_served_statically() {
    let server = TestServer::start("true").await;
    tokio::fs::write(server.uploads_dir().join("1700000000000.mp4"), b"video bytes")
        .await
        .unwrap();

    let response = server
        .client
        .get(server.url("/uploads/1700000000000.mp4"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"video bytes");

    let response = server
        .client
        .get(server.url("/uploads/missing.mp4"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

fn has_binary(bin: &str) -> bool {
    std::process::Command::new(bin)
        .arg("-version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// End to end against a real ffmpeg; skipped when ffmpeg/ffprobe are missing
#[tokio::test]
async fn test_real_ffmpeg_generates_playable_video() {
    if !has_binary("ffmpeg") || !has_binary("ffprobe") {
        eprintln!("ffmpeg/ffprobe not found, skipping");
        return;
    }

    let server = TestServer::start("ffmpeg").await;

    // solid red PNG made by ffmpeg itself
    let still = server.workspace.join("still.png");
    let status = std::process::Command::new("ffmpeg")
        .args(["-nostdin", "-y", "-f", "lavfi", "-i", "color=c=red:s=64x64", "-frames:v", "1"])
        .arg(&still)
        .output()
        .unwrap()
        .status;
    assert!(status.success());
    let image = tokio::fs::read(&still).await.unwrap();

    let (status, body) = server.generate(form(Some(image), "3", "640", "480")).await;
    assert_eq!(status, 200, "{body}");

    let url = body["videoUrl"].as_str().unwrap();
    let response = server.client.get(server.url(url)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let video = server.workspace.join("fetched.mp4");
    tokio::fs::write(&video, response.bytes().await.unwrap())
        .await
        .unwrap();

    let probe = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,pix_fmt:format=duration",
            "-of",
            "json",
        ])
        .arg(&video)
        .output()
        .unwrap();
    assert!(probe.status.success());
    let probe: JsonValue = serde_json::from_slice(&probe.stdout).unwrap();

    let stream = &probe["streams"][0];
    assert_eq!(stream["width"], 640);
    assert_eq!(stream["height"], 480);
    assert_eq!(stream["r_frame_rate"], "30/1");
    assert_eq!(stream["pix_fmt"], "yuv420p");

    let duration: f64 = probe["format"]["duration"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((duration - 3.0).abs() < 0.2, "duration {duration}");

    assert!(dir_is_empty(&server.temp_dir()));
}
