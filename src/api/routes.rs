use crate::api::ApiError;
use crate::app_state::UPLOADS_ROUTE;
use crate::encoder::{EncodeError, LoopJob, remove_if_exists};
use crate::params::GenerationRequest;
use crate::AppState;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, error, info, warn};

pub const IMAGE_FIELD: &str = "image";
pub const DURATION_FIELD: &str = "duration";
pub const WIDTH_FIELD: &str = "width";
pub const HEIGHT_FIELD: &str = "height";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    pub video_url: String,
}

/// An image saved to the temp dir; removed exactly once by whoever ends the
/// request.
#[derive(Debug)]
struct UploadedImage {
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct GenerateVideoForm {
    image: Option<UploadedImage>,
    duration: Option<String>,
    width: Option<String>,
    height: Option<String>,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /generate-video`
///
/// Reads the multipart form, validates it, runs the encoder and answers with
/// the public URL of the generated video. The response is held until the
/// encoder exits.
pub async fn generate_video(
    Extension(state): Extension<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateVideoResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "Not a multipart request");
        ApiError::InvalidInput
    })?;

    let mut form = GenerateVideoForm::default();
    if let Err(error) = read_form(&state, &mut multipart, &mut form).await {
        if let Some(image) = form.image.take() {
            discard_file(&image.path, "uploaded image").await;
        }
        return Err(error);
    }

    let Some(image) = form.image.take() else {
        debug!("Missing image field");
        return Err(ApiError::InvalidInput);
    };

    let Some(request) = GenerationRequest::parse(
        form.duration.as_deref(),
        form.width.as_deref(),
        form.height.as_deref(),
    ) else {
        debug!(
            duration = ?form.duration,
            width = ?form.width,
            height = ?form.height,
            "Invalid generation parameters"
        );
        discard_file(&image.path, "uploaded image").await;
        return Err(ApiError::InvalidInput);
    };

    let file_name = state.video_ids.next_file_name();
    let job = LoopJob {
        image: image.path,
        output: state.uploads_dir().join(&file_name),
        duration: request.duration,
        width: request.width,
        height: request.height,
    };
    info!(
        %file_name,
        image_size = image.size,
        duration = request.duration,
        width = request.width,
        height = request.height,
        "Generating video"
    );

    // Detached so a client disconnect neither kills the encoder nor skips cleanup
    let task_state = state.clone();
    let outcome = tokio::spawn(encode_and_cleanup(task_state, job)).await;

    match outcome {
        Ok(Ok(())) => Ok(Json(GenerateVideoResponse {
            video_url: format!("{UPLOADS_ROUTE}/{file_name}"),
        })),
        Ok(Err(error)) => {
            error!(%file_name, %error, "Failed to generate video");
            Err(ApiError::EncodingFailure)
        }
        Err(error) => {
            error!(%file_name, %error, "Encoding task aborted");
            Err(ApiError::EncodingFailure)
        }
    }
}

async fn encode_and_cleanup(state: AppState, job: LoopJob) -> Result<(), EncodeError> {
    let _permit = state.acquire_permit().await;

    let result = state.encoder.encode(&job).await;
    if result.is_err() {
        discard_file(&job.output, "partial output").await;
    }
    discard_file(&job.image, "uploaded image").await;

    result
}

async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut GenerateVideoForm,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(IMAGE_FIELD) => {
                if form.image.is_some() {
                    debug!("More than one image field");
                    return Err(ApiError::InvalidInput);
                }
                form.image = Some(save_image(state, field).await?);
            }
            Some(DURATION_FIELD) => {
                form.duration = Some(field.text().await.map_err(multipart_error)?);
            }
            Some(WIDTH_FIELD) => {
                form.width = Some(field.text().await.map_err(multipart_error)?);
            }
            Some(HEIGHT_FIELD) => {
                form.height = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => debug!(?name, "Ignoring unknown form field"),
        }
    }

    Ok(())
}

/// Stream the image field into a uniquely named file in the temp dir
async fn save_image(state: &AppState, mut field: Field<'_>) -> Result<UploadedImage, ApiError> {
    let path = state.temp_dir().join(uuid::Uuid::new_v4().simple().to_string());
    let original_name = field.file_name().map(str::to_owned);
    debug!(?original_name, path = %path.display(), "Saving uploaded image");

    let mut file = tokio::fs::File::create(&path).await.map_err(|error| {
        error!(path = %path.display(), %error, "Failed to create upload file");
        ApiError::EncodingFailure
    })?;

    let mut size = 0u64;
    let result = loop {
        let chunk: Bytes = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break file.flush().await.map_err(|error| {
                error!(path = %path.display(), %error, "Failed to flush upload file");
                ApiError::EncodingFailure
            }),
            Err(error) => break Err(multipart_error(error)),
        };

        size += chunk.len() as u64;
        if size > state.max_upload_size {
            warn!(?original_name, limit = state.max_upload_size, "Uploaded image too large");
            break Err(ApiError::PayloadTooLarge);
        }

        if let Err(error) = file.write_all(&chunk).await {
            error!(path = %path.display(), %error, "Failed to write upload file");
            break Err(ApiError::EncodingFailure);
        }
    };
    drop(file);

    match result {
        Ok(()) => Ok(UploadedImage { path, size }),
        Err(error) => {
            discard_file(&path, "partial upload").await;
            Err(error)
        }
    }
}

fn multipart_error(error: MultipartError) -> ApiError {
    debug!(%error, "Malformed multipart body");
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::InvalidInput
    }
}

async fn discard_file(path: &Path, what: &'static str) {
    match remove_if_exists(path).await {
        Ok(true) => debug!(path = %path.display(), what, "Removed file"),
        Ok(false) => {}
        Err(error) => warn!(path = %path.display(), what, %error, "Failed to remove file"),
    }
}
