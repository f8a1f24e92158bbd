use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use storyface::ingest::{detect_format, encode_image, normalize};
use storyface::{BlendMode, BoundingBox, FaceData, OutputFormat, Personalizer};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::upload::{find_stored, TempUpload};

/// Multipart envelope overhead allowed on top of the file limits.
const MULTIPART_SLACK: usize = 64 * 1024;

pub fn app(state: AppState) -> Router {
    // Two files per request at most.
    let body_limit = state.config().max_upload_bytes() * 2 + MULTIPART_SLACK;
    Router::new()
        .route("/health", get(health))
        .route("/detect-face", post(detect_face))
        .route("/personalize", post(personalize))
        .route("/download/:file_id", get(download))
        .route("/upload-illustration-template", post(upload_template))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    ready: bool,
    timestamp: String,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        ready: state.is_ready(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
struct Detection {
    success: bool,
    file_id: Uuid,
    faces: Vec<FaceData>,
    image_shape: (u32, u32),
}

#[tracing::instrument(name = "Detect faces", skip_all, err(Display))]
async fn detect_face(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Detection>, ApiError> {
    let deadline = state.deadline();
    let detector = state.detector().await?;
    let mut fields = read_fields(multipart, state.config().max_upload_mb).await?;
    let file = take(&mut fields, "file")?;

    let upload = store_photo(&state, deadline, file).await?;
    let path = upload.path().to_path_buf();
    let personalizer = Personalizer::from_settings(state.config().pipeline.clone()).face_detector(detector);
    let (faces, image_shape) = state
        .run_blocking(deadline, move || {
            let photo = std::fs::read(&path).map_err(|e| storyface::StoryfaceError::Decode(e.to_string()))?;
            personalizer.detect_faces(&photo)
        })
        .await?;

    tracing::info!(faces = faces.len(), "detection finished");
    Ok(Json(Detection {
        success: true,
        // Only labels the response; the upload is removed when it drops.
        file_id: upload.id(),
        faces,
        image_shape,
    }))
}

#[derive(Debug, Serialize)]
struct Personalized {
    success: bool,
    output_file_id: Uuid,
    coords: BoundingBox,
    blend: BlendMode,
    message: &'static str,
}

/// Fields: `child_photo`, and either `illustration` or a stored `template_id`.
#[tracing::instrument(name = "Personalize", skip_all, err(Display))]
async fn personalize(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Personalized>, ApiError> {
    let deadline = state.deadline();
    let detector = state.detector().await?;
    let config = state.config();
    let mut fields = read_fields(multipart, config.max_upload_mb).await?;
    let photo = store_photo(&state, deadline, take(&mut fields, "child_photo")?).await?;

    // Held until the run ends so the upload is removed on every path.
    let mut illustration_upload = None;
    let illustration_path = match (fields.remove("illustration"), fields.remove("template_id")) {
        (Some(bytes), _) => {
            let ext = image_extension(&bytes)?;
            let upload = TempUpload::store(&config.upload_dir, "template", ext, &bytes).await?;
            let path = upload.path().to_path_buf();
            illustration_upload = Some(upload);
            path
        }
        (None, Some(id)) => {
            let id = parse_id(&String::from_utf8_lossy(&id))?;
            find_stored(&config.upload_dir, id, "template")
                .await?
                .ok_or(ApiError::NotFound)?
        }
        (None, None) => return Err(ApiError::MissingField("illustration")),
    };

    let mut settings = config.pipeline.clone();
    let remaining = deadline.saturating_duration_since(Instant::now());
    settings.timeout_ms.get_or_insert(remaining.as_millis().max(1) as u64);
    let personalizer = Personalizer::from_settings(settings).face_detector(detector);
    let photo_path = photo.path().to_path_buf();
    let (coords, blend, png) = state
        .run_blocking(deadline, move || {
            let read = |path: &std::path::Path| {
                std::fs::read(path).map_err(|e| storyface::StoryfaceError::Decode(e.to_string()))
            };
            let composite = personalizer.personalize(&read(&photo_path)?, &read(&illustration_path)?)?;
            let png = encode_image(&composite.image, OutputFormat::Png, 1.0)?;
            Ok((composite.coords, composite.blend, png))
        })
        .await?;
    drop(illustration_upload);
    drop(photo);

    let output_file_id = Uuid::new_v4();
    let output = config.output_dir.join(output_name(output_file_id));
    tokio::fs::write(&output, &png).await?;
    tracing::info!(%output_file_id, ?coords, ?blend, "personalized illustration written");

    Ok(Json(Personalized {
        success: true,
        output_file_id,
        coords,
        blend,
        message: "Illustration personalized successfully",
    }))
}

async fn download(State(state): State<AppState>, Path(file_id): Path<String>) -> Result<Response, ApiError> {
    let id = parse_id(&file_id).map_err(|_| ApiError::NotFound)?;
    let name = output_name(id);
    let bytes = match tokio::fs::read(state.config().output_dir.join(&name)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(err) => return Err(err.into()),
    };
    let headers = [
        (header::CONTENT_TYPE, "image/png".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
    ];
    Ok((headers, bytes).into_response())
}

#[derive(Debug, Serialize)]
struct TemplateStored {
    success: bool,
    template_id: Uuid,
    message: &'static str,
}

#[tracing::instrument(name = "Upload template", skip_all, err(Display))]
async fn upload_template(State(state): State<AppState>, multipart: Multipart) -> Result<Json<TemplateStored>, ApiError> {
    let config = state.config();
    let mut fields = read_fields(multipart, config.max_upload_mb).await?;
    let bytes = take(&mut fields, "file")?;
    let ext = image_extension(&bytes)?;
    let template_id = TempUpload::store(&config.upload_dir, "template", ext, &bytes).await?.keep();
    tracing::info!(%template_id, "template stored");
    Ok(Json(TemplateStored {
        success: true,
        template_id,
        message: "Template uploaded successfully",
    }))
}

fn output_name(id: Uuid) -> String {
    format!("{id}_personalized.png")
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("invalid file id `{raw}`")))
}

fn image_extension(bytes: &[u8]) -> Result<&'static str, ApiError> {
    let format = detect_format(bytes)?;
    Ok(format.extensions_str().first().copied().unwrap_or("img"))
}

/// Normalize a photo upload and keep it on disk for the duration of the request.
async fn store_photo(state: &AppState, deadline: Instant, bytes: Bytes) -> Result<TempUpload, ApiError> {
    let ingest = state.config().ingest.clone();
    let normalized = state
        .run_blocking(deadline, move || normalize(&bytes, ingest.max_edge, ingest.quality))
        .await?;
    tracing::debug!(
        original = normalized.original_size,
        normalized = normalized.data.len(),
        width = normalized.width,
        height = normalized.height,
        "photo normalized"
    );
    Ok(TempUpload::store(&state.config().upload_dir, "child", "jpg", &normalized.data).await?)
}

async fn read_fields(mut multipart: Multipart, limit_mb: usize) -> Result<HashMap<String, Bytes>, ApiError> {
    let limit = limit_mb * 1024 * 1024;
    let mut fields = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit_mb))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let data = field.bytes().await.map_err(|e| ApiError::from_multipart(e, limit_mb))?;
        if data.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit_mb));
        }
        fields.insert(name, data);
    }
    Ok(fields)
}

fn take(fields: &mut HashMap<String, Bytes>, name: &'static str) -> Result<Bytes, ApiError> {
    fields.remove(name).ok_or(ApiError::MissingField(name))
}
