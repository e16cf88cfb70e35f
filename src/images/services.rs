use std::io::Cursor;

use anyhow::Context;
use bytes::Bytes;
use futures_util::future::join_all;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::UploadForm;
use crate::{error::AppError, state::AppState};

pub const TOUR_IMAGE_SIZE: (u32, u32) = (2000, 1333);
pub const USER_PHOTO_SIZE: (u32, u32) = (500, 500);
const JPEG_QUALITY: u8 = 90;

fn millis_now() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// Cover-crops to exactly `size` and re-encodes as JPEG on the blocking pool.
pub async fn resize_jpeg(input: Bytes, size: (u32, u32)) -> Result<Bytes, AppError> {
    let encoded = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, AppError> {
        let img = image::load_from_memory(&input).map_err(|_| AppError::NotAnImage)?;
        let resized = img.resize_to_fill(size.0, size.1, FilterType::Lanczos3);
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&resized.to_rgb8())
            .context("jpeg encode")?;
        Ok(out.into_inner())
    })
    .await
    .context("resize task")??;
    Ok(Bytes::from(encoded))
}

async fn resize_and_store(
    state: &AppState,
    dir: &str,
    file_name: String,
    input: Bytes,
    size: (u32, u32),
) -> Result<String, AppError> {
    let jpeg = resize_jpeg(input, size).await?;
    state
        .storage
        .put_object(&format!("img/{dir}/{file_name}"), jpeg, "image/jpeg")
        .await?;
    Ok(file_name)
}

/// Deletes previously stored files. Failures are logged, never returned.
pub async fn discard_images(state: &AppState, dir: &str, names: &[String]) {
    for name in names {
        let key = format!("img/{dir}/{name}");
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(%key, error = ?err, "orphaned image not removed");
        }
    }
}

/// File names referenced by a patch from [`store_tour_images`].
pub fn tour_image_names(patch: &Map<String, Value>) -> Vec<String> {
    let cover = patch.get("imageCover").and_then(Value::as_str);
    let gallery = patch
        .get("images")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    cover.into_iter().chain(gallery).map(str::to_string).collect()
}

/// Resizes `imageCover` and `images` concurrently and returns the fields
/// to merge into the tour. When any image fails the others are removed again.
#[instrument(skip(state, form))]
pub async fn store_tour_images(
    state: &AppState,
    tour_id: Uuid,
    form: &UploadForm,
) -> Result<Map<String, Value>, AppError> {
    let stamp = millis_now();
    let cover = form.files_named("imageCover").next();
    let jobs = cover
        .map(|upload| (format!("tour-{tour_id}-{stamp}-cover.jpeg"), upload))
        .into_iter()
        .chain(
            form.files_named("images")
                .enumerate()
                .map(|(i, upload)| (format!("tour-{tour_id}-{stamp}-{}.jpeg", i + 1), upload)),
        )
        .map(|(name, upload)| resize_and_store(state, "tours", name, upload.bytes.clone(), TOUR_IMAGE_SIZE));

    let mut stored = Vec::new();
    let mut failure = None;
    for result in join_all(jobs).await {
        match result {
            Ok(name) => stored.push(name),
            Err(err) => failure = failure.or(Some(err)),
        }
    }
    if let Some(err) = failure {
        discard_images(state, "tours", &stored).await;
        return Err(err);
    }

    let mut patch = Map::new();
    let mut names = stored.into_iter();
    if cover.is_some() {
        if let Some(name) = names.next() {
            patch.insert("imageCover".into(), Value::String(name));
        }
    }
    let gallery: Vec<Value> = names.map(Value::String).collect();
    if !gallery.is_empty() {
        patch.insert("images".into(), Value::Array(gallery));
    }
    info!(stored = patch.len(), "tour images processed");
    Ok(patch)
}

/// Stores the optional `photo` upload as `user-{id}-{millis}.jpeg`.
#[instrument(skip(state, form))]
pub async fn store_user_photo(
    state: &AppState,
    user_id: Uuid,
    form: &UploadForm,
) -> Result<Option<String>, AppError> {
    let Some(upload) = form.files_named("photo").next() else {
        return Ok(None);
    };
    let name = format!("user-{user_id}-{}.jpeg", millis_now());
    let stored = resize_and_store(state, "users", name, upload.bytes.clone(), USER_PHOTO_SIZE).await?;
    Ok(Some(stored))
}
