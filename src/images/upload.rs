use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{error::AppError, extract::JsonBody, query::coerce};

pub const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Upload {
    pub field: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A JSON object or a multipart form. File parts that are not images are
/// rejected here, so handlers never see them.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: Map<String, Value>,
    pub files: Vec<Upload>,
}

impl UploadForm {
    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Upload> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }

    /// Only the listed file fields, each at most the given number of times.
    pub fn limit_files(&self, allowed: &[(&str, usize)]) -> Result<(), AppError> {
        for upload in &self.files {
            let Some((_, max)) = allowed.iter().find(|(name, _)| *name == upload.field) else {
                return Err(AppError::BadRequest(format!("Unexpected field: {}", upload.field)));
            };
            if self.files_named(&upload.field).count() > *max {
                return Err(AppError::BadRequest(format!(
                    "Too many files for {} (at most {max})",
                    upload.field
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequest<S> for UploadForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let JsonBody(fields) = JsonBody::<Map<String, Value>>::from_request(req, state).await?;
            return Ok(UploadForm { fields, files: Vec::new() });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            if file_name.is_none() && content_type.is_none() {
                let text = field.text().await?;
                form.fields.insert(name, coerce(&text));
                continue;
            }
            // Browsers send an empty, unnamed part for an untouched file input.
            if file_name.as_deref() == Some("") {
                continue;
            }
            let content_type = content_type.unwrap_or_else(|| "application/octet-stream".into());
            if !content_type.starts_with("image/") {
                warn!(field = %name, %content_type, "rejected non-image upload");
                return Err(AppError::NotAnImage);
            }
            let bytes = field.bytes().await?;
            debug!(field = %name, size = bytes.len(), "upload received");
            form.files.push(Upload {
                field: name,
                content_type,
                bytes,
            });
        }
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{multipart_body, BOUNDARY};
    use axum::body::Body;

    fn multipart_request(body: Vec<u8>) -> Request {
        Request::builder()
            .method("PATCH")
            .uri("/")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn collects_fields_and_images() {
        let body = multipart_body(&[
            ("name", None, b"Leo".as_slice()),
            ("price", None, b"497".as_slice()),
            ("photo", Some(("me.png", "image/png")), b"\x89PNG".as_slice()),
        ]);
        let form = UploadForm::from_request(multipart_request(body), &()).await.unwrap();
        assert_eq!(form.fields["name"], "Leo");
        assert_eq!(form.fields["price"], 497);
        assert_eq!(form.files_named("photo").count(), 1);
        assert!(form.limit_files(&[("photo", 1)]).is_ok());
        assert!(form.limit_files(&[("imageCover", 1)]).is_err());
    }

    #[tokio::test]
    async fn rejects_non_images() {
        let body = multipart_body(&[("photo", Some(("notes.txt", "text/plain")), b"hello".as_slice())]);
        let err = UploadForm::from_request(multipart_request(body), &()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAnImage));
    }

    #[tokio::test]
    async fn json_bodies_pass_through() {
        let req = Request::builder()
            .method("PATCH")
            .uri("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"New name"}"#))
            .unwrap();
        let form = UploadForm::from_request(req, &()).await.unwrap();
        assert_eq!(form.fields["name"], "New name");
        assert!(form.files.is_empty());
    }
}
