//! Client for the page server.
//!
//! [`RemoteStore`] is the seam the session talks through; [`HttpRemote`] is
//! the reqwest implementation. It also serves as the [`PushSource`] for the
//! page stream and as the renderer's [`OverlayStore`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use comic_core::{validate_upload, ImageKind, LibraryResult, PageRecord};
use comic_renderer::{OverlayStore, OverlayUpload, RenderError, RenderResult};
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{RemoteError, RemoteResult};
use crate::push::{push_events, PushSource, PushStream};

/// Pages and images as returned by a reset or an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedState {
    /// Pages to rebuild from.
    pub pages: Vec<PageRecord>,
    /// Every image the server knows.
    pub images: Vec<String>,
}

/// A state archive downloaded from or sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateArchive {
    /// File name, from `Content-Disposition` on export.
    pub file_name: String,
    /// Archive bytes.
    pub bytes: Vec<u8>,
}

/// An image file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    /// Original file name.
    pub file_name: String,
    /// MIME type, when known.
    pub mime: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Create an upload, the MIME type derived from the file name later.
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: None,
            bytes,
        }
    }

    /// Set an explicit MIME type.
    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Check type and size before anything is sent.
    ///
    /// # Errors
    ///
    /// See [`validate_upload`].
    pub fn validate(&self) -> LibraryResult<ImageKind> {
        validate_upload(
            &self.file_name,
            self.mime.as_deref(),
            u64::try_from(self.bytes.len()).unwrap_or(u64::MAX),
        )
    }
}

/// Image entry in a server response: a bare name or an item object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Bare file name.
    Name(String),
    /// Stored upload.
    Item {
        /// Server-side id.
        #[serde(default)]
        id: String,
        /// Stored file name.
        #[serde(default)]
        filename: String,
        /// Public URL.
        #[serde(default)]
        url: String,
    },
}

impl ImageRef {
    /// Library name of the image, if the entry carries one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            Self::Name(name) => name.as_str(),
            Self::Item { id, filename, url } => [filename.as_str(), id.as_str()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| url.rsplit('/').next().unwrap_or_default()),
        };
        (!name.is_empty()).then_some(name)
    }
}

fn image_names(refs: &[ImageRef]) -> Vec<String> {
    refs.iter()
        .filter_map(ImageRef::name)
        .map(str::to_string)
        .collect()
}

/// Persistent page storage.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Load the stored pages.
    async fn fetch_pages(&self) -> RemoteResult<Vec<PageRecord>>;

    /// Store the whole collection.
    async fn save_pages(&self, pages: &[PageRecord]) -> RemoteResult<()>;

    /// Upload images; returns the library names the server assigned.
    async fn upload_images(&self, uploads: Vec<ImageUpload>) -> RemoteResult<Vec<String>>;

    /// Delete an uploaded image.
    async fn delete_image(&self, name: &str) -> RemoteResult<()>;

    /// Download an uploaded image.
    async fn fetch_image(&self, name: &str) -> RemoteResult<Vec<u8>>;

    /// Clear all server state.
    async fn reset_state(&self) -> RemoteResult<LoadedState>;

    /// Download a state archive.
    async fn export_state(&self) -> RemoteResult<StateArchive>;

    /// Replace server state with an archive.
    async fn import_state(&self, archive: StateArchive) -> RemoteResult<LoadedState>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavePagesRequest<'a> {
    pages: &'a [PageRecord],
    page_count: usize,
}

#[derive(Deserialize)]
struct PagesResponse {
    #[serde(default)]
    pages: Option<Vec<PageRecord>>,
}

#[derive(Deserialize)]
struct StateResponse {
    #[serde(default)]
    pages: Option<Vec<PageRecord>>,
    #[serde(default)]
    images: Option<Vec<ImageRef>>,
}

impl From<StateResponse> for LoadedState {
    fn from(value: StateResponse) -> Self {
        Self {
            pages: value.pages.unwrap_or_default(),
            images: image_names(&value.images.unwrap_or_default()),
        }
    }
}

#[derive(Deserialize)]
struct SavedOverlaysResponse {
    #[serde(default)]
    saved: Vec<String>,
}

/// HTTP client for the page server.
#[derive(Clone)]
pub struct HttpRemote {
    inner: Arc<InnerRemote>,
}

struct InnerRemote {
    http: Client,
    base: Url,
    retry_config: RetryConfig,
}

impl HttpRemote {
    /// Create a client with default retry configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpRemote::with_retry_config`].
    pub fn new(base_url: impl AsRef<str>) -> RemoteResult<Self> {
        Self::with_retry_config(base_url, RetryConfig::default())
    }

    /// Create a client for the server named in `config`.
    ///
    /// # Errors
    ///
    /// See [`HttpRemote::with_retry_config`].
    pub fn from_config(config: &SyncConfig) -> RemoteResult<Self> {
        Self::new(&config.server_url)
    }

    /// Create a client with custom retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] if the URL is malformed.
    /// Returns [`RemoteError::Http`] if the HTTP client fails to build.
    pub fn with_retry_config(
        base_url: impl AsRef<str>,
        retry_config: RetryConfig,
    ) -> RemoteResult<Self> {
        let base =
            Url::parse(base_url.as_ref()).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(format!(
                "{base} cannot carry a path"
            )));
        }

        let http = Client::builder()
            .user_agent(format!("comic-sync/{}", crate::VERSION))
            .build()?;

        Ok(Self {
            inner: Arc::new(InnerRemote {
                http,
                base,
                retry_config,
            }),
        })
    }

    /// Server base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.inner.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidUrl(self.inner.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying transient failures with backoff.
    ///
    /// `build` is called once per attempt since request bodies are consumed.
    async fn send<F>(&self, operation: &str, build: F) -> RemoteResult<Response>
    where
        F: Fn() -> RemoteResult<RequestBuilder> + Send + Sync,
    {
        let config = &self.inner.retry_config;
        let mut last_error: Option<RemoteError> = None;

        for attempt in 0..config.max_attempts {
            let result = match build()?.send().await {
                Ok(response) => Self::check_status(response).await,
                Err(e) => Err(RemoteError::Http(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt + 1 < config.max_attempts => {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        "Request {} failed (attempt {}/{}), retrying in {}ms: {}",
                        operation,
                        attempt + 1,
                        config.max_attempts,
                        delay,
                        error
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RemoteError::UnexpectedResponse(format!("{operation}: no attempts configured"))
        }))
    }

    /// Turn a non-2xx response into [`RemoteError::Status`], keeping the
    /// server's `error` text when the body has one.
    async fn check_status(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Read a JSON body, failing on an `error` field.
    async fn json_body<T>(response: Response, operation: &str) -> RemoteResult<T>
    where
        for<'de> T: Deserialize<'de>,
    {
        let body = response.text().await?;
        let value: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        Self::require_no_error(&value, operation)?;
        Ok(serde_json::from_value(value)?)
    }

    /// A 2xx body carrying `"error"` is still a failure.
    fn require_no_error(value: &Value, operation: &str) -> RemoteResult<()> {
        match value.get("error") {
            Some(Value::String(message)) => Err(RemoteError::Server(message.clone())),
            Some(Value::Null) | None => Ok(()),
            Some(other) => Err(RemoteError::Server(format!("{operation}: {other}"))),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    #[instrument(skip(self))]
    async fn fetch_pages(&self) -> RemoteResult<Vec<PageRecord>> {
        let url = self.endpoint(&["get-pages"])?;
        let response = self
            .send("get-pages", || Ok(self.inner.http.get(url.clone())))
            .await?;
        let body: PagesResponse = Self::json_body(response, "get-pages").await?;
        let pages = body.pages.unwrap_or_default();
        debug!(pages = pages.len(), "Fetched pages");
        Ok(pages)
    }

    #[instrument(skip_all, fields(pages = pages.len()))]
    async fn save_pages(&self, pages: &[PageRecord]) -> RemoteResult<()> {
        let url = self.endpoint(&["save-pages"])?;
        let request = SavePagesRequest {
            pages,
            page_count: pages.len(),
        };
        let response = self
            .send("save-pages", || {
                Ok(self.inner.http.post(url.clone()).json(&request))
            })
            .await?;
        let _: Value = Self::json_body(response, "save-pages").await?;
        Ok(())
    }

    #[instrument(skip_all, fields(files = uploads.len()))]
    async fn upload_images(&self, uploads: Vec<ImageUpload>) -> RemoteResult<Vec<String>> {
        let url = self.endpoint(&["upload"])?;
        let response = self
            .send("upload", || {
                let mut form = Form::new();
                for upload in &uploads {
                    let mime = upload.mime.clone().unwrap_or_else(|| {
                        ImageKind::from_file_name(&upload.file_name)
                            .map_or("application/octet-stream", ImageKind::mime)
                            .to_string()
                    });
                    let part = Part::bytes(upload.bytes.clone())
                        .file_name(upload.file_name.clone())
                        .mime_str(&mime)?;
                    form = form.part("images[]", part);
                }
                Ok(self.inner.http.post(url.clone()).multipart(form))
            })
            .await?;
        let refs: Vec<ImageRef> = Self::json_body(response, "upload").await?;
        Ok(image_names(&refs))
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, name: &str) -> RemoteResult<()> {
        let url = self.endpoint(&["delete-image"])?;
        let response = self
            .send("delete-image", || {
                Ok(self.inner.http.post(url.clone()).form(&[("name", name)]))
            })
            .await?;
        let _: Value = Self::json_body(response, "delete-image").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_image(&self, name: &str) -> RemoteResult<Vec<u8>> {
        let url = self.endpoint(&["uploads", name])?;
        let response = self
            .send("uploads", || Ok(self.inner.http.get(url.clone())))
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    #[instrument(skip(self))]
    async fn reset_state(&self) -> RemoteResult<LoadedState> {
        let url = self.endpoint(&["state", "reset"])?;
        let response = self
            .send("state/reset", || Ok(self.inner.http.post(url.clone())))
            .await?;
        let body: StateResponse = Self::json_body(response, "state/reset").await?;
        Ok(body.into())
    }

    #[instrument(skip(self))]
    async fn export_state(&self) -> RemoteResult<StateArchive> {
        let url = self.endpoint(&["state", "export"])?;
        let response = self
            .send("state/export", || Ok(self.inner.http.get(url.clone())))
            .await?;
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        Ok(StateArchive {
            file_name: parse_filename_from_disposition(disposition.as_deref(), unix_millis()),
            bytes,
        })
    }

    #[instrument(skip_all, fields(file = %archive.file_name))]
    async fn import_state(&self, archive: StateArchive) -> RemoteResult<LoadedState> {
        let url = self.endpoint(&["state", "import"])?;
        let response = self
            .send("state/import", || {
                let part = Part::bytes(archive.bytes.clone())
                    .file_name(archive.file_name.clone())
                    .mime_str("application/zip")?;
                Ok(self
                    .inner
                    .http
                    .post(url.clone())
                    .multipart(Form::new().part("state", part)))
            })
            .await?;
        let body: StateResponse = Self::json_body(response, "state/import").await?;
        Ok(body.into())
    }
}

#[async_trait]
impl PushSource for HttpRemote {
    async fn subscribe(&self) -> RemoteResult<PushStream> {
        let url = self.endpoint(&["pages", "stream"])?;
        let response = self
            .inner
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(push_events(response.bytes_stream()))
    }
}

#[async_trait]
impl OverlayStore for HttpRemote {
    async fn fetch_overlay(&self, name: &str) -> RenderResult<Vec<u8>> {
        let file = format!("{name}.png");
        let fetch = async {
            let url = self.endpoint(&["overlays", file.as_str()])?;
            let response = self
                .send("overlays", || Ok(self.inner.http.get(url.clone())))
                .await?;
            Ok::<_, RemoteError>(response.bytes().await?.to_vec())
        };
        fetch.await.map_err(|e| RenderError::Overlay(e.to_string()))
    }

    async fn save_overlays(&self, overlays: Vec<OverlayUpload>) -> RenderResult<Vec<String>> {
        let save = async {
            let url = self.endpoint(&["templates", "overlays"])?;
            let body = json!({ "overlays": overlays });
            let response = self
                .send("templates/overlays", || {
                    Ok(self.inner.http.post(url.clone()).json(&body))
                })
                .await?;
            let saved: SavedOverlaysResponse =
                Self::json_body(response, "templates/overlays").await?;
            Ok::<_, RemoteError>(saved.saved)
        };
        save.await.map_err(|e| RenderError::Overlay(e.to_string()))
    }
}

/// Pick the archive file name out of a `Content-Disposition` header.
///
/// `filename*=UTF-8''...` wins and is percent-decoded (kept raw if the
/// escape is malformed); then `filename=`, quoted or not. Without either
/// the name is `comic-state-<timestamp_ms>.zip`.
#[must_use]
pub fn parse_filename_from_disposition(disposition: Option<&str>, timestamp_ms: u64) -> String {
    const EXTENDED: &str = "filename*=utf-8''";
    const PLAIN: &str = "filename=";

    let fallback = || format!("comic-state-{timestamp_ms}.zip");
    let Some(value) = disposition else {
        return fallback();
    };
    let lower = value.to_ascii_lowercase();

    if let Some(pos) = lower.find(EXTENDED) {
        let encoded = value[pos + EXTENDED.len()..]
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if !encoded.is_empty() {
            return percent_decode(encoded).unwrap_or_else(|| encoded.to_string());
        }
    }

    if let Some(pos) = lower.find(PLAIN) {
        let rest = value[pos + PLAIN.len()..].trim_start();
        let rest = rest.strip_prefix('"').unwrap_or(rest);
        let name = rest
            .split(|c| c == '"' || c == ';')
            .next()
            .unwrap_or_default()
            .trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    fallback()
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
