//! MinerU cloud OCR backend
//!
//! Protocol:
//! 1. Local files are uploaded first: request a presigned URL from
//!    `/api/v4/file-urls/batch`, then `PUT` the bytes there. URL sources skip
//!    this step.
//! 2. Create an extraction task at `/api/v4/extract/task`.
//! 3. Poll `/api/v4/extract/task/{task_id}` until the task is `done` or `failed`.
//! 4. Download the markdown from the task's `md_url` and the result archive
//!    from `full_zip_url`. Images in the archive are kept next to the
//!    markdown when a results directory is configured.
//!
//! Every response is wrapped in `{ code, msg, data }`; `code != 0` is a failure.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use zip::ZipArchive;

use super::provider::OcrBackend;
use super::types::{OcrBackendKind, OcrError, OcrOutput, OcrReport};
use crate::remote::{truncate_body, Disposition};

const UPLOAD_ENDPOINT: &str = "/api/v4/file-urls/batch";
const TASK_ENDPOINT: &str = "/api/v4/extract/task";

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// MinerU connection settings
#[derive(Debug, Clone)]
pub struct MineruSettings {
    pub base_url: String,
    pub api_key: String,
    pub poll_interval: Duration,
    /// Document language hint passed to the layout model
    pub language: String,
    pub enable_formula: bool,
    /// Markdown and images land in `<results_dir>/<name>/`
    pub results_dir: Option<PathBuf>,
    /// Page count above which a document is reported as oversized
    pub max_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    files: Vec<UploadSlot>,
}

#[derive(Debug, Deserialize)]
struct UploadSlot {
    presigned_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    state: String,
    #[serde(default)]
    md_url: Option<String>,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    extract_progress: Option<ExtractProgress>,
}

#[derive(Debug, Deserialize)]
struct ExtractProgress {
    #[serde(default)]
    extracted_pages: Option<u32>,
    #[serde(default)]
    total_pages: Option<u32>,
}

/// Download locations of a finished task
#[derive(Debug)]
struct FinishedTask {
    md_url: Option<String>,
    full_zip_url: Option<String>,
    total_pages: Option<u32>,
}

/// Contents of the result archive we care about
#[derive(Debug, Default)]
struct ResultBundle {
    markdown: Option<String>,
    /// `(file name, bytes)`, directories stripped
    images: Vec<(String, Vec<u8>)>,
}

/// MinerU API provider
pub struct MineruBackend {
    client: reqwest::Client,
    settings: MineruSettings,
}

impl MineruBackend {
    pub fn new(client: reqwest::Client, mut settings: MineruSettings) -> Self {
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        Self { client, settings }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    /// Send a request and unwrap the `{code, msg, data}` envelope
    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, OcrError> {
        let response = request
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(OcrError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                status,
                body: truncate_body(&body),
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(format!("Failed to parse MinerU response: {}", e)))?;

        if envelope.code != 0 {
            return Err(OcrError::Provider {
                disposition: envelope_disposition(&envelope.msg),
                message: format!("MinerU code {}: {}", envelope.code, envelope.msg),
            });
        }

        envelope
            .data
            .ok_or_else(|| OcrError::InvalidResponse("MinerU response without data".to_string()))
    }

    async fn upload_file(&self, path: &Path) -> Result<String, OcrError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            OcrError::SourceUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let data: UploadData = self
            .call(self.client.post(self.endpoint(UPLOAD_ENDPOINT)).json(&serde_json::json!({
                "files": [{
                    "name": file_name,
                    "size": bytes.len(),
                    "is_ocr": true
                }]
            })))
            .await?;

        let slot = data
            .files
            .into_iter()
            .next()
            .ok_or_else(|| OcrError::InvalidResponse("MinerU returned no upload slot".to_string()))?;
        let (Some(presigned_url), Some(file_url)) = (slot.presigned_url, slot.url) else {
            return Err(OcrError::InvalidResponse(
                "MinerU upload slot without URLs".to_string(),
            ));
        };

        let response = self
            .client
            .put(&presigned_url)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(OcrError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                status,
                body: truncate_body(&body),
            });
        }

        tracing::debug!(file = %file_name, url = %file_url, "Uploaded source to MinerU");
        Ok(file_url)
    }

    async fn create_task(&self, file_url: &str) -> Result<String, OcrError> {
        let created: TaskCreated = self
            .call(self.client.post(self.endpoint(TASK_ENDPOINT)).json(&serde_json::json!({
                "url": file_url,
                "is_ocr": true,
                "enable_formula": self.settings.enable_formula,
                "enable_table": true,
                "layout_model": "doclayout_yolo",
                "language": self.settings.language,
            })))
            .await?;

        tracing::info!(task_id = %created.task_id, "MinerU task created");
        Ok(created.task_id)
    }

    /// Poll until the task settles. Unbounded; the caller enforces the deadline.
    async fn poll_task(&self, task_id: &str) -> Result<FinishedTask, OcrError> {
        let url = self.endpoint(&format!("{}/{}", TASK_ENDPOINT, task_id));
        let mut total_pages = None;

        loop {
            match self.call::<TaskStatus>(self.client.get(&url)).await {
                Ok(status) => {
                    if let Some(pages) = status.extract_progress.as_ref().and_then(|p| p.total_pages) {
                        total_pages = Some(pages);
                    }

                    match status.state.as_str() {
                        "done" => {
                            if status.md_url.is_none() && status.full_zip_url.is_none() {
                                return Err(OcrError::InvalidResponse(
                                    "finished task without md_url or full_zip_url".to_string(),
                                ));
                            }
                            return Ok(FinishedTask {
                                md_url: status.md_url,
                                full_zip_url: status.full_zip_url,
                                total_pages,
                            });
                        }
                        "failed" => {
                            return Err(OcrError::TaskFailed(
                                status.err_msg.unwrap_or_else(|| "Unknown error".to_string()),
                            ));
                        }
                        other => {
                            tracing::debug!(
                                task_id = %task_id,
                                state = %other,
                                progress = status.progress.unwrap_or(0.0),
                                extracted_pages = ?status.extract_progress.and_then(|p| p.extracted_pages),
                                total_pages = ?total_pages,
                                "MinerU task in progress"
                            );
                        }
                    }
                }
                Err(e) if e.disposition() == Disposition::Retryable => {
                    tracing::warn!(task_id = %task_id, error = %e, "MinerU poll failed, polling again");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// GET a result file; non-2xx is an error
    async fn download(&self, url: &str) -> Result<reqwest::Response, OcrError> {
        let response = self.client.get(url).send().await.map_err(OcrError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                status,
                body: truncate_body(&body),
            });
        }

        Ok(response)
    }

    async fn download_markdown(&self, md_url: &str) -> Result<String, OcrError> {
        self.download(md_url).await?.text().await.map_err(OcrError::transport)
    }

    async fn download_bundle(&self, zip_url: &str) -> Result<ResultBundle, OcrError> {
        let bytes = self
            .download(zip_url)
            .await?
            .bytes()
            .await
            .map_err(OcrError::transport)?;

        tokio::task::spawn_blocking(move || unpack_bundle(&bytes))
            .await
            .map_err(|e| OcrError::InvalidResponse(format!("Archive extraction aborted: {}", e)))?
    }
}

/// Pull the first markdown file and every image out of a result archive
fn unpack_bundle(bytes: &[u8]) -> Result<ResultBundle, OcrError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        OcrError::InvalidResponse(format!("Failed to open MinerU archive: {}", e))
    })?;

    let mut bundle = ResultBundle::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            OcrError::InvalidResponse(format!("Failed to read MinerU archive entry: {}", e))
        })?;
        if entry.is_dir() {
            continue;
        }

        let Some(file_name) = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        let extension = Path::new(&file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).map_err(|e| {
                OcrError::InvalidResponse(format!("Failed to read '{}': {}", file_name, e))
            })?;
            bundle.images.push((file_name, content));
        } else if extension == "md" && bundle.markdown.is_none() {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(|e| {
                OcrError::InvalidResponse(format!("Failed to read '{}': {}", file_name, e))
            })?;
            bundle.markdown = Some(text);
        }
    }

    Ok(bundle)
}

/// Write `<name>_mineru.md` and `imgs/*` under `<dir>/<name>/`
async fn save_results(
    dir: &Path,
    name: &str,
    markdown: &str,
    images: &[(String, Vec<u8>)],
) -> std::io::Result<Vec<PathBuf>> {
    let output_dir = dir.join(name);
    tokio::fs::create_dir_all(&output_dir).await?;

    let markdown_path = output_dir.join(format!("{}_mineru.md", name));
    tokio::fs::write(&markdown_path, markdown).await?;
    let mut saved = vec![markdown_path];

    if !images.is_empty() {
        let images_dir = output_dir.join("imgs");
        tokio::fs::create_dir_all(&images_dir).await?;
        for (file_name, content) in images {
            let path = images_dir.join(file_name);
            tokio::fs::write(&path, content).await?;
            saved.push(path);
        }
    }

    Ok(saved)
}

/// File-system safe name for a source: `paper.pdf` and `.../pdf/1706.03762` keep their stem
fn result_name(source_ref: &str) -> String {
    let tail = source_ref
        .trim_end_matches('/')
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let stem = tail.strip_suffix(".pdf").unwrap_or(tail);

    let name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.trim_matches(|c: char| c == '.' || c == '_').is_empty() {
        "document".to_string()
    } else {
        name
    }
}

/// Envelope failures mentioning credentials will not fix themselves
fn envelope_disposition(msg: &str) -> Disposition {
    let msg = msg.to_lowercase();
    let auth = ["token", "auth", "api key", "apikey", "credential", "permission"];
    if auth.iter().any(|needle| msg.contains(needle)) {
        Disposition::Fatal
    } else {
        Disposition::Retryable
    }
}

fn is_remote_url(source_ref: &str) -> bool {
    source_ref.starts_with("http://") || source_ref.starts_with("https://")
}

#[async_trait]
impl OcrBackend for MineruBackend {
    fn kind(&self) -> OcrBackendKind {
        OcrBackendKind::Mineru
    }

    async fn is_available(&self) -> bool {
        if self.settings.api_key.is_empty() {
            return false;
        }
        self.client
            .get(&self.settings.base_url)
            .send()
            .await
            .map(|r| !r.status().is_server_error())
            .unwrap_or(false)
    }

    async fn extract(&self, source_ref: &str) -> Result<OcrOutput, OcrError> {
        if self.settings.api_key.is_empty() {
            return Err(OcrError::NotConfigured("MINERU_API_KEY not set".to_string()));
        }

        let file_url = if is_remote_url(source_ref) {
            source_ref.to_string()
        } else {
            self.upload_file(Path::new(source_ref)).await?
        };

        let task_id = self.create_task(&file_url).await?;
        let finished = self.poll_task(&task_id).await?;

        let bundle = match finished.full_zip_url.as_deref() {
            Some(zip_url) => match self.download_bundle(zip_url).await {
                Ok(bundle) => bundle,
                Err(e) if finished.md_url.is_some() => {
                    tracing::warn!(task_id = %task_id, error = %e, "MinerU archive unavailable, keeping markdown only");
                    ResultBundle::default()
                }
                Err(e) => return Err(e),
            },
            None => ResultBundle::default(),
        };

        let mut markdown = match (finished.md_url.as_deref(), bundle.markdown) {
            (Some(md_url), _) => self.download_markdown(md_url).await?,
            (None, Some(markdown)) => markdown,
            (None, None) => {
                return Err(OcrError::InvalidResponse(
                    "MinerU archive contains no markdown".to_string(),
                ))
            }
        };

        if markdown.trim().is_empty() {
            markdown = format!(
                "# OCR Analysis for {}\n\nMinerU processing completed but no text content was extracted.",
                source_ref
            );
        }

        let is_oversized = finished
            .total_pages
            .map_or(false, |pages| pages > self.settings.max_pages);
        if is_oversized {
            tracing::warn!(
                task_id = %task_id,
                total_pages = ?finished.total_pages,
                max_pages = self.settings.max_pages,
                "Document exceeds the page limit"
            );
        }

        let saved_files = match &self.settings.results_dir {
            Some(dir) => {
                let name = result_name(source_ref);
                match save_results(dir, &name, &markdown, &bundle.images).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "Failed to save MinerU results");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let mut output = OcrOutput::new(markdown, OcrBackendKind::Mineru, Some(task_id));
        output.report = OcrReport {
            total_pages: finished.total_pages,
            is_oversized,
            images_count: bundle.images.len(),
            saved_files,
        };

        tracing::info!(
            task_id = ?output.task_id,
            chars = output.char_count(),
            images = output.report.images_count,
            "MinerU extraction complete"
        );

        Ok(output)
    }
}
