//! Remote extraction API: wire types, the service trait, and its HTTP
//! implementation.
//!
//! The remote contract is a three-endpoint asynchronous job protocol:
//!
//! 1. `POST {base}/file-urls/batch` — request one pre-signed upload slot per
//!    file, returning a batch id and the slots in submitted order.
//! 2. `PUT` raw bytes to each slot URL (no auth; the URLs are pre-signed).
//! 3. `GET {base}/extract-results/batch/{batch_id}` — per-file state plus a
//!    result-archive URL once a file is done.
//!
//! Every application-level response is wrapped in a `{code, msg, data}`
//! envelope; `code == 0` means success and anything else is a rejection
//! that retrying cannot fix.
//!
//! [`ExtractService`] is the seam between the pipeline and the network:
//! the pipeline stages only ever talk to the trait, so tests (and callers
//! that need middleware) inject their own implementation through
//! [`crate::config::ConversionConfig::service`].

use crate::client::RetryingClient;
use crate::config::ConversionConfig;
use crate::error::{FileError, Scan2MdError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Conversion state ─────────────────────────────────────────────────────

/// Per-file processing state reported by the remote service.
///
/// A closed set: the service is the sole authority on progress, and any
/// string outside this set is rejected as
/// [`Scan2MdError::UnknownState`] rather than being treated as
/// "still pending".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionState {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ConversionState {
    /// Parse a remote state string. `None` for anything outside the set.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `done` and `failed` are terminal: the service will not transition
    /// the file any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

// ── data_id ──────────────────────────────────────────────────────────────

/// Encode a file's sequence index into its submission `data_id`.
///
/// The zero-padded index makes lexicographic order equal submission order,
/// and [`parse_data_id_index`] recovers the index from status responses —
/// the remote service echoes `data_id` verbatim but does not guarantee
/// result ordering.
pub fn encode_data_id(index: usize, unix_ts: u64) -> String {
    format!("file_{index:04}_{unix_ts}")
}

/// Recover the sequence index from a `data_id` produced by
/// [`encode_data_id`]. `None` for foreign or malformed ids.
pub fn parse_data_id_index(data_id: &str) -> Option<usize> {
    let rest = data_id.strip_prefix("file_")?;
    let digits = rest.split('_').next()?;
    // Zero-padded to at least four places; wider batches grow naturally.
    if digits.len() < 4 {
        return None;
    }
    digits.parse().ok()
}

// ── Wire types ───────────────────────────────────────────────────────────

/// One file entry in the upload-slot request.
#[derive(Debug, Clone, Serialize)]
pub struct FileSlot {
    pub name: String,
    pub data_id: String,
}

/// Processing options sent with every submission.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOptions {
    pub enable_formula: bool,
    pub enable_table: bool,
    pub layout_model: String,
    pub language: String,
}

impl ProcessingOptions {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            enable_formula: config.enable_formula,
            enable_table: config.enable_table,
            layout_model: config.layout_model.clone(),
            language: config.language.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    files: &'a [FileSlot],
    enable_formula: bool,
    enable_table: bool,
    layout_model: &'a str,
    language: &'a str,
}

/// `{code, msg, data}` envelope around every API response body.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    batch_id: String,
    file_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    extract_result: Vec<RemoteFileResult>,
}

/// The batch id and per-file upload targets returned by a submission.
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub batch_id: String,
    pub upload_urls: Vec<String>,
}

/// One file's status entry from the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFileResult {
    pub file_name: String,
    #[serde(default)]
    pub data_id: String,
    pub state: String,
    #[serde(default)]
    pub full_zip_url: Option<String>,
    #[serde(default)]
    pub err_msg: Option<String>,
}

// ── Service trait ────────────────────────────────────────────────────────

/// The remote extraction service as seen by the pipeline.
///
/// Batch-level failures surface as [`Scan2MdError`]; archive fetches
/// return [`FileError`] because a single file's download failing must not
/// abort the batch.
#[async_trait]
pub trait ExtractService: Send + Sync {
    /// Request one pre-signed upload slot per file.
    async fn request_upload_slots(
        &self,
        files: &[FileSlot],
        options: &ProcessingOptions,
    ) -> Result<BatchSubmission, Scan2MdError>;

    /// Upload one file's bytes to its pre-signed slot.
    async fn upload(&self, upload_url: &str, body: Vec<u8>) -> Result<(), Scan2MdError>;

    /// Query per-file states for a batch.
    async fn batch_status(&self, batch_id: &str) -> Result<Vec<RemoteFileResult>, Scan2MdError>;

    /// Download one file's result archive.
    async fn fetch_result_archive(&self, zip_url: &str) -> Result<Vec<u8>, FileError>;
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// Production [`ExtractService`] talking to a MinerU-compatible API over
/// the retrying client.
pub struct HttpExtractService {
    client: RetryingClient,
    base_url: String,
    api_token: String,
    zip_download_timeout: Duration,
}

impl HttpExtractService {
    pub fn new(config: &ConversionConfig) -> Result<Self, Scan2MdError> {
        if config.api_token.is_empty() {
            return Err(Scan2MdError::InvalidConfig(
                "API token not set. Pass api_token() or set MINERU_API_TOKEN.".into(),
            ));
        }
        let client = RetryingClient::new(
            Duration::from_secs(config.request_timeout_secs),
            config.retry,
        )?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            zip_download_timeout: Duration::from_secs(config.zip_download_timeout_secs),
        })
    }

    /// Decode an envelope, mapping non-200 statuses and non-zero codes to
    /// [`Scan2MdError::RemoteRejected`].
    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, Scan2MdError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Scan2MdError::RemoteRejected {
                code: status.as_u16() as i64,
                message: format!("HTTP {status} from {url}"),
            });
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Scan2MdError::Internal(format!("malformed response from {url}: {e}")))?;
        if envelope.code != 0 {
            return Err(Scan2MdError::RemoteRejected {
                code: envelope.code,
                message: envelope.msg.unwrap_or_else(|| "no message".to_string()),
            });
        }
        envelope.data.ok_or_else(|| {
            Scan2MdError::Internal(format!("response from {url} has code 0 but no data"))
        })
    }
}

#[async_trait]
impl ExtractService for HttpExtractService {
    async fn request_upload_slots(
        &self,
        files: &[FileSlot],
        options: &ProcessingOptions,
    ) -> Result<BatchSubmission, Scan2MdError> {
        let url = format!("{}/file-urls/batch", self.base_url);
        let body = SubmitRequest {
            files,
            enable_formula: options.enable_formula,
            enable_table: options.enable_table,
            layout_model: &options.layout_model,
            language: &options.language,
        };
        let response = self.client.post_json(&url, &self.api_token, &body).await?;
        let data: SubmitData = Self::decode(response, &url).await?;
        Ok(BatchSubmission {
            batch_id: data.batch_id,
            upload_urls: data.file_urls,
        })
    }

    async fn upload(&self, upload_url: &str, body: Vec<u8>) -> Result<(), Scan2MdError> {
        let response = self.client.put_bytes(upload_url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Scan2MdError::RemoteRejected {
                code: status.as_u16() as i64,
                message: format!("upload returned HTTP {status}"),
            });
        }
        Ok(())
    }

    async fn batch_status(&self, batch_id: &str) -> Result<Vec<RemoteFileResult>, Scan2MdError> {
        let url = format!("{}/extract-results/batch/{batch_id}", self.base_url);
        let response = self.client.get(&url, Some(&self.api_token)).await?;
        let data: StatusData = Self::decode(response, &url).await?;
        Ok(data.extract_result)
    }

    async fn fetch_result_archive(&self, zip_url: &str) -> Result<Vec<u8>, FileError> {
        let response = self
            .client
            .get_with_timeout(zip_url, self.zip_download_timeout)
            .await
            .map_err(|e| FileError::Transport {
                detail: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FileError::DownloadFailed {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| FileError::Transport {
            detail: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
