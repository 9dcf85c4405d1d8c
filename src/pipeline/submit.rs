//! Batch submission: request upload slots, then upload concurrently.
//!
//! Submission is a single API call listing every file with a `data_id`
//! that encodes its sequence index (see [`crate::api::encode_data_id`]);
//! the service answers with pre-signed upload URLs in submitted order.
//! Uploads then run through a bounded worker pool. Each upload is
//! independent: one file's failure neither cancels siblings nor aborts
//! the batch — a file that never arrives simply never appears in the
//! result set, which is how the remote service treats it too.

use crate::api::{encode_data_id, BatchSubmission, ExtractService, FileSlot, ProcessingOptions};
use crate::config::ConversionConfig;
use crate::error::Scan2MdError;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// Request one upload slot per file, in order.
///
/// Fails with [`Scan2MdError::RemoteRejected`] when the service reports a
/// non-zero code, or [`Scan2MdError::Transport`] when the HTTP layer gives
/// up after retries.
pub async fn request_upload_slots(
    service: &Arc<dyn ExtractService>,
    file_names: &[String],
    config: &ConversionConfig,
) -> Result<BatchSubmission, Scan2MdError> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let files: Vec<FileSlot> = file_names
        .iter()
        .enumerate()
        .map(|(i, name)| FileSlot {
            name: name.clone(),
            data_id: encode_data_id(i, ts),
        })
        .collect();

    let submission = service
        .request_upload_slots(&files, &ProcessingOptions::from_config(config))
        .await?;

    if submission.upload_urls.len() != file_names.len() {
        return Err(Scan2MdError::Internal(format!(
            "service returned {} upload slots for {} files",
            submission.upload_urls.len(),
            file_names.len()
        )));
    }

    Ok(submission)
}

/// Upload all files through a bounded worker pool.
///
/// Returns the count of successful uploads. The caller compares it against
/// the total to decide how loudly to warn; the pipeline proceeds either way.
pub async fn upload_all(
    service: &Arc<dyn ExtractService>,
    file_paths: &[PathBuf],
    upload_urls: &[String],
    config: &ConversionConfig,
) -> usize {
    info!(
        "Uploading {} file(s) with {} worker(s)",
        file_paths.len(),
        config.concurrency
    );

    let results: Vec<bool> = stream::iter(file_paths.iter().zip(upload_urls.iter()).map(
        |(path, url)| {
            let service = Arc::clone(service);
            let path = path.clone();
            let url = url.clone();
            let progress = config.progress_callback.clone();
            async move {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let ok = upload_one(&service, &path, &url, &name).await;
                if let Some(cb) = progress {
                    cb.on_upload_complete(&name, ok);
                }
                ok
            }
        },
    ))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    let success = results.iter().filter(|ok| **ok).count();
    info!("Uploads complete: {success}/{} succeeded", file_paths.len());
    success
}

async fn upload_one(
    service: &Arc<dyn ExtractService>,
    path: &std::path::Path,
    url: &str,
    name: &str,
) -> bool {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Cannot read {name}: {e}");
            return false;
        }
    };

    match service.upload(url, bytes).await {
        Ok(()) => {
            info!("Uploaded {name}");
            true
        }
        Err(e) => {
            error!("Upload failed for {name}: {e}");
            false
        }
    }
}
