//! Result polling: block until every file reaches a terminal state.
//!
//! A plain sleep-based loop. The remote response is authoritative on every
//! iteration — nothing is cached across queries, and the poller never
//! infers a more advanced state locally than what the service reports.
//!
//! ## Return policy
//!
//! The loop returns only when **no file remains pending or processing**:
//! `done` and `failed` both count as terminal, so a batch with one failed
//! file keeps polling until its siblings finish too. Returning at the
//! first failure would discard results the service was about to deliver.
//! If the deadline elapses with work still in flight, the whole batch
//! fails with [`Scan2MdError::PollTimeout`] — nothing is fetched.

use crate::api::{ConversionState, ExtractService, RemoteFileResult};
use crate::config::ConversionConfig;
use crate::error::Scan2MdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Poll the batch status until every file is terminal or the deadline
/// elapses.
pub async fn await_completion(
    service: &Arc<dyn ExtractService>,
    batch_id: &str,
    config: &ConversionConfig,
) -> Result<Vec<RemoteFileResult>, Scan2MdError> {
    let max_wait = Duration::from_secs(config.poll_max_wait_secs);
    let interval = Duration::from_secs(config.poll_interval_secs);
    let start = Instant::now();

    loop {
        let results = service.batch_status(batch_id).await?;

        if results.is_empty() {
            // The batch has not entered the queue yet.
            debug!(
                "Waiting for extraction to start... ({}s)",
                start.elapsed().as_secs()
            );
        } else {
            let states = parse_states(&results)?;
            let in_flight = states.iter().filter(|s| !s.is_terminal()).count();
            let done = states
                .iter()
                .filter(|s| **s == ConversionState::Done)
                .count();

            if in_flight == 0 {
                let failed: Vec<&str> = results
                    .iter()
                    .zip(&states)
                    .filter(|(_, s)| **s == ConversionState::Failed)
                    .map(|(r, _)| r.file_name.as_str())
                    .collect();
                if failed.is_empty() {
                    info!("All {} file(s) extracted", results.len());
                } else {
                    warn!("Extraction finished with failures: {failed:?}");
                }
                return Ok(results);
            }

            debug!(
                "Extracting: {done}/{} done ({}s)",
                states.len(),
                start.elapsed().as_secs()
            );
            if let Some(cb) = &config.progress_callback {
                cb.on_poll(done, states.len(), start.elapsed().as_secs());
            }
        }

        tokio::time::sleep(interval).await;

        if start.elapsed() >= max_wait {
            return Err(Scan2MdError::PollTimeout {
                waited_secs: max_wait.as_secs(),
            });
        }
    }
}

/// Parse every reported state, rejecting strings outside the known set.
fn parse_states(results: &[RemoteFileResult]) -> Result<Vec<ConversionState>, Scan2MdError> {
    results
        .iter()
        .map(|r| {
            ConversionState::parse(&r.state).ok_or_else(|| Scan2MdError::UnknownState {
                state: r.state.clone(),
                file_name: r.file_name.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, state: &str) -> RemoteFileResult {
        RemoteFileResult {
            file_name: name.to_string(),
            data_id: String::new(),
            state: state.to_string(),
            full_zip_url: None,
            err_msg: None,
        }
    }

    #[test]
    fn parse_states_accepts_known_set() {
        let states = parse_states(&[
            item("a", "pending"),
            item("b", "processing"),
            item("c", "done"),
            item("d", "failed"),
        ])
        .unwrap();
        assert_eq!(states.len(), 4);
    }

    #[test]
    fn parse_states_rejects_unknown_with_file_name() {
        let err = parse_states(&[item("a", "done"), item("weird.jpg", "queued")]).unwrap_err();
        match err {
            Scan2MdError::UnknownState { state, file_name } => {
                assert_eq!(state, "queued");
                assert_eq!(file_name, "weird.jpg");
            }
            other => panic!("expected UnknownState, got {other:?}"),
        }
    }
}
