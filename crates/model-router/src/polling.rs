//! Submit-then-poll helper for slow generation jobs
//!
//! The wait loop checks job status every [`PollConfig::interval`] and gives
//! up after [`PollConfig::max_attempts`] checks. Cancellation is cooperative:
//! the token is raced against every sleep, so a cancel is noticed within
//! one interval at worst and immediately while sleeping.

use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::{Result, RouterError};
use crate::provider::{JobState, ProviderContext, VideoProvider, VideoRequest};

/// A finished video job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJobResult {
    pub task_id: String,
    pub video_url: String,
}

/// Arguments shared by submit and every status check
pub struct VideoJob<'a> {
    pub model: &'a str,
    pub request: &'a VideoRequest,
    pub api_key: &'a str,
    pub context: &'a ProviderContext,
    pub sub_model: Option<&'a str>,
}

/// Submit a video job and wait for it to finish.
///
/// `on_progress` receives the provider's progress percentage after each
/// status check.
pub async fn poll_video_task(
    provider: &dyn VideoProvider,
    job: VideoJob<'_>,
    config: &PollConfig,
    cancel: &CancellationToken,
    on_progress: Option<&(dyn Fn(f32) + Send + Sync)>,
) -> Result<VideoJobResult> {
    if cancel.is_cancelled() {
        return Err(RouterError::Cancelled);
    }

    let submitted = provider
        .submit_task(job.model, job.request, job.api_key, job.context, job.sub_model)
        .await?;
    log::debug!(
        "Submitted video task {} on '{}' for node {}",
        submitted.task_id,
        job.model,
        job.context.node_id
    );

    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Video task {} cancelled while waiting", submitted.task_id);
                return Err(RouterError::Cancelled);
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        let status = provider
            .check_status(job.model, &submitted.task_id, job.api_key, job.context)
            .await?;

        match status.status {
            JobState::Succeeded => {
                let video_url = status.video_url.ok_or_else(|| {
                    RouterError::provider(format!(
                        "Task {} completed without a video URL",
                        submitted.task_id
                    ))
                })?;
                log::debug!("Video task {} finished after {} checks", submitted.task_id, attempt);
                return Ok(VideoJobResult {
                    task_id: submitted.task_id,
                    video_url,
                });
            }
            JobState::Failed => {
                return Err(RouterError::Provider(
                    status
                        .error
                        .unwrap_or_else(|| format!("Task {} failed", submitted.task_id)),
                ));
            }
            JobState::Queued | JobState::Running => {
                if let Some(callback) = on_progress {
                    callback(status.progress);
                }
            }
        }
    }

    log::warn!(
        "Video task {} timed out after {:?}",
        submitted.task_id,
        config.timeout()
    );
    Err(RouterError::Timeout {
        attempts: config.max_attempts,
    })
}
