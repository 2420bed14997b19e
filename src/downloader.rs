use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{header, Client, StatusCode};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;

use crate::control::ControlSignal;
use crate::error::DownloadError;
use crate::progress::ProgressAggregator;
use crate::state::{plan_segments, DownloadJob, Segment, SegmentOutcome};

pub type ArcRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// After a cancel, workers get this long to notice the flag and wind down
/// before the coordinator stops waiting for them.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

pub struct Downloader {
    client: Client,
    control: Arc<ControlSignal>,
    progress: Arc<ProgressAggregator>,
    rate_limiter: Option<ArcRateLimiter>,
}

impl Downloader {
    pub fn new(
        rate_limit_bytes_per_sec: Option<u32>,
        control: Arc<ControlSignal>,
        progress: Arc<ProgressAggregator>,
    ) -> Self {
        let client = Client::builder()
            .user_agent("sgdl/0.1.0")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let rate_limiter = rate_limit_bytes_per_sec
            .and_then(NonZeroU32::new)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));

        Self {
            client,
            control,
            progress,
            rate_limiter,
        }
    }

    /// Downloads `url` to `dest` over `segment_count` concurrent range
    /// requests. This is the single entry point the caller drives; pause and
    /// cancel arrive through the shared [`ControlSignal`].
    pub async fn run(
        &self,
        url: &str,
        dest: &Path,
        segment_count: usize,
    ) -> Result<PathBuf, DownloadError> {
        let total_size = self.probe_size(url).await?;
        self.progress.set_total(total_size);

        let job = DownloadJob {
            url: url.to_string(),
            dest: dest.to_path_buf(),
            total_size,
            segment_count,
        };
        self.execute(&job).await
    }

    /// HEAD request (redirects followed) to learn the file size before any
    /// worker is spawned.
    pub async fn probe_size(&self, url: &str) -> Result<u64, DownloadError> {
        let response = self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(DownloadError::ProbeFailed)?
            .error_for_status()
            .map_err(DownloadError::ProbeFailed)?;

        // content_length() reflects the (empty) HEAD body, so read the header
        let total_size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        if total_size == 0 {
            return Err(DownloadError::SizeUnknown);
        }
        Ok(total_size)
    }

    async fn execute(&self, job: &DownloadJob) -> Result<PathBuf, DownloadError> {
        let segments = plan_segments(&job.dest, job.total_size, job.segment_count);
        sweep_stray_parts(&job.dest);

        let mut set: JoinSet<(usize, SegmentOutcome)> = JoinSet::new();
        for segment in &segments {
            let client = self.client.clone();
            let url = job.url.clone();
            let control = self.control.clone();
            let progress = self.progress.clone();
            let limiter = self.rate_limiter.clone();
            let segment = segment.clone();

            set.spawn(async move {
                let index = segment.index;
                let outcome =
                    match download_segment(client, url, segment, control, progress, limiter).await
                    {
                        Ok(()) => SegmentOutcome::Succeeded,
                        Err(DownloadError::Cancelled) => SegmentOutcome::Cancelled,
                        Err(err) => {
                            eprintln!("{}", err);
                            SegmentOutcome::Failed
                        }
                    };
                (index, outcome)
            });
        }

        // Wait for every worker, but let a cancel short-circuit the wait.
        let mut outcomes: Vec<Option<SegmentOutcome>> = vec![None; segments.len()];
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = self.control.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    // A panicked worker leaves its slot at None, counted as failed.
                    Some(Err(_)) => {}
                    None => break,
                }
            }
        }

        if cancelled || self.control.is_cancelled() {
            let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
            loop {
                match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
                    Ok(Some(Err(_))) => {}
                    Ok(None) => break,
                    Err(_) => {
                        set.abort_all();
                        break;
                    }
                }
            }
            cleanup_parts(&job.dest, &segments).await;
            return Err(DownloadError::Cancelled);
        }

        let failed = outcomes
            .iter()
            .filter(|outcome| !matches!(outcome, Some(SegmentOutcome::Succeeded)))
            .count();
        if failed > 0 {
            cleanup_parts(&job.dest, &segments).await;
            return Err(DownloadError::IncompleteDownload {
                failed,
                total: segments.len(),
            });
        }

        match merge_parts(&job.dest, &segments).await {
            Ok(()) => Ok(job.dest.clone()),
            Err(err) => {
                let _ = fs::remove_file(&job.dest).await;
                cleanup_parts(&job.dest, &segments).await;
                Err(err)
            }
        }
    }
}

/// Streams one segment's byte range into its part file.
///
/// The pause and cancel flags are checked at every chunk boundary, so
/// cancellation latency is bounded by a single chunk. Each written chunk is
/// reported to the aggregator exactly once. No retries: any request or I/O
/// error fails the segment.
async fn download_segment(
    client: Client,
    url: String,
    segment: Segment,
    control: Arc<ControlSignal>,
    progress: Arc<ProgressAggregator>,
    limiter: Option<ArcRateLimiter>,
) -> Result<(), DownloadError> {
    let index = segment.index;

    if control.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }

    let range_header = format!("bytes={}-{}", segment.start, segment.end);
    let response = client
        .get(&url)
        .header(header::RANGE, range_header)
        .send()
        .await
        .map_err(|err| DownloadError::SegmentRequest(index, err))?;

    // A 200 means the server ignored the range and is sending the whole
    // file; exact ranges are the contract, so that is a failure too.
    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::SegmentStatus(index, response.status()));
    }

    let file = File::create(&segment.part_path)
        .await
        .map_err(|err| DownloadError::SegmentWrite(index, err))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();

    while let Some(item) = stream.next().await {
        control.wait_while_paused().await;
        if control.is_cancelled() {
            // The partial part file stays; cleanup is centralized in the
            // coordinator.
            return Err(DownloadError::Cancelled);
        }

        let chunk = item.map_err(|err| DownloadError::SegmentRequest(index, err))?;
        if chunk.is_empty() {
            continue;
        }

        if let Some(limiter) = &limiter {
            if let Some(n) = NonZeroU32::new(chunk.len() as u32) {
                // A chunk bigger than the quota burst can never be admitted;
                // let it through rather than stall the worker forever.
                let _ = limiter.until_n_ready(n).await;
            }
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|err| DownloadError::SegmentWrite(index, err))?;
        progress.record_chunk(chunk.len() as u64);
    }

    writer
        .flush()
        .await
        .map_err(|err| DownloadError::SegmentWrite(index, err))?;
    Ok(())
}

/// Concatenates the part files into `dest` in ascending segment order.
///
/// Every segment must have succeeded before this is called. Each part is
/// deleted right after it is copied so a crash mid-merge leaves as few
/// stragglers as possible.
pub async fn merge_parts(dest: &Path, segments: &[Segment]) -> Result<(), DownloadError> {
    let mut output = File::create(dest).await.map_err(DownloadError::MergeFailed)?;

    for segment in segments {
        let mut part = File::open(&segment.part_path)
            .await
            .map_err(DownloadError::MergeFailed)?;
        tokio::io::copy(&mut part, &mut output)
            .await
            .map_err(DownloadError::MergeFailed)?;
        fs::remove_file(&segment.part_path)
            .await
            .map_err(DownloadError::MergeFailed)?;
    }

    output.flush().await.map_err(DownloadError::MergeFailed)?;
    Ok(())
}

/// Deletes every planned part file that exists, then sweeps for strays.
async fn cleanup_parts(dest: &Path, segments: &[Segment]) {
    for segment in segments {
        let _ = fs::remove_file(&segment.part_path).await;
    }
    sweep_stray_parts(dest);
}

/// Removes `<dest>.part*` leftovers, e.g. from an earlier run of the same
/// destination with a different segment count.
fn sweep_stray_parts(dest: &Path) {
    let Some(dest_str) = dest.to_str() else {
        return;
    };
    let pattern = format!("{}.part*", glob::Pattern::escape(dest_str));
    if let Ok(entries) = glob::glob(&pattern) {
        for path in entries.flatten() {
            let _ = std::fs::remove_file(path);
        }
    }
}
