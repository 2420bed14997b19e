use thiserror::Error;

/// Terminal outcomes of a download that are not success.
///
/// Segment-level variants carry the segment index so a failure can be traced
/// to the byte range that produced it.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("size probe failed: {0}")]
    ProbeFailed(#[source] reqwest::Error),

    #[error("server did not report a usable content length")]
    SizeUnknown,

    #[error("segment {0} range request failed: {1}")]
    SegmentRequest(usize, #[source] reqwest::Error),

    #[error("segment {0}: unexpected status {1} (expected 206 Partial Content)")]
    SegmentStatus(usize, reqwest::StatusCode),

    #[error("segment {0} write failed: {1}")]
    SegmentWrite(usize, #[source] std::io::Error),

    #[error("{failed} of {total} segments failed")]
    IncompleteDownload { failed: usize, total: usize },

    #[error("download cancelled")]
    Cancelled,

    #[error("merging part files failed: {0}")]
    MergeFailed(#[source] std::io::Error),
}
