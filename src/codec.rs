//! Seam to the component that actually understands the document format.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::document::PageRange;

/// Codec errors, scoped to the one task that hit them
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed source document: {0}")]
    Malformed(String),
    #[error("range {range} is outside the source's {page_count} pages")]
    OutOfBounds { range: PageRange, page_count: u32 },
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Extracts one page range from a source document into a new output.
///
/// Ranges are validated before they reach the codec; implementations should
/// still reject out-of-bounds input rather than trust the caller.
#[async_trait]
pub trait Codec: Send + Sync {
    async fn extract(&self, source: Bytes, range: PageRange) -> Result<Bytes, CodecError>;
}

