//! Source documents and the page ranges carved out of them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::humanize::ByteSize;

/// Immutable payload plus what the caller already knows about it.
///
/// Cloning is cheap: the payload is reference-counted.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    id: Uuid,
    name: String,
    payload: Bytes,
    page_count: u32,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>, page_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: payload.into(),
            page_count,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> ByteSize {
        ByteSize::from(self.payload.len())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Output name for one range: `report.pdf` + 4..=5 -> `report_pages_4-5.pdf`
    pub fn derived_file_name(&self, range: PageRange) -> String {
        derived_file_name(&self.name, range)
    }
}

pub fn derived_file_name(source_name: &str, range: PageRange) -> String {
    let suffix = format!("_pages_{}-{}", range.start(), range.end());

    match source_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}{suffix}.{ext}")
        }
        _ if source_name.is_empty() => format!("document{suffix}"),
        _ => format!("{source_name}{suffix}"),
    }
}

/// 1-indexed inclusive span of pages.
///
/// Construction only enforces ordering; bounds against a concrete document
/// are checked by [`crate::validator::check_bounds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRange {
    start: u32,
    end: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseRangeError {
    #[error("expected START-END or PAGE, got '{0}'")]
    Format(String),
    #[error("invalid page number in '{0}'")]
    Number(String),
}

impl PageRange {
    /// `None` when `start` is zero or after `end`.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    pub fn single(page: u32) -> Option<Self> {
        Self::new(page, page)
    }

    /// Build without the ordering check; used where the caller has to report
    /// the bad pair back instead of dropping it.
    pub(crate) fn raw(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn page_count(&self) -> u32 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Accepts `4-7` or a single page `4`. Ordering is left to validation so the
/// caller gets a precise error.
impl FromStr for PageRange {
    type Err = ParseRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ParseRangeError::Number(s.to_string()))
        };

        match s.split_once('-') {
            Some((start, end)) => Ok(Self::raw(parse(start)?, parse(end)?)),
            None if !s.is_empty() => {
                let page = parse(s)?;
                Ok(Self::raw(page, page))
            }
            None => Err(ParseRangeError::Format(s.to_string())),
        }
    }
}
