pub mod blobs;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod governor;
pub mod humanize;
pub mod observability;
pub mod orchestrator;
pub mod tier;
pub mod validator;

pub use codec::{Codec, CodecError};
pub use config::Config;
pub use document::{PageRange, SourceDocument};
pub use error::{Result, SplitError};
pub use orchestrator::{Session, StartReport, Task, TaskId, TaskListener, TaskStatus};
