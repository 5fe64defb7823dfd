//! Task orchestration for one editing session.
//!
//! [`Session`] turns selected page ranges into [`Task`]s, pushes each through
//! the [`crate::codec::Codec`] concurrently and keeps the produced outputs in
//! a session-owned [`crate::blobs::BlobStore`]. Observers subscribe with a
//! [`TaskListener`].

mod listener;
mod session;
mod task;

pub use listener::{ChannelListener, NoopListener, TaskEvent, TaskListener};
pub use session::{Session, StartReport, TeardownReport};
pub use task::{Task, TaskId, TaskStatus, TaskUpdate};
