use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blobs::BlobStore;
use crate::codec::{Codec, CodecError};
use crate::config::{Config, ConfigError};
use crate::document::{PageRange, SourceDocument};
use crate::error::{Result, SplitError};
use crate::governor::{Governor, GovernorSnapshot};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::tier::TierPolicy;
use crate::validator::{self, RangeError, RangeValidator};

use super::listener::{NoopListener, TaskListener};
use super::task::{Task, TaskId, TaskStatus, TaskUpdate};

/// Outcome of one call to [`Session::start`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    /// New tasks, in selection order
    pub created: Vec<TaskId>,
    pub completed: usize,
    pub failed: usize,
    /// Results that arrived after the session moved on and were thrown away
    pub discarded: usize,
}

impl StartReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
    }
}

/// What a cleanup released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub tasks_cleared: usize,
    pub blobs_released: usize,
}

/// One editing session over one source document at a time.
///
/// The session is the single owner of the task list, the blob store and the
/// governor. Handles are cheap to clone and share that state. When the last
/// handle goes away every outstanding blob is released.
///
/// ## Flow
///
/// 1. [`Session::load_document`] installs a source (and tears down the
///    previous one)
/// 2. [`Session::add_selection`] / [`Session::set_selections`] propose ranges
/// 3. [`Session::start`] admits the ranges not yet covered, creates a task per
///    range and drives each through the codec
/// 4. [`Session::close`] releases everything
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    codec: Arc<dyn Codec>,
    listener: Arc<dyn TaskListener>,
    validator: RangeValidator,
    tier: TierPolicy,
    metrics: Metrics,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    document: Option<SourceDocument>,
    documents_loaded: usize,
    selections: Vec<PageRange>,
    tasks: Vec<Task>,
    governor: Governor,
    blobs: BlobStore,
    // Bumped by every cleanup; results from an older generation are dropped
    generation: u64,
    closed: bool,
}

struct Batch {
    generation: u64,
    source: Bytes,
    tasks: Vec<(TaskId, PageRange)>,
}

#[bon::bon]
impl Session {
    #[builder]
    pub fn new(
        codec: Arc<dyn Codec>,
        #[builder(default)] config: Config,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let state = State {
            document: None,
            documents_loaded: 0,
            selections: Vec::new(),
            tasks: Vec::new(),
            governor: Governor::from_config(&config),
            blobs: BlobStore::new(),
            generation: 0,
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                codec,
                listener: listener.unwrap_or_else(|| Arc::new(NoopListener)),
                validator: RangeValidator::from_limits(&config.limits),
                tier: TierPolicy::new(config.tier.clone()),
                metrics: Metrics::new(),
                state: Mutex::new(state),
            }),
        })
    }
}

impl Session {
    /// Install a new source document. Everything tied to the previous one is
    /// released first.
    pub fn load_document(&self, document: SourceDocument) -> Result<TeardownReport> {
        let report = {
            let mut state = self.inner.state.lock();
            state.ensure_open()?;

            if document.page_count() == 0 {
                return Err(RangeError::EmptyDocument.into());
            }
            self.inner
                .tier
                .check_document(document.size(), state.documents_loaded)
                .map_err(|err| self.reject(err.into()))?;

            let report = state.teardown();
            info!(
                document_id = %document.id(),
                name = document.name(),
                pages = document.page_count(),
                size = %document.size(),
                "Document loaded"
            );
            state.document = Some(document);
            state.documents_loaded += 1;
            report
        };

        self.inner.metrics.blobs_released(report.blobs_released);
        Ok(report)
    }

    /// Append one range to the selection list.
    pub fn add_selection(&self, range: PageRange) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ensure_open()?;
        let page_count = state.document()?.page_count();

        validator::check_bounds(range, page_count)?;
        self.inner.validator.validate(state.selections.len(), 1)?;

        state.selections.push(range);
        debug!(%range, selections = state.selections.len(), "Selection added");
        Ok(())
    }

    /// Replace the whole selection list. Nothing changes if any range is bad.
    pub fn set_selections(&self, ranges: impl IntoIterator<Item = PageRange>) -> Result<()> {
        let ranges: Vec<PageRange> = ranges.into_iter().collect();

        let mut state = self.inner.state.lock();
        state.ensure_open()?;
        let page_count = state.document()?.page_count();

        for range in &ranges {
            validator::check_bounds(*range, page_count)?;
        }
        self.inner.validator.validate(0, ranges.len())?;

        state.selections = ranges;
        Ok(())
    }

    /// Process every selected range not already covered by a live task.
    ///
    /// Resolves once each new task reached a terminal state. Gate rejections
    /// return before any task exists. Codec failures never surface here;
    /// they end up on the failed task.
    pub async fn start(&self) -> Result<StartReport> {
        let Some(batch) = self.admit()? else {
            return Ok(StartReport::default());
        };

        let created: Vec<TaskId> = batch.tasks.iter().map(|(id, _)| *id).collect();

        // Taken before the first listener call: released on every exit path,
        // including a panicking listener and cancellation of this future.
        let slice = SliceGuard {
            inner: Arc::clone(&self.inner),
            generation: batch.generation,
            task_ids: created.clone(),
        };

        for task_id in &created {
            self.inner
                .listener
                .on_task_update(*task_id, &TaskUpdate::pending());
        }

        let mut report = self.dispatch(batch).await;
        drop(slice);

        report.created = created;
        info!(
            created = report.created.len(),
            completed = report.completed,
            failed = report.failed,
            discarded = report.discarded,
            "Batch finished"
        );
        Ok(report)
    }

    /// Clear tasks, selections, blobs and governor counters but keep the
    /// current document.
    pub fn reset(&self) -> Result<TeardownReport> {
        let report = {
            let mut state = self.inner.state.lock();
            state.ensure_open()?;
            state.teardown()
        };
        self.inner.metrics.blobs_released(report.blobs_released);
        Ok(report)
    }

    /// End the session. Idempotent; later calls release nothing.
    pub fn close(&self) -> TeardownReport {
        let report = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return TeardownReport::default();
            }
            let report = state.teardown();
            state.document = None;
            state.closed = true;
            report
        };

        self.inner.metrics.blobs_released(report.blobs_released);
        info!(
            tasks_cleared = report.tasks_cleared,
            blobs_released = report.blobs_released,
            "Session closed"
        );
        report
    }

    /// Bytes produced by a completed task.
    pub fn output(&self, task_id: TaskId) -> Result<Bytes> {
        let state = self.inner.state.lock();
        let task = state
            .task(task_id)
            .ok_or_else(|| SplitError::TaskNotFound(task_id.to_string()))?;
        let key = task
            .blob_key
            .ok_or_else(|| SplitError::NoOutput(task_id.to_string()))?;
        Ok(state.blobs.get(&key)?)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().tasks.clone()
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.inner.state.lock().task(task_id).cloned()
    }

    pub fn selections(&self) -> Vec<PageRange> {
        self.inner.state.lock().selections.clone()
    }

    pub fn document_id(&self) -> Option<Uuid> {
        self.inner.state.lock().document.as_ref().map(SourceDocument::id)
    }

    pub fn blob_count(&self) -> usize {
        self.inner.state.lock().blobs.size()
    }

    pub fn live_bytes(&self) -> u64 {
        self.inner.state.lock().blobs.live_bytes()
    }

    pub fn governor(&self) -> GovernorSnapshot {
        self.inner.state.lock().governor.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Run the admission pipeline and register the new tasks. `None` when
    /// there is nothing new to do.
    fn admit(&self) -> Result<Option<Batch>> {
        let mut state = self.inner.state.lock();
        state.ensure_open()?;
        let document = state.document()?.clone();

        let delta = state.delta();
        if delta.is_empty() {
            debug!("No new ranges to process");
            return Ok(None);
        }

        let accepted = state.governor.accepted_ranges();
        self.inner
            .validator
            .validate(accepted, delta.len())
            .map_err(|err| self.reject(err.into()))?;
        self.inner
            .tier
            .check_ranges(accepted.saturating_add(delta.len()))
            .map_err(|err| self.reject(err.into()))?;

        let now = Instant::now();
        let estimate = state
            .governor
            .admit(now, document.size(), delta.len())
            .map_err(|err| self.reject(err.into()))?;
        state.governor.record_slice(now, delta.len());

        let tasks: Vec<Task> = delta
            .into_iter()
            .map(|range| Task::pending(&document, range))
            .collect();
        let batch = Batch {
            generation: state.generation,
            source: document.payload().clone(),
            tasks: tasks.iter().map(|task| (task.id, task.range)).collect(),
        };

        self.inner.metrics.tasks_created(tasks.len());
        info!(
            tasks = tasks.len(),
            %estimate,
            accepted_ranges = state.governor.accepted_ranges(),
            "Batch admitted"
        );
        state.tasks.extend(tasks);

        Ok(Some(batch))
    }

    async fn dispatch(&self, batch: Batch) -> StartReport {
        let mut running = JoinSet::new();
        let mut owners = HashMap::with_capacity(batch.tasks.len());

        for (task_id, range) in batch.tasks {
            if !self.transition(batch.generation, task_id, TaskUpdate::processing()) {
                continue;
            }

            let codec = Arc::clone(&self.inner.codec);
            let source = batch.source.clone();
            let handle = running.spawn(async move { codec.extract(source, range).await });
            owners.insert(handle.id(), task_id);
        }

        let mut report = StartReport::default();
        while let Some(joined) = running.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, result),
                Err(err) => {
                    let reason = if err.is_panic() {
                        "codec panicked"
                    } else {
                        "codec call was cancelled"
                    };
                    (err.id(), Err(CodecError::Failed(reason.to_string())))
                }
            };

            let Some(task_id) = owners.remove(&id) else {
                continue;
            };

            match self.finish(batch.generation, task_id, outcome) {
                Some(TaskStatus::Completed) => report.completed += 1,
                Some(TaskStatus::Failed) => report.failed += 1,
                _ => report.discarded += 1,
            }
        }

        report
    }

    /// Apply a non-terminal transition and notify the listener.
    fn transition(&self, generation: u64, task_id: TaskId, update: TaskUpdate) -> bool {
        let applied = {
            let mut state = self.inner.state.lock();
            state.generation == generation && state.apply(task_id, &update)
        };

        if applied {
            debug!(%task_id, status = ?update.status, "Task transition");
            self.inner.listener.on_task_update(task_id, &update);
        }
        applied
    }

    /// Record a codec outcome. Output from a torn-down generation is never
    /// registered.
    fn finish(
        &self,
        generation: u64,
        task_id: TaskId,
        outcome: std::result::Result<Bytes, CodecError>,
    ) -> Option<TaskStatus> {
        let update = {
            let mut state = self.inner.state.lock();

            if state.closed || state.generation != generation {
                self.inner.metrics.late_result_dropped();
                debug!(%task_id, "Discarding result for a torn-down session");
                return None;
            }

            match state.task(task_id).map(|task| task.status) {
                Some(TaskStatus::Processing) => {}
                status => {
                    error!(%task_id, ?status, "Codec result for a task that is not processing");
                    return None;
                }
            }

            let update = match outcome {
                Ok(payload) => {
                    let size = payload.len();
                    let (handle, key) = state.blobs.put(payload);
                    self.inner.metrics.blob_registered();
                    self.inner.metrics.task_completed();
                    debug!(%task_id, %key, size, "Task completed");
                    TaskUpdate::completed(handle, key)
                }
                Err(err) => {
                    self.inner.metrics.task_failed();
                    warn!(%task_id, error = %err, "Task failed");
                    TaskUpdate::failed(err.to_string())
                }
            };

            state.apply(task_id, &update);
            update
        };

        self.inner.listener.on_task_update(task_id, &update);
        Some(update.status)
    }

    fn reject(&self, err: SplitError) -> SplitError {
        self.inner.metrics.gate_rejected();
        warn!(code = err.code(), ceiling = ?err.ceiling(), error = %err, "Start rejected");
        err
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("document", &state.document.as_ref().map(SourceDocument::id))
            .field("selections", &state.selections.len())
            .field("tasks", &state.tasks.len())
            .field("blobs", &state.blobs.size())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl State {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SplitError::SessionClosed);
        }
        Ok(())
    }

    fn document(&self) -> Result<&SourceDocument> {
        self.document.as_ref().ok_or(SplitError::NoDocument)
    }

    fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Selected ranges without a live task, deduplicated, in selection order.
    fn delta(&self) -> Vec<PageRange> {
        let mut covered: HashSet<PageRange> = self
            .tasks
            .iter()
            .filter(|task| task.represents_range())
            .map(|task| task.range)
            .collect();

        self.selections
            .iter()
            .copied()
            .filter(|range| covered.insert(*range))
            .collect()
    }

    fn apply(&mut self, task_id: TaskId, update: &TaskUpdate) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == task_id) else {
            return false;
        };
        let from = task.status;
        let applied = task.apply(update);
        if !applied {
            error!(%task_id, ?from, to = ?update.status, "Illegal task transition ignored");
        }
        applied
    }

    /// Release every blob, forget tasks and selections, reset the governor.
    /// Never fails: missing entries are logged and skipped.
    fn teardown(&mut self) -> TeardownReport {
        let tasks = std::mem::take(&mut self.tasks);
        let mut released = 0;

        for task in &tasks {
            if let Some(handle) = &task.output_handle {
                if self.blobs.release_by_handle(handle).is_ok() {
                    released += 1;
                    continue;
                }
            }
            if let Some(key) = task.blob_key {
                if self.blobs.contains(&key) && self.blobs.release_by_key(&key).is_ok() {
                    released += 1;
                }
            }
        }

        let orphans = self.blobs.release_all();
        if orphans > 0 {
            warn!(orphans, "Released blobs not referenced by any task");
        }
        self.blobs.forget_released();

        self.governor.reset();
        self.selections.clear();
        self.generation = self.generation.wrapping_add(1);

        TeardownReport {
            tasks_cleared: tasks.len(),
            blobs_released: released + orphans,
        }
    }
}

/// Keeps the governor's busy flag for one batch; clears it on drop and fails
/// any task of the batch that never reached a terminal state.
struct SliceGuard {
    inner: Arc<Inner>,
    generation: u64,
    task_ids: Vec<TaskId>,
}

impl Drop for SliceGuard {
    fn drop(&mut self) {
        let abandoned = {
            let mut state = self.inner.state.lock();
            if state.generation != self.generation {
                // Teardown already reset the governor.
                return;
            }
            state.governor.complete_slice();

            let mut abandoned = Vec::new();
            for task_id in &self.task_ids {
                let unfinished = state
                    .task(*task_id)
                    .is_some_and(|task| !task.status.is_terminal());
                if unfinished {
                    let update = TaskUpdate::failed("dispatch abandoned before completion");
                    if state.apply(*task_id, &update) {
                        abandoned.push((*task_id, update));
                    }
                }
            }
            abandoned
        };

        // A second listener panic during unwinding would abort the process.
        let notify = !std::thread::panicking();
        for (task_id, update) in abandoned {
            self.inner.metrics.task_failed();
            warn!(%task_id, "Task abandoned");
            if notify {
                self.inner.listener.on_task_update(task_id, &update);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.closed {
            let report = state.teardown();
            state.closed = true;
            debug!(
                blobs_released = report.blobs_released,
                "Session dropped without close"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, RangeLimits};
    use crate::governor::RateLimitError;
    use crate::humanize::ByteSize;
    use crate::orchestrator::listener::{ChannelListener, TaskEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Semaphore, mpsc};

    #[derive(Default)]
    struct ScriptedCodec {
        fail: Vec<PageRange>,
        panic_on: Vec<PageRange>,
        gate: Option<Arc<Semaphore>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Codec for ScriptedCodec {
        async fn extract(
            &self,
            source: Bytes,
            range: PageRange,
        ) -> std::result::Result<Bytes, CodecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.panic_on.contains(&range) {
                panic!("scripted panic for {range}");
            }
            if self.fail.contains(&range) {
                return Err(CodecError::Failed(format!("scripted failure for {range}")));
            }
            Ok(Bytes::from(format!("{}:{range}", source.len())))
        }
    }

    fn range(start: u32, end: u32) -> PageRange {
        PageRange::new(start, end).unwrap()
    }

    fn document() -> SourceDocument {
        SourceDocument::new("report.pdf", vec![7u8; 64], 10)
    }

    fn session_with(codec: ScriptedCodec, config: Config) -> Session {
        Session::builder()
            .codec(Arc::new(codec))
            .config(config)
            .build()
            .unwrap()
    }

    fn session(codec: ScriptedCodec) -> Session {
        session_with(codec, Config::default())
    }

    async fn next_past_rate_gate() {
        tokio::time::advance(Duration::from_millis(1_001)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_each_selection_once() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 3)).unwrap();
        session.add_selection(range(4, 4)).unwrap();

        let report = session.start().await.unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 0);

        let tasks = session.tasks();
        assert_eq!(tasks[0].derived_file_name, "report_pages_1-3.pdf");
        assert_eq!(tasks[1].derived_file_name, "report_pages_4-4.pdf");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert_eq!(session.blob_count(), 2);
        assert_eq!(session.output(tasks[0].id).unwrap(), Bytes::from("64:1-3"));
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_without_new_selection_is_a_noop() {
        let codec = Arc::new(ScriptedCodec::default());
        let session = Session::builder()
            .codec(codec.clone())
            .build()
            .unwrap();
        session.load_document(document()).unwrap();
        session.add_selection(range(2, 5)).unwrap();
        session.start().await.unwrap();

        // No time passes: an empty delta never touches the rate gate.
        let again = session.start().await.unwrap();

        assert!(again.is_noop());
        assert_eq!(session.tasks().len(), 1);
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.governor().recent_starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_selections_collapse_into_one_task() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session
            .set_selections([range(1, 2), range(3, 3), range(1, 2)])
            .unwrap();

        let report = session.start().await.unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(session.governor().accepted_ranges, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_starts_only_process_the_delta() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 1)).unwrap();
        session.start().await.unwrap();

        session.add_selection(range(2, 3)).unwrap();
        next_past_rate_gate().await;
        let report = session.start().await.unwrap();

        assert_eq!(report.created.len(), 1);
        let ranges: Vec<_> = session.tasks().iter().map(|t| t.range).collect();
        assert_eq!(ranges, vec![range(1, 1), range(2, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_gate_rejects_quick_second_start() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 1)).unwrap();
        session.start().await.unwrap();

        session.add_selection(range(2, 2)).unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        let err = session.start().await.unwrap_err();

        assert!(matches!(
            err,
            SplitError::RateLimit(RateLimitError::TooSoon { .. })
        ));
        assert!(err.is_transient());
        assert_eq!(session.tasks().len(), 1, "rejection creates no task");
        assert_eq!(session.metrics().gate_rejections, 1);

        next_past_rate_gate().await;
        assert_eq!(session.start().await.unwrap().created.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_gate_rejects_before_any_task_exists() {
        let config = Config {
            memory: MemoryConfig {
                ceiling: ByteSize(200),
                amplification: 2,
            },
            ..Config::default()
        };
        let session = session_with(ScriptedCodec::default(), config);
        session.load_document(document()).unwrap();
        session.set_selections([range(1, 1), range(2, 2)]).unwrap();

        let err = session.start().await.unwrap_err();

        assert_eq!(err.code(), "MEMORY_BUDGET");
        assert!(session.tasks().is_empty());
        assert!(!session.governor().busy);
        assert_eq!(session.governor().recent_starts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_ceiling_counts_accepted_ranges() {
        let config = Config {
            limits: RangeLimits { max_ranges: 2 },
            ..Config::default()
        };
        let session = session_with(ScriptedCodec::default(), config);
        session.load_document(document()).unwrap();
        session.set_selections([range(1, 1), range(2, 2)]).unwrap();
        session.start().await.unwrap();

        let err = session.add_selection(range(3, 3)).unwrap_err();
        assert_eq!(err.code(), "RANGE_LIMIT");

        // A fresh selection list still counts against what was admitted.
        session.set_selections([range(3, 3)]).unwrap();
        next_past_rate_gate().await;
        let err = session.start().await.unwrap_err();
        assert_eq!(err.ceiling(), Some(crate::error::Ceiling::Count));
        assert_eq!(session.tasks().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_codec_failure_is_scoped_to_its_task() {
        let codec = ScriptedCodec {
            fail: vec![range(2, 2)],
            ..Default::default()
        };
        let session = session(codec);
        session.load_document(document()).unwrap();
        session
            .set_selections([range(1, 1), range(2, 2), range(3, 3)])
            .unwrap();

        let report = session.start().await.unwrap();

        assert_eq!((report.completed, report.failed), (2, 1));
        let failed = session
            .tasks()
            .into_iter()
            .find(|t| t.status == TaskStatus::Failed)
            .unwrap();
        assert_eq!(failed.range, range(2, 2));
        assert!(failed.error.unwrap().contains("scripted failure"));
        assert!(failed.output_handle.is_none());
        assert!(matches!(
            session.output(failed.id),
            Err(SplitError::NoOutput(_))
        ));
        assert_eq!(session.blob_count(), 2);
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_range_is_retried_as_a_new_task() {
        let codec = ScriptedCodec {
            fail: vec![range(2, 2)],
            ..Default::default()
        };
        let session = session(codec);
        session.load_document(document()).unwrap();
        session.add_selection(range(2, 2)).unwrap();
        let first = session.start().await.unwrap();

        next_past_rate_gate().await;
        let second = session.start().await.unwrap();

        assert_eq!(second.created.len(), 1);
        assert_ne!(first.created, second.created);
        assert_eq!(session.tasks().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_codec_panic_fails_the_task_and_frees_the_gate() {
        let codec = ScriptedCodec {
            panic_on: vec![range(1, 2)],
            ..Default::default()
        };
        let session = session(codec);
        session.load_document(document()).unwrap();
        session.set_selections([range(1, 2), range(3, 4)]).unwrap();

        let report = session.start().await.unwrap();

        assert_eq!((report.completed, report.failed), (1, 1));
        let task = session.task(report.created[0]).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("extraction failed: codec panicked"));
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_document_releases_everything_from_the_old_one() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.set_selections([range(1, 1), range(2, 2)]).unwrap();
        session.start().await.unwrap();
        assert_eq!(session.blob_count(), 2);

        let report = session
            .load_document(SourceDocument::new("next.pdf", vec![1u8; 8], 3))
            .unwrap();

        assert_eq!(report.tasks_cleared, 2);
        assert_eq!(report.blobs_released, 2);
        assert_eq!(session.blob_count(), 0);
        assert_eq!(session.live_bytes(), 0);
        assert!(session.tasks().is_empty());
        assert!(session.selections().is_empty());
        assert_eq!(session.governor().recent_starts, 0);

        // Governor was reset, so no need to wait out the interval.
        session.add_selection(range(1, 3)).unwrap();
        assert_eq!(session.start().await.unwrap().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_new_document_is_discarded() {
        let gate = Arc::new(Semaphore::new(0));
        let codec = ScriptedCodec {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let (listener, mut events) = ChannelListener::new();
        let session = Session::builder()
            .codec(Arc::new(codec))
            .listener(Arc::new(listener))
            .build()
            .unwrap();
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 5)).unwrap();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        });
        wait_for(&mut events, TaskStatus::Processing).await;

        session
            .load_document(SourceDocument::new("other.pdf", vec![0u8; 4], 2))
            .unwrap();
        gate.add_permits(1);
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.completed, 0);
        assert_eq!(session.blob_count(), 0);
        assert!(session.tasks().is_empty());
        assert_eq!(session.metrics().late_results_dropped, 1);
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_rejects_concurrent_start() {
        let gate = Arc::new(Semaphore::new(0));
        let codec = ScriptedCodec {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let (listener, mut events) = ChannelListener::new();
        let session = Session::builder()
            .codec(Arc::new(codec))
            .listener(Arc::new(listener))
            .build()
            .unwrap();
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 1)).unwrap();

        let running = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        });
        wait_for(&mut events, TaskStatus::Processing).await;

        session.add_selection(range(2, 2)).unwrap();
        next_past_rate_gate().await;
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SplitError::RateLimit(RateLimitError::Busy)));

        gate.add_permits(1);
        running.await.unwrap().unwrap();
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_every_transition_in_order() {
        let (listener, mut events) = ChannelListener::new();
        let session = Session::builder()
            .codec(Arc::new(ScriptedCodec::default()))
            .listener(Arc::new(listener))
            .build()
            .unwrap();
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 2)).unwrap();

        session.start().await.unwrap();

        let mut statuses = Vec::new();
        while let Ok(TaskEvent { update, .. }) = events.try_recv() {
            statuses.push(update.status);
        }
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskStatus::Completed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_wedge_the_gate() {
        let tripped = Arc::new(AtomicBool::new(false));
        let listener = {
            let tripped = tripped.clone();
            move |_: TaskId, update: &TaskUpdate| {
                if update.status == TaskStatus::Pending && !tripped.swap(true, Ordering::SeqCst) {
                    panic!("listener rejected pending update");
                }
            }
        };
        let session = Session::builder()
            .codec(Arc::new(ScriptedCodec::default()))
            .listener(Arc::new(listener))
            .build()
            .unwrap();
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 1)).unwrap();

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        })
        .await;
        assert!(first.unwrap_err().is_panic());

        assert!(!session.governor().busy);
        let abandoned = session.tasks();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].status, TaskStatus::Failed);
        assert_eq!(session.metrics().tasks_failed, 1);

        session.add_selection(range(2, 2)).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        let report = session.start().await.unwrap();

        // The abandoned range is re-admitted alongside the new one.
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.completed, 2);
        assert!(!session.governor().busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_forgets_blob_tombstones() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.set_selections([range(1, 1), range(2, 2)]).unwrap();
        session.start().await.unwrap();

        session
            .load_document(SourceDocument::new("next.pdf", vec![1u8; 8], 3))
            .unwrap();
        assert_eq!(session.inner.state.lock().blobs.tombstones(), 0);

        session.add_selection(range(1, 2)).unwrap();
        session.start().await.unwrap();
        session.reset().unwrap();
        assert_eq!(session.inner.state.lock().blobs.tombstones(), 0);
        assert_eq!(session.blob_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_keeps_the_document() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        let document_id = session.document_id();
        session.add_selection(range(1, 4)).unwrap();
        session.start().await.unwrap();

        let report = session.reset().unwrap();

        assert_eq!(report.tasks_cleared, 1);
        assert_eq!(report.blobs_released, 1);
        assert_eq!(session.document_id(), document_id);
        assert_eq!(session.governor().accepted_ranges, 0);

        session.add_selection(range(1, 4)).unwrap();
        assert_eq!(session.start().await.unwrap().created.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_blocks_further_use() {
        let session = session(ScriptedCodec::default());
        session.load_document(document()).unwrap();
        session.add_selection(range(1, 1)).unwrap();
        session.start().await.unwrap();

        let first = session.close();
        let second = session.close();

        assert_eq!(first.blobs_released, 1);
        assert_eq!(second, TeardownReport::default());
        assert!(session.is_closed());
        assert!(session.document_id().is_none());
        assert!(matches!(
            session.add_selection(range(1, 1)),
            Err(SplitError::SessionClosed)
        ));
        assert!(matches!(session.start().await, Err(SplitError::SessionClosed)));
        assert_eq!(session.metrics().blobs_released, 1);
    }

    #[tokio::test]
    async fn test_selections_need_a_document_and_valid_bounds() {
        let session = session(ScriptedCodec::default());
        assert!(matches!(
            session.add_selection(range(1, 1)),
            Err(SplitError::NoDocument)
        ));
        assert!(matches!(session.start().await, Err(SplitError::NoDocument)));

        session.load_document(document()).unwrap();
        let err = session.add_selection(range(9, 11)).unwrap_err();
        assert_eq!(err.code(), "INVALID_RANGE");

        session.add_selection(range(1, 1)).unwrap();
        let err = session
            .set_selections([range(2, 2), range(5, 12)])
            .unwrap_err();
        assert!(matches!(err, SplitError::Validation(RangeError::OutOfBounds { .. })));
        assert_eq!(session.selections(), vec![range(1, 1)], "unchanged on error");
    }

    #[test]
    fn test_empty_documents_are_refused() {
        let session = session(ScriptedCodec::default());
        let err = session
            .load_document(SourceDocument::new("blank.pdf", Vec::<u8>::new(), 0))
            .unwrap_err();
        assert!(matches!(err, SplitError::Validation(RangeError::EmptyDocument)));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = Config::default();
        config.memory.amplification = 1;

        let result = Session::builder()
            .codec(Arc::new(ScriptedCodec::default()))
            .config(config)
            .build();

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    async fn wait_for(events: &mut mpsc::UnboundedReceiver<TaskEvent>, status: TaskStatus) {
        while let Some(event) = events.recv().await {
            if event.update.status == status {
                return;
            }
        }
        panic!("listener channel closed before {status:?}");
    }
}
