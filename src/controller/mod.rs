//! Three-phase orchestration.
//!
//! The controller alone mutates the index, the prefilter and the result
//! list; pool units only compute. Phase 1 indexes a basis and matches
//! comparison sources, phase 2 matches more sources against the same index,
//! phase 3 clears keys of filtered domains and reconciles everything.

pub mod basis;
pub mod control;
pub mod events;
pub mod filter;
pub mod phase;
pub mod telemetry;


pub use self::basis::BasisTable;
pub use self::control::RunControl;
pub use self::events::{EventBus, PerformanceSnapshot, ProgressUpdate, RunSummary, SiftEvent};
pub use self::filter::{DomainFilter, FilterDecision, FilterSummary, FilteredBasis};
pub use self::phase::{Phase, PhaseState};
pub use self::telemetry::{RunMetrics, TelemetryTicker};

use parking_lot::{Mutex, RwLock};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::builder::build_index_batch;
use crate::cache::RecentCache;
use crate::classify::ClassificationTables;
use crate::config::Config;
use crate::error::{Result, SiftError};
use crate::export;
use crate::index::RecordIndex;
use crate::ingest::{BatchStream, InputSource, RowBatch};
use crate::mapping::{ColumnMapping, MappingTable};
use crate::matcher::{match_batch, DuplicateResult};
use crate::pool::WorkerPool;
use crate::prefilter::Prefilter;
use crate::record::Header;

/// Sources for one `run()` call plus the caller's default mapping.
pub struct RunRequest {
    mapping: ColumnMapping,
    basis: Option<Box<dyn InputSource>>,
    compare: Vec<Box<dyn InputSource>>,
}

impl RunRequest {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            basis: None,
            compare: Vec::new(),
        }
    }

    /// Phase 1: the source to index. Phase 2: optional replacement for the
    /// retained basis content (not re-indexed).
    pub fn basis(mut self, source: impl InputSource + 'static) -> Self {
        self.basis = Some(Box::new(source));
        self
    }

    pub fn compare(mut self, source: impl InputSource + 'static) -> Self {
        self.compare.push(Box::new(source));
        self
    }
}

struct EngineState {
    index: RecordIndex,
    prefilter: Prefilter,
    next_id: u64,
    basis: Option<BasisTable>,
    basis_mapping: ColumnMapping,
    filtered: Option<FilteredBasis>,
    domain_cache: RecentCache<String, bool>,
}

#[derive(Debug, Default)]
struct RunTally {
    files_processed: usize,
    duplicates_found: usize,
    stopped: bool,
}

/// Overall progress across the files of one run.
struct FileProgress {
    total_files: usize,
    files_done: usize,
}

impl FileProgress {
    fn fraction(&self, within_file: f64) -> f64 {
        if self.total_files == 0 {
            return 1.0;
        }
        (self.files_done as f64 + within_file.clamp(0.0, 1.0)) / self.total_files as f64
    }
}

/// Clears the active flag when a run ends, however it ends.
struct ActiveRun<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct PhaseController {
    config: Config,
    mappings: MappingTable,
    classification: Arc<ClassificationTables>,
    pool: Arc<WorkerPool>,
    state: tokio::sync::Mutex<EngineState>,
    active: AtomicBool,
    control: Arc<RunControl>,
    events: EventBus,
    phase: Mutex<PhaseState>,
    results: RwLock<Arc<Vec<DuplicateResult>>>,
}

impl PhaseController {
    pub fn new(config: Config) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config.processing.pool_size)?);
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: Config, pool: Arc<WorkerPool>) -> Self {
        let prefilter = Prefilter::new(
            config.prefilter.expected_elements,
            config.prefilter.false_positive_rate,
        );
        let state = EngineState {
            index: RecordIndex::new(),
            prefilter,
            next_id: 0,
            basis: None,
            basis_mapping: config.mapping.default.clone(),
            filtered: None,
            domain_cache: RecentCache::new(config.cache.capacity),
        };

        Self {
            mappings: MappingTable::new(config.mapping.overrides.clone()),
            classification: Arc::new(config.classification.clone()),
            events: EventBus::new(config.telemetry.event_channel_capacity),
            pool,
            state: tokio::sync::Mutex::new(state),
            active: AtomicBool::new(false),
            control: Arc::new(RunControl::new()),
            phase: Mutex::new(PhaseState::default()),
            results: RwLock::new(Arc::new(Vec::new())),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SiftEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase.lock().phase
    }

    pub fn phase_state(&self) -> PhaseState {
        self.phase.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        if self.is_running() {
            info!("⏸️ Pause requested");
        }
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Cooperative; the run ends before its next batch and keeps what it has.
    pub fn stop(&self) {
        if self.is_running() {
            info!("🛑 Stop requested");
        }
        self.control.stop();
    }

    /// Snapshot of every result accumulated so far.
    pub fn results(&self) -> Arc<Vec<DuplicateResult>> {
        Arc::clone(&self.results.read())
    }

    pub async fn index_len(&self) -> usize {
        self.state.lock().await.index.len()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.lock().await.index.contains_key(key)
    }

    pub fn pool_utilization(&self) -> f64 {
        self.pool.utilization()
    }

    pub fn shutdown(&self) {
        self.control.stop();
        self.pool.shutdown();
    }

    fn claim_run(&self) -> Result<ActiveRun<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SiftError::ConcurrencyMisuse)?;
        Ok(ActiveRun { flag: &self.active })
    }

    /// Moves to the next phase and resets the phase counters.
    pub fn advance_phase(&self) -> Result<Phase> {
        let _active = self.claim_run()?;
        let next = {
            let mut phase = self.phase.lock();
            let next = phase.phase.next().ok_or(SiftError::InvalidPhase {
                current: phase.phase,
                requested: None,
            })?;
            *phase = PhaseState::new(next);
            next
        };
        info!("➡️ Entered {}", next);
        self.events.publish(SiftEvent::PhaseChanged(next));
        Ok(next)
    }

    /// Streams a phase-1 or phase-2 run, depending on the current phase.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        let _active = self.claim_run()?;
        let phase = self.phase();
        if !phase.is_streaming() {
            return Err(SiftError::InvalidRequest(
                "phase 3 does not stream sources, use filter_domains".to_string(),
            ));
        }
        if phase == Phase::Phase1 && request.basis.is_none() {
            return Err(SiftError::InvalidRequest(
                "a phase 1 run needs a basis source".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        self.control.reset();
        let metrics = Arc::new(RunMetrics::new());
        let _ticker = TelemetryTicker::spawn(
            Duration::from_millis(self.config.telemetry.tick_interval_ms),
            Arc::clone(&metrics),
            Arc::clone(&self.control),
            Arc::clone(&self.pool),
            self.events.clone(),
        );

        info!(
            "🚀 Starting {} run with {} comparison source(s)",
            phase,
            request.compare.len()
        );

        let outcome = if phase.resets_index() {
            self.run_phase1(&mut state, request, &metrics).await
        } else {
            self.run_phase2(&mut state, request, &metrics).await
        };

        match outcome {
            Ok(tally) => {
                let summary = RunSummary {
                    phase,
                    files_processed: tally.files_processed,
                    rows_processed: metrics.rows_processed(),
                    duplicates_found: tally.duplicates_found,
                    total_results: self.results.read().len(),
                    stopped: tally.stopped,
                    elapsed_ms: self.control.active_elapsed().as_millis() as u64,
                };
                if summary.stopped {
                    warn!("🛑 {} run stopped early, partial results kept", phase);
                }
                info!(
                    "✅ {} run finished: {} files, {} rows, {} duplicates ({} total)",
                    phase,
                    summary.files_processed,
                    summary.rows_processed,
                    summary.duplicates_found,
                    summary.total_results
                );
                self.events.publish(SiftEvent::Progress(
                    metrics.progress_update(self.control.active_elapsed()),
                ));
                self.events.publish(SiftEvent::RunFinished(summary.clone()));
                Ok(summary)
            }
            Err(e) => {
                error!("❌ {} run failed: {}", phase, e);
                self.events.publish(SiftEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_phase1(
        &self,
        state: &mut EngineState,
        request: RunRequest,
        metrics: &RunMetrics,
    ) -> Result<RunTally> {
        let RunRequest {
            mapping,
            basis,
            compare,
        } = request;
        let basis = basis.ok_or_else(|| {
            SiftError::InvalidRequest("a phase 1 run needs a basis source".to_string())
        })?;

        state.index.clear();
        state.prefilter = Prefilter::new(
            self.config.prefilter.expected_elements,
            self.config.prefilter.false_positive_rate,
        );
        state.next_id = 0;
        state.filtered = None;
        state.domain_cache.clear();
        state.basis_mapping = self.mappings.mapping_for(basis.name(), &mapping);
        state.basis = Some(BasisTable::new(basis.name()));
        *self.results.write() = Arc::new(Vec::new());
        self.phase.lock().reset_counters();

        let mut progress = FileProgress {
            total_files: 1 + compare.len(),
            files_done: 0,
        };
        let mut tally = RunTally::default();

        if self
            .index_basis(state, basis.as_ref(), &mut progress, metrics)
            .await?
        {
            tally.stopped = true;
            return Ok(tally);
        }
        tally.files_processed += 1;
        self.phase.lock().files_processed += 1;

        self.match_sources(state, &compare, &mapping, &mut progress, metrics, &mut tally)
            .await?;
        Ok(tally)
    }

    async fn run_phase2(
        &self,
        state: &mut EngineState,
        request: RunRequest,
        metrics: &RunMetrics,
    ) -> Result<RunTally> {
        let RunRequest {
            mapping,
            basis,
            compare,
        } = request;

        if let Some(replacement) = basis {
            self.replace_basis(state, replacement.as_ref(), &mapping).await?;
        }

        let mut progress = FileProgress {
            total_files: compare.len(),
            files_done: 0,
        };
        let mut tally = RunTally::default();
        self.match_sources(state, &compare, &mapping, &mut progress, metrics, &mut tally)
            .await?;
        Ok(tally)
    }

    /// Waits out a pause, then reports whether a stop was requested.
    async fn halted(&self) -> bool {
        self.control.wait_while_paused().await;
        self.control.stop_requested()
    }

    fn open_stream(&self, source: &dyn InputSource) -> Result<BatchStream> {
        BatchStream::open(
            source,
            self.config.processing.batch_size,
            self.config.processing.max_pending_batches,
        )
    }

    /// Returns true when stopped before the basis was fully indexed.
    async fn index_basis(
        &self,
        state: &mut EngineState,
        source: &dyn InputSource,
        progress: &mut FileProgress,
        metrics: &RunMetrics,
    ) -> Result<bool> {
        info!("📥 Indexing basis {}", source.name());
        let mut stream = self.open_stream(source)?;
        let mapping = state.basis_mapping.clone();
        let mut skipped = 0;

        loop {
            if self.halted().await {
                return Ok(true);
            }
            let Some(next) = stream.next_batch().await else {
                break;
            };
            let batch = next?;
            let fraction = batch.consumed_fraction;
            if let Some(table) = state.basis.as_mut() {
                table.append_batch(&batch);
            }

            let job_mapping = mapping.clone();
            let built = self
                .pool
                .run(move || build_index_batch(&batch, &job_mapping))
                .await?;

            metrics.add_rows(built.rows_seen);
            skipped += built.rows_skipped;
            for record in built.records {
                state.prefilter.add(&record.key);
                state.index.insert(record);
            }
            metrics.set_progress(progress.fraction(fraction));
        }

        progress.files_done += 1;
        if skipped > 0 {
            warn!("⚠️ {}: skipped {} rows without a usable key", source.name(), skipped);
        }
        info!(
            "🗂️ Basis indexed: {} keys, {} records",
            state.index.len(),
            state.index.record_count()
        );
        if state.prefilter.is_saturated() {
            warn!(
                "⚠️ Prefilter sized for {} keys holds {}; estimated false positive rate {:.4} (target {:.4})",
                state.prefilter.expected_elements(),
                state.prefilter.len(),
                state.prefilter.estimated_false_positive_rate(),
                state.prefilter.target_false_positive_rate()
            );
        }
        Ok(false)
    }

    async fn replace_basis(
        &self,
        state: &mut EngineState,
        source: &dyn InputSource,
        mapping: &ColumnMapping,
    ) -> Result<()> {
        // Keep the indexed source name so augmentation still lines up.
        let name = state
            .basis
            .as_ref()
            .map(|b| b.source_name().to_string())
            .unwrap_or_else(|| source.name().to_string());
        if state.basis.is_none() {
            state.basis_mapping = self.mappings.mapping_for(source.name(), mapping);
        }

        let mut table = BasisTable::new(&name);
        let mut stream = self.open_stream(source)?;
        while let Some(next) = stream.next_batch().await {
            table.append_batch(&next?);
        }
        info!("📄 Basis content replaced from {} ({} rows)", source.name(), table.len());
        state.basis = Some(table);
        Ok(())
    }

    async fn match_sources(
        &self,
        state: &mut EngineState,
        sources: &[Box<dyn InputSource>],
        default_mapping: &ColumnMapping,
        progress: &mut FileProgress,
        metrics: &RunMetrics,
        tally: &mut RunTally,
    ) -> Result<()> {
        for source in sources {
            let mapping = self.mappings.mapping_for(source.name(), default_mapping);
            let (found, stopped) = self
                .match_source(state, source.as_ref(), mapping, progress, metrics)
                .await?;
            tally.duplicates_found += found;
            if stopped {
                tally.stopped = true;
                return Ok(());
            }
            tally.files_processed += 1;
            self.phase.lock().files_processed += 1;
            progress.files_done += 1;
            info!("🔍 {}: {} duplicates", source.name(), found);
        }
        Ok(())
    }

    async fn match_source(
        &self,
        state: &mut EngineState,
        source: &dyn InputSource,
        mapping: ColumnMapping,
        progress: &FileProgress,
        metrics: &RunMetrics,
    ) -> Result<(usize, bool)> {
        let mut stream = self.open_stream(source)?;
        let mut found = 0;
        let mut skipped = 0;

        loop {
            if self.halted().await {
                return Ok((found, true));
            }
            let Some(next) = stream.next_batch().await else {
                break;
            };
            let batch = next?;
            let fraction = batch.consumed_fraction;
            let first_row = batch.first_row;

            let keys = candidate_keys(&batch, &mapping, &state.prefilter);
            let subset = state.index.subset(keys.iter().map(String::as_str));
            let job_mapping = mapping.clone();
            let tables = Arc::clone(&self.classification);
            let matched = self
                .pool
                .run(move || match_batch(&batch, &subset, &job_mapping, &tables))
                .await?;

            metrics.add_rows(matched.rows_seen);
            skipped += matched.rows_skipped;
            let appended = self.append_results(state, matched.results);
            found += appended;
            metrics.add_duplicates(appended);
            metrics.set_progress(progress.fraction(fraction));
            debug!(
                "Batch at row {} of {}: {} candidate keys, {} duplicates",
                first_row,
                source.name(),
                keys.len(),
                appended
            );
        }

        if skipped > 0 {
            warn!("⚠️ {}: skipped {} rows without a usable key", source.name(), skipped);
        }
        Ok((found, false))
    }

    /// Numbers the new results, marks their basis rows and publishes the
    /// full list.
    fn append_results(&self, state: &mut EngineState, mut fresh: Vec<DuplicateResult>) -> usize {
        if fresh.is_empty() {
            return 0;
        }
        for result in fresh.iter_mut() {
            result.id = state.next_id;
            state.next_id += 1;
            if let Some(table) = state.basis.as_mut() {
                if result.matched_source == table.source_name() {
                    table.augment(
                        result.matched_row_position,
                        &result.source_id,
                        &result.classification,
                    );
                }
            }
        }

        let count = fresh.len();
        let snapshot = {
            let mut results = self.results.write();
            Arc::make_mut(&mut results).extend(fresh);
            Arc::clone(&results)
        };
        self.phase.lock().duplicates_found += count;
        self.events.publish(SiftEvent::Results(snapshot));
        count
    }

    /// Phase 3: clears the key of every basis row whose domain matches,
    /// rebuilds index and prefilter from the surviving keys and drops
    /// results whose key is gone. Always starts from the unfiltered basis.
    pub async fn filter_domains<I, S>(&self, domains: I) -> Result<FilterSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _active = self.claim_run()?;
        let current = self.phase();
        if current != Phase::Phase3 {
            return Err(SiftError::InvalidPhase {
                current,
                requested: Some(Phase::Phase3),
            });
        }
        let filter = DomainFilter::new(domains);

        let mut guard = self.state.lock().await;
        self.control.reset();
        let outcome = self.apply_filter(&mut guard, &filter).await;
        match outcome {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("❌ Domain filtering failed: {}", e);
                self.events.publish(SiftEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn apply_filter(
        &self,
        state: &mut EngineState,
        filter: &DomainFilter,
    ) -> Result<FilterSummary> {
        let basis = state.basis.as_ref().ok_or_else(|| {
            SiftError::InvalidRequest("no basis content to filter".to_string())
        })?;
        info!(
            "🧹 Filtering {} basis rows against {} domain(s)",
            basis.len(),
            filter.domains().len()
        );

        // Memoised decisions belong to one domain set.
        state.domain_cache.clear();
        let header = Header::new(basis.headers().to_vec());
        let key_column = state.basis_mapping.resolve(&header).key_idx;
        if key_column.is_none() {
            warn!("⚠️ Basis has no key column '{}'", state.basis_mapping.key_field);
        }
        let mut filtered = filter.apply(basis, key_column, &mut state.domain_cache);
        for line in &filtered.log {
            self.events.publish(SiftEvent::FilterDebug(line.clone()));
        }

        let survivors = filtered.summary.kept;
        let mut index = RecordIndex::new();
        let mut prefilter = Prefilter::new(
            self.config.prefilter.expected_elements.max(survivors),
            self.config.prefilter.false_positive_rate,
        );
        let batches: Vec<RowBatch> = filtered.table.to_batches(self.config.processing.batch_size);
        for batch in batches {
            let mapping = state.basis_mapping.clone();
            let built = self
                .pool
                .run(move || build_index_batch(&batch, &mapping))
                .await?;
            for record in built.records {
                prefilter.add(&record.key);
                index.insert(record);
            }
        }
        state.index = index;
        state.prefilter = prefilter;

        let snapshot = {
            let mut results = self.results.write();
            let before = results.len();
            let index = &state.index;
            Arc::make_mut(&mut results).retain(|r| index.contains_key(&r.key));
            filtered.summary.results_removed = before - results.len();
            Arc::clone(&results)
        };
        self.events.publish(SiftEvent::Results(snapshot));

        let summary = filtered.summary;
        info!(
            "✅ Filtering done: {} kept, {} cleared, {} without key, {} results removed",
            summary.kept, summary.cleared, summary.skipped, summary.results_removed
        );
        state.filtered = Some(filtered);
        Ok(summary)
    }

    /// Writes the result list. Returns the number of rows written.
    pub fn export_results<W: Write>(&self, writer: W, gzip: bool) -> Result<usize> {
        let results = self.results();
        export::write_results(writer, &results, gzip)?;
        Ok(results.len())
    }

    /// Writes the basis content with its augmentation columns.
    pub fn export_basis<W: Write>(&self, writer: W, gzip: bool) -> Result<usize> {
        let state = self
            .state
            .try_lock()
            .map_err(|_| SiftError::ConcurrencyMisuse)?;
        let basis = state.basis.as_ref().ok_or_else(|| {
            SiftError::ExportPrecondition("no basis has been ingested".to_string())
        })?;
        export::write_table(writer, basis.headers(), basis.rows(), gzip)?;
        Ok(basis.len())
    }

    pub fn export_filtered<W: Write>(&self, writer: W, gzip: bool) -> Result<usize> {
        let state = self
            .state
            .try_lock()
            .map_err(|_| SiftError::ConcurrencyMisuse)?;
        let filtered = state.filtered.as_ref().ok_or_else(|| {
            SiftError::ExportPrecondition("phase 3 filtering has not run".to_string())
        })?;
        export::write_table(writer, filtered.table.headers(), filtered.table.rows(), gzip)?;
        Ok(filtered.table.len())
    }

    pub fn export_filter_log<W: Write>(&self, writer: W, gzip: bool) -> Result<usize> {
        let state = self
            .state
            .try_lock()
            .map_err(|_| SiftError::ConcurrencyMisuse)?;
        let filtered = state.filtered.as_ref().ok_or_else(|| {
            SiftError::ExportPrecondition("phase 3 filtering has not run".to_string())
        })?;
        export::write_log(writer, &filtered.log, gzip)?;
        Ok(filtered.log.len())
    }
}

/// Keys of `batch` the prefilter says may be indexed.
fn candidate_keys(batch: &RowBatch, mapping: &ColumnMapping, prefilter: &Prefilter) -> Vec<String> {
    let Some(header) = batch.header() else {
        return Vec::new();
    };
    let resolved = mapping.resolve(&header);
    let mut keys: Vec<String> = batch
        .rows
        .iter()
        .filter_map(|row| resolved.key(row))
        .filter(|key| prefilter.test(key))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}
