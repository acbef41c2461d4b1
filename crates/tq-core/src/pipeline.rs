//! The pipeline facade: one per process.
//!
//! Wires the store, consent gate, writer, uploader and scheduler together
//! and exposes the two inbound operations instrumentation needs: `submit`
//! and `set_consent`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use tq_common::{ConsentState, Error, Result};
use tq_config::PipelineConfig;
use tq_store::{
    AppendOutcome, BatchStore, BatchWriter, ConsentGate, EventRecord, EvictionEvent, StoreConfig,
    StoreStatus,
};

use crate::conditions::ConditionsProvider;
use crate::log_event;
use crate::logging::{event_names, generate_run_id, get_host_id, LogContext, Stage};
use crate::scheduler::{SchedulerConfig, TickReport, UploadScheduler};
use crate::uploader::{Transport, Uploader, UploaderConfig};

/// A running batching pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    writer: BatchWriter,
    scheduler: Arc<UploadScheduler>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ctx: LogContext,
}

impl Pipeline {
    /// Open the batch directory and assemble the pipeline.
    ///
    /// Does not start the scheduler; call [`spawn_scheduler`](Self::spawn_scheduler)
    /// or drive it with [`tick`](Self::tick).
    pub fn open(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        conditions: Arc<dyn ConditionsProvider>,
    ) -> Result<Self> {
        let ctx = LogContext::new(generate_run_id(), get_host_id());

        let store = BatchStore::open(StoreConfig::from_settings(&config.storage))?;
        let gate = ConsentGate::open(Arc::clone(&store), config.consent.initial)?;
        let writer = BatchWriter::new(store, Arc::clone(&gate));

        let uploader = Uploader::new(UploaderConfig::from_settings(&config.upload), transport)
            .with_consent(Arc::clone(&gate));
        let scheduler = UploadScheduler::new(
            gate,
            uploader,
            conditions,
            SchedulerConfig::from_config(&config),
            ctx.clone(),
        );

        log_event!(
            ctx,
            INFO,
            event_names::RUN_STARTED,
            Stage::Init,
            format!(
                "Pipeline ready at {}",
                writer.store().dir().display()
            )
        );

        Ok(Pipeline {
            config,
            writer,
            scheduler: Arc::new(scheduler),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            ctx,
        })
    }

    /// Open with the HTTP transport and sysfs conditions.
    #[cfg(feature = "http")]
    pub fn open_default(config: PipelineConfig) -> Result<Self> {
        Self::open(
            config,
            Arc::new(crate::uploader::UreqTransport::new()),
            Arc::new(crate::conditions::SysfsConditions::new()),
        )
    }

    /// Hand one event to the pipeline. Never fails; see [`AppendOutcome`].
    pub fn submit(&self, record: EventRecord) -> AppendOutcome {
        self.writer.append(record)
    }

    /// Change consent. Moving to `NotGranted` purges everything on disk
    /// before returning and cancels in-flight uploads.
    pub fn set_consent(&self, state: ConsentState) -> Result<Vec<EvictionEvent>> {
        Ok(self.writer.gate().set_state(state)?)
    }

    pub fn consent(&self) -> ConsentState {
        self.writer.gate().current_state()
    }

    /// Run one scheduler tick on the calling thread.
    pub fn tick(&self) -> Result<TickReport> {
        Ok(self.scheduler.tick_at(Utc::now(), &self.shutdown)?)
    }

    /// Start the scheduler on its own thread.
    pub fn spawn_scheduler(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|e| Error::Internal(format!("scheduler handle lock poisoned: {}", e)))?;
        if worker.is_some() {
            return Ok(());
        }

        self.shutdown.store(false, Ordering::Release);
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name("tq-scheduler".to_string())
            .spawn(move || scheduler.run(&shutdown))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the scheduler, cancel in-flight uploads and close the open batch.
    pub fn shutdown(&self) -> Result<()> {
        self.stop_worker();
        let closed = self.writer.store().flush()?;

        let stats = self.writer.stats();
        log_event!(
            self.ctx,
            INFO,
            event_names::RUN_FINISHED,
            Stage::Init,
            "Pipeline shut down",
            persisted = stats.persisted,
            flushed = closed.is_some()
        );
        Ok(())
    }

    pub fn status(&self) -> Result<StoreStatus> {
        Ok(self.writer.store().status(Utc::now())?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BatchStore> {
        self.writer.store()
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn scheduler(&self) -> &UploadScheduler {
        &self.scheduler
    }

    fn stop_worker(&self) {
        self.shutdown.store(true, Ordering::Release);
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(event = event_names::INTERNAL_ERROR, "scheduler thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
