//! Deterministic in-memory session for tests
//!
//! `MockSessionFactory` builds sessions that compute their outputs from the
//! batch contents alone, so pool and pipeline behavior can be tested
//! without a model file. The factory can inject failures, refuse reloads,
//! and record the highest number of concurrently running sessions.

use crate::batch::Batch;
use crate::error::{EngineError, Result};
use crate::session::{NativeSession, RawOutput, SessionFactory, SessionHandle};
use rinfer_common::{ModelDescriptor, OutputKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_VOCAB: usize = 32;

/// Factory for deterministic mock sessions.
pub struct MockSessionFactory {
    descriptor: Arc<ModelDescriptor>,
    hidden_size: usize,
    class_count: usize,
    run_delay: Option<Duration>,
    fail_next: Arc<AtomicUsize>,
    allow_reload: AtomicBool,
    created: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

impl MockSessionFactory {
    pub fn new(descriptor: Arc<ModelDescriptor>) -> Self {
        Self {
            descriptor,
            hidden_size: 8,
            class_count: 4,
            run_delay: None,
            fail_next: Arc::new(AtomicUsize::new(0)),
            allow_reload: AtomicBool::new(true),
            created: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_hidden_size(mut self, hidden: usize) -> Self {
        self.hidden_size = hidden;
        self
    }

    pub fn with_class_count(mut self, classes: usize) -> Self {
        self.class_count = classes;
        self
    }

    /// Make every run sleep, so overlap windows are wide enough to observe.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// The next `n` runs across all sessions fail with an engine error.
    pub fn fail_next_runs(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make `create` fail from now on, so retired sessions stay dead.
    pub fn refuse_reloads(&self) {
        self.allow_reload.store(false, Ordering::SeqCst);
    }

    /// Total sessions created, replacements included.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn vocab(&self) -> usize {
        self.descriptor.vocab_size.unwrap_or(DEFAULT_VOCAB)
    }
}

impl SessionFactory for MockSessionFactory {
    fn create(&self, id: usize) -> Result<SessionHandle> {
        if !self.allow_reload.load(Ordering::SeqCst) {
            return Err(EngineError::Config(
                "session reloads are disabled".to_string(),
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let session = MockSession {
            kind: self.descriptor.output_kind,
            vocab: self.vocab(),
            hidden: self.hidden_size,
            classes: self.class_count,
            delay: self.run_delay,
            fail_next: Arc::clone(&self.fail_next),
            in_flight: Arc::clone(&self.in_flight),
            max_concurrent: Arc::clone(&self.max_concurrent),
        };
        Ok(SessionHandle::new(
            id,
            Box::new(session),
            Arc::clone(&self.descriptor),
        ))
    }
}

struct MockSession {
    kind: OutputKind,
    vocab: usize,
    hidden: usize,
    classes: usize,
    delay: Option<Duration>,
    fail_next: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

impl MockSession {
    /// Generation logits: for every position, a sharp peak at
    /// `(token_id + 1) % vocab`. Greedy decoding therefore walks the vocab
    /// in id order, which makes whole generations predictable.
    fn generation_output(&self, batch: &Batch) -> RawOutput {
        let rows = batch.len();
        let seq = batch.padded_len;
        let mut data = vec![0.0f32; rows * seq * self.vocab];
        for b in 0..rows {
            for t in 0..seq {
                let id = batch.input_ids[[b, t]] as usize;
                let peak = (id + 1) % self.vocab;
                data[(b * seq + t) * self.vocab + peak] = 5.0;
            }
        }
        RawOutput {
            shape: vec![rows, seq, self.vocab],
            data,
        }
    }

    /// Hidden states: every position's vector is filled with its token id,
    /// so a mean pool equals the mean of the row's real ids.
    fn embedding_output(&self, batch: &Batch) -> RawOutput {
        let rows = batch.len();
        let seq = batch.padded_len;
        let mut data = vec![0.0f32; rows * seq * self.hidden];
        for b in 0..rows {
            for t in 0..seq {
                let id = batch.input_ids[[b, t]] as f32;
                let offset = (b * seq + t) * self.hidden;
                for h in 0..self.hidden {
                    data[offset + h] = id;
                }
            }
        }
        RawOutput {
            shape: vec![rows, seq, self.hidden],
            data,
        }
    }

    /// Class logits: a peak at `sum(real ids) % classes` per row.
    fn classification_output(&self, batch: &Batch) -> RawOutput {
        let rows = batch.len();
        let mut data = vec![0.0f32; rows * self.classes];
        for (b, row) in batch.rows.iter().enumerate() {
            let sum: usize = (0..row.len)
                .map(|t| batch.input_ids[[b, t]] as usize)
                .sum();
            data[b * self.classes + sum % self.classes] = 5.0;
        }
        RawOutput {
            shape: vec![rows, self.classes],
            data,
        }
    }
}

impl NativeSession for MockSession {
    fn run(&mut self, batch: &Batch) -> Result<RawOutput> {
        let inject = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(EngineError::EngineFailure("injected failure".to_string()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let output = match self.kind {
            OutputKind::Generation => self.generation_output(batch),
            OutputKind::Embedding => self.embedding_output(batch),
            OutputKind::Classification => self.classification_output(batch),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}
