use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::{
    mapping::MouthTarget,
    render::VisemeSink,
    scheduler::VisemeEvent,
    timeline::Clock,
    LipSyncError, Result,
};

/// One call into the sink as seen by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activation {
    /// Clock time of the call, when the recorder was given a clock.
    pub at_ms: Option<f64>,
    /// Event that was active when the targets were applied.
    pub event_id: Option<u64>,
    pub phoneme: Option<char>,
    pub targets: MouthTarget,
}

#[derive(Debug, Default)]
struct Recording {
    activations: Vec<Activation>,
    started: Vec<VisemeEvent>,
    current: Option<(u64, char)>,
}

/// Sink that keeps every activation in memory. Clones share the same
/// recording, so one handle can be inspected while the scheduler owns
/// another.
#[derive(Clone, Default)]
pub struct RecordingSink {
    shared: Arc<Mutex<Recording>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps every activation with the time read from `clock`.
    pub fn with_clock(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::default(),
            clock: Some(Arc::new(clock)),
        }
    }

    pub fn activations(&self) -> Result<Vec<Activation>> {
        Ok(self.lock()?.activations.clone())
    }

    /// Events in the order they became active.
    pub fn started(&self) -> Result<Vec<VisemeEvent>> {
        Ok(self.lock()?.started.clone())
    }

    /// Ids of every event that reached the sink.
    pub fn event_ids(&self) -> Result<Vec<u64>> {
        Ok(self.lock()?.started.iter().map(|event| event.id).collect())
    }

    /// Final (non-blended) phoneme sequence, in firing order.
    pub fn phonemes(&self) -> Result<String> {
        Ok(self.lock()?.started.iter().map(|event| event.phoneme).collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rec| rec.activations.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        let mut rec = self.lock()?;
        rec.activations.clear();
        rec.started.clear();
        rec.current = None;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Recording>> {
        self.shared
            .lock()
            .map_err(|_| LipSyncError::msg("recording sink has been poisoned"))
    }
}

impl VisemeSink for RecordingSink {
    fn apply_mouth_targets(&mut self, targets: &MouthTarget) -> Result<()> {
        let at_ms = self.clock.as_ref().map(|clock| clock.now_ms());
        let mut rec = self.lock()?;
        let (event_id, phoneme) = match rec.current {
            Some((id, phoneme)) => (Some(id), Some(phoneme)),
            None => (None, None),
        };
        rec.activations.push(Activation {
            at_ms,
            event_id,
            phoneme,
            targets: targets.clone(),
        });
        Ok(())
    }

    fn viseme_started(&mut self, event: &VisemeEvent) {
        if let Ok(mut rec) = self.lock() {
            rec.current = Some((event.id, event.phoneme));
            rec.started.push(event.clone());
        }
    }
}

impl std::fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSink")
            .field("activations", &self.len())
            .finish()
    }
}
