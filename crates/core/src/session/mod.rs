/// Decides whether queued animation belongs to an abandoned utterance.
///
/// `queue_tail_session` is the session of the most recently enqueued event,
/// or `None` when the queue is empty. A different incoming session means the
/// recognizer started over and everything still queued must be discarded.
pub fn should_flush(queue_tail_session: Option<u64>, incoming_session: u64) -> bool {
    matches!(queue_tail_session, Some(tail) if tail != incoming_session)
}

/// Keeps track of the session the scheduler is currently animating.
#[derive(Debug, Default, Clone)]
pub struct SessionTracker {
    current: Option<u64>,
    flushes: u64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an incoming packet and returns whether the queue must be
    /// flushed before its events are appended.
    pub fn observe(&mut self, queue_tail_session: Option<u64>, incoming_session: u64) -> bool {
        let flush = should_flush(queue_tail_session, incoming_session);
        if flush {
            self.flushes += 1;
        }
        self.current = Some(incoming_session);
        flush
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// How many session cutovers have happened so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}
