use crate::{mapping::MouthTarget, scheduler::VisemeEvent, Result};

/// Rendering collaborator that turns mouth targets into mesh deformation.
///
/// Called at sub-100ms cadence, so implementations should be cheap and
/// idempotent. An `Err` is logged by the scheduler and otherwise ignored.
pub trait VisemeSink {
    fn apply_mouth_targets(&mut self, targets: &MouthTarget) -> Result<()>;

    /// Notification that `event` has become the active viseme, fired before
    /// its targets are applied.
    fn viseme_started(&mut self, _event: &VisemeEvent) {}
}

impl<S: VisemeSink + ?Sized> VisemeSink for Box<S> {
    fn apply_mouth_targets(&mut self, targets: &MouthTarget) -> Result<()> {
        (**self).apply_mouth_targets(targets)
    }

    fn viseme_started(&mut self, event: &VisemeEvent) {
        (**self).viseme_started(event)
    }
}

/// Sink that forwards every activation to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl VisemeSink for TracingSink {
    fn apply_mouth_targets(&mut self, targets: &MouthTarget) -> Result<()> {
        tracing::info!(?targets, "mouth targets");
        Ok(())
    }

    fn viseme_started(&mut self, event: &VisemeEvent) {
        tracing::debug!(
            id = event.id,
            phoneme = %event.phoneme,
            duration_ms = event.duration_ms,
            session = event.session_id,
            "viseme started"
        );
    }
}
