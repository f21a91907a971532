//! Thinking pipeline runner
//!
//! [`ThinkingPipeline`] launches runs; each [`PipelineHandle`] owns one run,
//! publishes it on a watch channel and advances it on every tick of its
//! [`Ticker`] until the run ends or the handle cancels it.

use std::sync::Arc;
use std::time::Duration;

use chat_core::{StepId, StepUpdate, ThinkingStep};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::machine::{PipelineError, PipelineEvent, PipelineRun, RunState, StepTransition};
use crate::ticker::{IntervalTicker, TickSource, Ticker};

type TickerFactory = Arc<dyn Fn() -> Box<dyn Ticker> + Send + Sync>;

/// Launches thinking pipeline runs paced by a ticker.
#[derive(Clone)]
pub struct ThinkingPipeline {
    tickers: TickerFactory,
}

impl ThinkingPipeline {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn Ticker> + Send + Sync + 'static,
    {
        Self {
            tickers: Arc::new(factory),
        }
    }

    /// Advance on a fixed wall-clock period.
    pub fn interval(period: Duration) -> Self {
        Self::new(move || Box::new(IntervalTicker::new(period)))
    }

    /// Advance only when `source` ticks.
    pub fn manual(source: &TickSource) -> Self {
        let source = source.clone();
        Self::new(move || Box::new(source.ticker()))
    }

    /// Start a new run with `analysis` active and begin ticking.
    ///
    /// Must be called inside a tokio runtime.
    pub fn launch(&self) -> PipelineHandle {
        let run = PipelineRun::started();
        let run_id = run.id();
        let (tx, _) = watch::channel(run);
        let state = Arc::new(tx);
        let cancel = CancellationToken::new();

        let mut ticker = (self.tickers)();
        let task_state = state.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    alive = ticker.tick() => {
                        if !alive {
                            break;
                        }
                        match apply(&task_state, PipelineEvent::Advance) {
                            Ok(t) => tracing::debug!(run_id = %run_id, stage = ?t.to, "Thinking stage advanced"),
                            Err(_) => break,
                        }
                        if task_state.borrow().state().is_terminal() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!(run_id = %run_id, "Thinking pipeline launched");
        PipelineHandle {
            state,
            cancel,
            task,
        }
    }
}

impl std::fmt::Debug for ThinkingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinkingPipeline").finish_non_exhaustive()
    }
}

/// Owner of one pipeline run. Dropping the handle cancels the run and stops
/// the ticking task.
#[derive(Debug)]
pub struct PipelineHandle {
    state: Arc<watch::Sender<PipelineRun>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Observe the run. The receiver sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PipelineRun> {
        self.state.subscribe()
    }

    /// Current run snapshot.
    pub fn snapshot(&self) -> PipelineRun {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().state()
    }

    pub fn steps(&self) -> Vec<ThinkingStep> {
        self.state.borrow().steps().to_vec()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running()
    }

    /// Advance immediately, independent of the ticker.
    pub fn advance(&self) -> Result<StepTransition, PipelineError> {
        let result = apply(&self.state, PipelineEvent::Advance);
        if self.state().is_terminal() {
            self.cancel.cancel();
        }
        result
    }

    /// Complete all remaining steps and stop ticking.
    pub fn finish(&self) -> Result<StepTransition, PipelineError> {
        self.cancel.cancel();
        apply(&self.state, PipelineEvent::Finish)
    }

    /// Stop the run, leaving no active step, and stop ticking.
    pub fn cancel(&self) -> Result<StepTransition, PipelineError> {
        self.cancel.cancel();
        apply(&self.state, PipelineEvent::Cancel)
    }

    pub fn update_step(&self, step_id: StepId, update: &StepUpdate) -> Result<(), PipelineError> {
        let mut result = Ok(());
        self.state.send_if_modified(|run| match run.update_step(step_id, update) {
            Ok(_) => true,
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Wait until the ticking task has exited.
    pub async fn stopped(&mut self) {
        if self.task.is_finished() {
            return;
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "Thinking pipeline task failed");
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Observers must not be left with a run stuck on an active step.
        if !self.state().is_terminal() {
            if let Err(e) = apply(&self.state, PipelineEvent::Cancel) {
                tracing::trace!(error = %e, "Pipeline not cancelled on drop");
            }
        }
    }
}

/// Apply an event and publish the new snapshot if anything changed.
fn apply(
    state: &watch::Sender<PipelineRun>,
    event: PipelineEvent,
) -> Result<StepTransition, PipelineError> {
    let mut result = Err(PipelineError::NotStarted);
    state.send_if_modified(|run| {
        result = run.handle_event(event);
        // History grows on every accepted event, so publish those too.
        result.is_ok()
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{StepStatus, ThinkingStage};

    #[tokio::test]
    async fn launch_starts_with_analysis_active() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();

        let run = handle.snapshot();
        assert_eq!(run.state(), RunState::Running);
        assert_eq!(run.active_stage(), Some(ThinkingStage::Analysis));
    }

    #[tokio::test]
    async fn ticks_advance_the_run() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();
        let mut rx = handle.subscribe();

        source.tick();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().active_stage(), Some(ThinkingStage::Research));

        source.tick();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().active_stage(), Some(ThinkingStage::Reasoning));
        assert!(rx.borrow().is_well_ordered());
    }

    #[tokio::test]
    async fn ticker_stops_after_last_stage() {
        let source = TickSource::new();
        let mut handle = ThinkingPipeline::manual(&source).launch();
        let mut rx = handle.subscribe();

        for _ in 0..4 {
            source.tick();
            rx.changed().await.unwrap();
        }
        handle.stopped().await;

        assert_eq!(handle.state(), RunState::Completed);
        assert!(handle.steps().iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn cancel_is_synchronous_and_final() {
        let source = TickSource::new();
        let mut handle = ThinkingPipeline::manual(&source).launch();
        handle.advance().unwrap();

        handle.cancel().unwrap();
        assert_eq!(handle.state(), RunState::Cancelled);
        assert!(handle.snapshot().active_step().is_none());

        // Later ticks and calls change nothing.
        source.tick();
        handle.stopped().await;
        assert!(matches!(handle.finish(), Err(PipelineError::AlreadyFinished(_))));
        assert_eq!(handle.steps()[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_the_run() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();
        let rx = handle.subscribe();

        drop(handle);

        let run = rx.borrow().clone();
        assert_eq!(run.state(), RunState::Cancelled);
        assert!(run.active_step().is_none());
        assert!(run.is_well_ordered());
    }

    #[tokio::test]
    async fn dropping_a_finished_handle_keeps_its_outcome() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();
        let rx = handle.subscribe();

        handle.finish().unwrap();
        drop(handle);

        assert_eq!(rx.borrow().state(), RunState::Completed);
    }

    #[tokio::test]
    async fn finish_completes_everything() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();

        let t = handle.finish().unwrap();
        assert_eq!(t.state, RunState::Completed);
        assert!(handle.steps().iter().all(|s| s.is_completed()));
    }

    #[tokio::test]
    async fn update_step_publishes_snapshot() {
        let source = TickSource::new();
        let handle = ThinkingPipeline::manual(&source).launch();
        let mut rx = handle.subscribe();
        let step_id = handle.steps()[3].id;

        handle
            .update_step(
                step_id,
                &StepUpdate {
                    title: None,
                    description: Some("Writing it up".into()),
                },
            )
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().steps()[3].description, "Writing it up");
    }

    #[tokio::test(start_paused = true)]
    async fn interval_pipeline_advances_each_period() {
        let handle = ThinkingPipeline::interval(Duration::from_millis(1000)).launch();
        let mut rx = handle.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().active_stage(), Some(ThinkingStage::Research));
    }
}
