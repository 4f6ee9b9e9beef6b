use crate::{
    actuator_driver::{ActuatorDriver, DriverError, ROTATE_JOINT, TRANSLATE_JOINT},
    error::StepError,
    interrupt::Interrupt,
    motion_step::{JointTarget, MotionStep, Sequence},
    sequence_guard::RunOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

type Result<T> = std::result::Result<T, StepError>;

/// Runs motion steps strictly one after another.
///
/// Each step is staged, flushed as one command and waited on before the
/// next step stages anything. Only reachable through the sequence guard so a
/// run can never skip teardown.
pub(crate) struct MotionSequencer<'a> {
    settle_timeout: Duration,
    interrupt: &'a Interrupt,
    /// index of the step currently executing
    progress: &'a AtomicUsize,
}

impl<'a> MotionSequencer<'a> {
    pub(crate) fn new(
        settle_timeout: Duration,
        interrupt: &'a Interrupt,
        progress: &'a AtomicUsize,
    ) -> MotionSequencer<'a> {
        MotionSequencer {
            settle_timeout,
            interrupt,
            progress,
        }
    }

    pub(crate) async fn execute<D>(&self, sequence: &Sequence, actuator: &mut D) -> RunOutcome
    where
        D: ActuatorDriver + ?Sized,
    {
        tracing::info!("Executing sequence of {} steps", sequence.len());
        for (index, step) in sequence.steps().iter().enumerate() {
            self.progress.store(index, Ordering::SeqCst);
            match self.execute_step(index, step, actuator).await {
                Ok(()) => (),
                Err(StepError::Interrupted) => {
                    tracing::warn!("Interrupted during step {} ({})", index, step.label());
                    return RunOutcome::Interrupted;
                }
                Err(cause) => {
                    tracing::error!(
                        "Step {} ({}) failed with {}: {}",
                        index,
                        step.label(),
                        cause.kind(),
                        cause
                    );
                    return RunOutcome::FailedAt(index, cause);
                }
            }
        }
        RunOutcome::Completed
    }

    async fn execute_step<D>(&self, index: usize, step: &MotionStep, actuator: &mut D) -> Result<()>
    where
        D: ActuatorDriver + ?Sized,
    {
        if self.interrupt.is_triggered() {
            return Err(StepError::Interrupted);
        }
        tracing::info!("Step {}: {}", index, step);

        for target in step.targets() {
            tracing::debug!("Staging {}", target);
            stage_target(actuator, target).await?;
        }
        actuator.flush().await?;

        let settled = tokio::select! {
            biased;
            _ = self.interrupt.triggered() => return Err(StepError::Interrupted),
            settled = actuator.wait_settled(self.settle_timeout) => settled?,
        };
        if !settled {
            return Err(StepError::SettleTimeout(self.settle_timeout));
        }

        let settle_delay = step.settle_delay();
        if !settle_delay.is_zero() {
            tracing::debug!("Letting hardware stabilize for {:?}", settle_delay);
            tokio::select! {
                biased;
                _ = self.interrupt.triggered() => return Err(StepError::Interrupted),
                _ = sleep(settle_delay) => (),
            }
        }

        for target in step.targets() {
            if let Ok(position) = actuator.position(&target.joint_id) {
                tracing::debug!(
                    "{} reports {:.4} (commanded {:.4})",
                    target.joint_id,
                    position,
                    target.value
                );
            }
        }
        tracing::info!("Step {} ({}) done", index, step.label());
        Ok(())
    }
}

/// Base joints go through the navigation primitives, everything else is staged directly
async fn stage_target<D>(
    actuator: &mut D,
    target: &JointTarget,
) -> std::result::Result<(), DriverError>
where
    D: ActuatorDriver + ?Sized,
{
    match target.joint_id.as_str() {
        TRANSLATE_JOINT => actuator.translate(target.value).await,
        ROTATE_JOINT => actuator.rotate(target.value).await,
        joint_id => actuator.stage(joint_id, target.value).await,
    }
}
