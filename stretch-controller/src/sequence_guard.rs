use crate::{
    actuator_driver::{ActuatorDriver, DriverError},
    error::StepError,
    interrupt::Interrupt,
    motion_sequencer::MotionSequencer,
    motion_step::Sequence,
    pose_resolver::{PoseResolver, ScriptError},
    robot_config::RobotConfig,
};
use futures::FutureExt;
use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

/// Result of one run, produced exactly once after teardown
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// index of the failing step and why it failed
    FailedAt(usize, StepError),
    Interrupted,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    /// 0 on completion, 1 on a step failure, 2 when interrupted
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::FailedAt(..) => 1,
            RunOutcome::Interrupted => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "Completed"),
            RunOutcome::FailedAt(index, cause) => {
                write!(f, "FailedAt(step {}, {}: {})", index, cause.kind(), cause)
            }
            RunOutcome::Interrupted => write!(f, "Interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    Stow,
    Stop,
    Release,
}

/// Teardown problem kept as a diagnostic next to the primary outcome
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownFailure {
    pub action: TeardownAction,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub teardown_failures: Vec<TeardownFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardSettings {
    pub settle_timeout: Duration,
    /// bound on each of stow, stop and release
    pub teardown_timeout: Duration,
}

impl GuardSettings {
    pub fn from_config(config: &RobotConfig) -> GuardSettings {
        GuardSettings {
            settle_timeout: config.settle_timeout(),
            teardown_timeout: config.teardown_timeout(),
        }
    }
}

/// Owns the actuator for one run and tears it down exactly once.
pub struct SequenceGuard {
    settings: GuardSettings,
    interrupt: Interrupt,
}

impl SequenceGuard {
    pub fn new(settings: GuardSettings, interrupt: Interrupt) -> SequenceGuard {
        SequenceGuard {
            settings,
            interrupt,
        }
    }

    /// Connects, resolves the sequence, executes it and tears down.
    ///
    /// Only a failed connection is returned as an error, in that case there
    /// is no actuator to stow. Every other exit path, including panics inside
    /// the driver, produces a [`RunReport`] after stow, stop and release ran.
    /// If this future is dropped mid-run the teardown is spawned instead.
    pub async fn run<D, B, F, Fut>(
        &self,
        build_sequence: B,
        connect: F,
    ) -> Result<RunReport, DriverError>
    where
        D: ActuatorDriver + 'static,
        B: FnOnce(&PoseResolver<'_>) -> Result<Sequence, ScriptError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D, DriverError>>,
    {
        let actuator = connect().await?;
        tracing::info!("Actuator acquired");
        let mut lease = ActuatorLease::new(actuator, self.settings.teardown_timeout);
        let progress = AtomicUsize::new(0);

        let outcome = {
            let actuator = lease.actuator_mut();
            let progress = &progress;
            let run = async move {
                let built = build_sequence(&PoseResolver::new(&*actuator).with_progress(progress));
                let sequence = match built {
                    Ok(sequence) => sequence,
                    Err(error) => {
                        tracing::error!("{}, nothing was commanded", error);
                        return RunOutcome::FailedAt(error.index, error.cause);
                    }
                };
                MotionSequencer::new(self.settings.settle_timeout, &self.interrupt, progress)
                    .execute(&sequence, actuator)
                    .await
            };
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let index = progress.load(Ordering::SeqCst);
                    let message = panic_message(panic.as_ref());
                    tracing::error!("Step {} panicked: {}", index, message);
                    RunOutcome::FailedAt(index, StepError::Panicked(message))
                }
            }
        };

        let teardown_failures = lease.teardown().await;
        match &outcome {
            RunOutcome::Completed => tracing::info!("Run finished: {}", outcome),
            _ => tracing::warn!("Run finished: {}", outcome),
        }
        Ok(RunReport {
            outcome,
            teardown_failures,
        })
    }
}

/// Exclusive hold on the actuator connection.
///
/// `teardown` consumes the lease; a lease dropped without it schedules the
/// same teardown on the current runtime.
struct ActuatorLease<D: ActuatorDriver + 'static> {
    actuator: Option<D>,
    teardown_timeout: Duration,
}

impl<D: ActuatorDriver + 'static> ActuatorLease<D> {
    fn new(actuator: D, teardown_timeout: Duration) -> ActuatorLease<D> {
        ActuatorLease {
            actuator: Some(actuator),
            teardown_timeout,
        }
    }

    fn actuator_mut(&mut self) -> &mut D {
        match self.actuator.as_mut() {
            Some(actuator) => actuator,
            None => unreachable!("lease is only emptied by teardown or drop"),
        }
    }

    async fn teardown(mut self) -> Vec<TeardownFailure> {
        match self.actuator.take() {
            Some(mut actuator) => teardown_actuator(&mut actuator, self.teardown_timeout).await,
            None => vec![],
        }
    }
}

impl<D: ActuatorDriver + 'static> Drop for ActuatorLease<D> {
    fn drop(&mut self) {
        if let Some(mut actuator) = self.actuator.take() {
            let teardown_timeout = self.teardown_timeout;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    tracing::error!("Run abandoned before teardown, stowing in background");
                    handle.spawn(async move {
                        teardown_actuator(&mut actuator, teardown_timeout).await;
                    });
                }
                Err(_) => {
                    tracing::error!("Run abandoned outside of a runtime, actuator not stowed");
                }
            }
        }
    }
}

/// Stow, stop, release. Every action is attempted even if an earlier one failed.
async fn teardown_actuator<D>(actuator: &mut D, timeout: Duration) -> Vec<TeardownFailure>
where
    D: ActuatorDriver + ?Sized,
{
    tracing::info!("Tearing down: stow, stop, release");
    let mut failures = vec![];
    if let Err(failure) = bounded(TeardownAction::Stow, timeout, actuator.stow()).await {
        failures.push(failure);
    }
    if let Err(failure) = bounded(TeardownAction::Stop, timeout, actuator.stop()).await {
        failures.push(failure);
    }
    if let Err(failure) = bounded(TeardownAction::Release, timeout, actuator.release()).await {
        failures.push(failure);
    }
    failures
}

async fn bounded<Fut>(
    action: TeardownAction,
    timeout: Duration,
    command: Fut,
) -> Result<(), TeardownFailure>
where
    Fut: Future<Output = Result<(), DriverError>>,
{
    let reason = match tokio::time::timeout(timeout, AssertUnwindSafe(command).catch_unwind()).await
    {
        Ok(Ok(Ok(()))) => return Ok(()),
        Ok(Ok(Err(error))) => error.to_string(),
        Ok(Err(panic)) => format!("panicked: {}", panic_message(panic.as_ref())),
        Err(_) => format!("timed out after {:?}", timeout),
    };
    tracing::warn!("Teardown {:?} failed: {}", action, reason);
    Err(TeardownFailure { action, reason })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
