use crate::actuator_driver::{ActuatorDriver, ActuatorLimits};
use crate::error::StepError;
use crate::motion_step::{JointTarget, MotionStep, Sequence};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Extremum {
    Max,
    Min,
}

/// Either a literal joint value or one end of the joint's hard range
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum JointReference {
    Literal(f64),
    Extremum(Extremum),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub joint_id: String,
    pub reference: JointReference,
    /// distance kept from the hard limit, extremum references only
    #[serde(default)]
    pub margin: f64,
}

impl TargetSpec {
    pub fn literal(joint_id: impl Into<String>, value: f64) -> TargetSpec {
        TargetSpec {
            joint_id: joint_id.into(),
            reference: JointReference::Literal(value),
            margin: 0.0,
        }
    }

    pub fn max(joint_id: impl Into<String>) -> TargetSpec {
        TargetSpec {
            joint_id: joint_id.into(),
            reference: JointReference::Extremum(Extremum::Max),
            margin: 0.0,
        }
    }

    pub fn min(joint_id: impl Into<String>) -> TargetSpec {
        TargetSpec {
            joint_id: joint_id.into(),
            reference: JointReference::Extremum(Extremum::Min),
            margin: 0.0,
        }
    }

    pub fn with_margin(mut self, margin: f64) -> TargetSpec {
        self.margin = margin;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PoseSpec {
    /// The actuator's own stow configuration
    Stow,
    Joints(Vec<TargetSpec>),
}

/// Declarative description of one motion step, before limits are applied
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub label: String,
    pub pose: PoseSpec,
    #[serde(rename = "settle_delay_ms", with = "millis", default)]
    settle_delay: Duration,
}

impl StepSpec {
    pub fn stow(label: impl Into<String>) -> StepSpec {
        StepSpec {
            label: label.into(),
            pose: PoseSpec::Stow,
            settle_delay: Duration::ZERO,
        }
    }

    pub fn joints(label: impl Into<String>, targets: Vec<TargetSpec>) -> StepSpec {
        StepSpec {
            label: label.into(),
            pose: PoseSpec::Joints(targets),
            settle_delay: Duration::ZERO,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> StepSpec {
        self.settle_delay = delay;
        self
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

/// Durations as fractional milliseconds on the wire
mod millis {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const NANOS_PER_MILLI: f64 = 1_000_000.0;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_nanos() as f64 / NANOS_PER_MILLI)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        let nanos = (millis * NANOS_PER_MILLI).round();
        if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
            return Err(D::Error::custom(format!("invalid settle delay {} ms", millis)));
        }
        Ok(Duration::from_nanos(nanos as u64))
    }
}

/// A script step that could not be turned into a [`MotionStep`]
#[derive(Error, Debug, Clone, PartialEq)]
#[error("step {index} ({label}) could not be resolved: {cause}")]
pub struct ScriptError {
    pub index: usize,
    pub label: String,
    pub cause: StepError,
}

/// Turns step specs into concrete joint targets using the limits the
/// actuator reports. Reads limits only, never commands motion.
pub struct PoseResolver<'a> {
    actuator: &'a dyn ActuatorDriver,
    /// number of `resolve` calls so far
    resolved: AtomicUsize,
    /// index of the step being resolved, shared with the sequence guard
    progress: Option<&'a AtomicUsize>,
}

impl<'a> PoseResolver<'a> {
    pub fn new(actuator: &'a dyn ActuatorDriver) -> PoseResolver<'a> {
        PoseResolver {
            actuator,
            resolved: AtomicUsize::new(0),
            progress: None,
        }
    }

    pub(crate) fn with_progress(mut self, progress: &'a AtomicUsize) -> PoseResolver<'a> {
        self.progress = Some(progress);
        self
    }

    /// Resolves one step. Successive calls are taken to be successive steps.
    pub fn resolve(&self, spec: &StepSpec) -> Result<MotionStep, StepError> {
        let index = self.resolved.fetch_add(1, Ordering::SeqCst);
        if let Some(progress) = self.progress {
            progress.store(index, Ordering::SeqCst);
        }
        let targets = match &spec.pose {
            PoseSpec::Stow => self
                .actuator
                .stow_pose()
                .iter()
                .map(|target| {
                    self.resolve_target(&TargetSpec::literal(&target.joint_id, target.value))
                })
                .collect::<Result<Vec<_>, _>>()?,
            PoseSpec::Joints(targets) => targets
                .iter()
                .map(|target| self.resolve_target(target))
                .collect::<Result<Vec<_>, _>>()?,
        };
        MotionStep::new(spec.label.clone(), targets, spec.settle_delay())
    }

    /// Queries the joint's limits exactly once
    pub fn resolve_target(&self, target: &TargetSpec) -> Result<JointTarget, StepError> {
        let limits = self.actuator.get_limits(&target.joint_id)?;
        let value = match target.reference {
            JointReference::Literal(value) => value,
            JointReference::Extremum(extremum) => {
                if !target.margin.is_finite() || target.margin < 0.0 {
                    return Err(StepError::InvalidStep(format!(
                        "margin {} for joint {:?} must be finite and non-negative",
                        target.margin, target.joint_id
                    )));
                }
                let value = match extremum {
                    Extremum::Max => limits.hard.upper - target.margin,
                    Extremum::Min => limits.hard.lower + target.margin,
                };
                if !limits.hard.contains(value) {
                    return Err(StepError::InvalidStep(format!(
                        "margin {} crosses the opposite hard limit of joint {:?}",
                        target.margin, target.joint_id
                    )));
                }
                value
            }
        };
        check_soft_limits(&limits, value)?;
        Ok(JointTarget::new(target.joint_id.clone(), value))
    }

    /// Resolves every step before anything moves
    pub fn resolve_script(&self, script: &[StepSpec]) -> Result<Sequence, ScriptError> {
        script
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                self.resolve(spec).map_err(|cause| ScriptError {
                    index,
                    label: spec.label.clone(),
                    cause,
                })
            })
            .collect()
    }
}

fn check_soft_limits(limits: &ActuatorLimits, value: f64) -> Result<(), StepError> {
    if limits.soft.contains(value) {
        Ok(())
    } else {
        Err(StepError::OutOfRange {
            joint_id: limits.joint_id.clone(),
            value,
            lower: limits.soft.lower,
            upper: limits.soft.upper,
        })
    }
}
