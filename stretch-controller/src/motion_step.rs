use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Concrete target for a single joint.
///
/// Radians for rotational joints, meters or device units for linear
/// and gripper joints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointTarget {
    pub joint_id: String,
    pub value: f64,
}

impl JointTarget {
    pub fn new(joint_id: impl Into<String>, value: f64) -> JointTarget {
        JointTarget {
            joint_id: joint_id.into(),
            value,
        }
    }
}

impl fmt::Display for JointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.4}", self.joint_id, self.value)
    }
}

/// One or more joint targets commanded together as a single flush.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStep {
    label: String,
    targets: Vec<JointTarget>,
    settle_delay: Duration,
}

impl MotionStep {
    /// Fails when `targets` is empty or names the same joint twice
    pub fn new(
        label: impl Into<String>,
        targets: Vec<JointTarget>,
        settle_delay: Duration,
    ) -> Result<MotionStep, StepError> {
        let label = label.into();
        if targets.is_empty() {
            return Err(StepError::InvalidStep(format!(
                "step {:?} has no joint targets",
                label
            )));
        }
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.joint_id.as_str()) {
                return Err(StepError::InvalidStep(format!(
                    "step {:?} commands joint {:?} more than once",
                    label, target.joint_id
                )));
            }
        }
        Ok(MotionStep {
            label,
            targets,
            settle_delay,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn targets(&self) -> &[JointTarget] {
        &self.targets
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

impl fmt::Display for MotionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.label)?;
        for (i, target) in self.targets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", target)?;
        }
        write!(f, "]")
    }
}

/// Ordered, immutable list of motion steps for one run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    steps: Vec<MotionStep>,
}

impl Sequence {
    pub fn new(steps: Vec<MotionStep>) -> Sequence {
        Sequence { steps }
    }

    pub fn steps(&self) -> &[MotionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<MotionStep> for Sequence {
    fn from_iter<I: IntoIterator<Item = MotionStep>>(iter: I) -> Self {
        Sequence::new(iter.into_iter().collect())
    }
}
