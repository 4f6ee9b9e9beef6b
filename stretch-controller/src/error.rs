use crate::actuator_driver::DriverError;
use std::time::Duration;
use thiserror::Error;

/// Reason a single motion step could not be resolved or executed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("joint {0:?} is not recognized by the actuator")]
    UnknownJoint(String),
    #[error("target {value} for joint {joint_id:?} is outside soft limits [{lower}, {upper}]")]
    OutOfRange {
        joint_id: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("invalid motion step: {0}")]
    InvalidStep(String),
    #[error("hardware rejected command: {0}")]
    CommandRejected(String),
    #[error("motion did not settle within {0:?}")]
    SettleTimeout(Duration),
    #[error("run was interrupted")]
    Interrupted,
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Short stable name of the error kind, used in logs and run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::UnknownJoint(_) => "UnknownJointError",
            StepError::OutOfRange { .. } => "OutOfRangeError",
            StepError::InvalidStep(_) => "InvalidStepError",
            StepError::CommandRejected(_) => "CommandRejectedError",
            StepError::SettleTimeout(_) => "SettleTimeoutError",
            StepError::Interrupted => "InterruptedError",
            StepError::Panicked(_) => "PanicError",
        }
    }
}

impl From<DriverError> for StepError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::UnknownJoint(joint_id) => StepError::UnknownJoint(joint_id),
            DriverError::CommandRejected(reason) => StepError::CommandRejected(reason),
            DriverError::Disconnected => {
                StepError::CommandRejected("actuator disconnected".to_owned())
            }
        }
    }
}
