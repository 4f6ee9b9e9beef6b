use crate::motion_step::JointTarget;
use crate::robot_config::{JointConfig, RobotConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};

/// Synthetic joint driving the base forward/backward by a distance in meters
pub const TRANSLATE_JOINT: &str = "translate_mobile_base";
/// Synthetic joint rotating the base in place by an angle in radians
pub const ROTATE_JOINT: &str = "rotate_mobile_base";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("unknown joint {0:?}")]
    UnknownJoint(String),
    #[error("command rejected: {0}")]
    CommandRejected(String),
    #[error("actuator connection is closed")]
    Disconnected,
}

type Result<T> = std::result::Result<T, DriverError>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LimitRange {
    pub lower: f64,
    pub upper: f64,
}

impl LimitRange {
    pub fn new(lower: f64, upper: f64) -> LimitRange {
        LimitRange { lower, upper }
    }

    /// Inclusive, NaN is never contained
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    pub fn is_ordered(&self) -> bool {
        self.lower <= self.upper
    }

    pub fn contains_range(&self, other: &LimitRange) -> bool {
        self.contains(other.lower) && self.contains(other.upper)
    }
}

/// Limits reported by the actuator for one joint
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorLimits {
    pub joint_id: String,
    pub soft: LimitRange,
    pub hard: LimitRange,
}

#[async_trait]
pub trait ActuatorDriver: Send + Sync {
    fn get_limits(&self, joint_id: &str) -> Result<ActuatorLimits>;
    /// Last reported position of a joint
    fn position(&self, joint_id: &str) -> Result<f64>;
    fn stow_pose(&self) -> Vec<JointTarget>;
    /// Buffers a target, nothing moves until `flush`
    async fn stage(&mut self, joint_id: &str, value: f64) -> Result<()>;
    /// Commits every staged target as one hardware command
    async fn flush(&mut self) -> Result<()>;
    /// Returns `false` if the timeout elapsed before the last command settled
    async fn wait_settled(&mut self, timeout: Duration) -> Result<bool>;
    /// Blocks until the safe stow pose is reached
    async fn stow(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn release(&mut self) -> Result<()>;

    async fn translate(&mut self, distance_m: f64) -> Result<()> {
        self.stage(TRANSLATE_JOINT, distance_m).await
    }

    async fn rotate(&mut self, radians: f64) -> Result<()> {
        self.stage(ROTATE_JOINT, radians).await
    }
}

/// Every call made against a [`SimulatedActuator`], in call order
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    GetLimits(String),
    Stage(JointTarget),
    Flush(Vec<JointTarget>),
    WaitSettled,
    Stow,
    Stop,
    Release,
}

#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
}

impl CallLog {
    fn record(&self, call: ActuatorCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ActuatorCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Targets of every flush, in order
    pub fn flushes(&self) -> Vec<Vec<JointTarget>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ActuatorCall::Flush(targets) => Some(targets.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Faults the simulator injects, flush indices count from zero
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPlan {
    pub reject_flush: Option<usize>,
    /// the command is accepted but never reports settled
    pub stall_flush: Option<usize>,
    pub fail_stow: bool,
    pub fail_stop: bool,
}

struct SimulatedJoint {
    config: JointConfig,
    position: f64,
}

/// In-process stand-in for the robot body.
///
/// Motion takes `distance / speed` of tokio time per flush, the slowest joint
/// decides when the command settles.
pub struct SimulatedActuator {
    joints: BTreeMap<String, SimulatedJoint>,
    stow_pose: Vec<JointTarget>,
    staged: Vec<JointTarget>,
    settle_at: Option<Instant>,
    stalled: bool,
    flush_count: usize,
    connected: bool,
    faults: FaultPlan,
    log: CallLog,
}

impl SimulatedActuator {
    pub fn new(config: &RobotConfig) -> SimulatedActuator {
        let mut joints: BTreeMap<String, SimulatedJoint> = config
            .joints
            .iter()
            .map(|(joint_id, joint_config)| {
                let joint = SimulatedJoint {
                    config: joint_config.clone(),
                    position: 0.0,
                };
                (joint_id.clone(), joint)
            })
            .collect();
        for target in &config.stow_pose {
            if let Some(joint) = joints.get_mut(&target.joint_id) {
                joint.position = target.value;
            }
        }
        SimulatedActuator {
            joints,
            stow_pose: config.stow_pose.clone(),
            staged: vec![],
            settle_at: None,
            stalled: false,
            flush_count: 0,
            connected: true,
            faults: FaultPlan::default(),
            log: CallLog::default(),
        }
    }

    pub async fn connect(config: &RobotConfig, faults: FaultPlan) -> Result<SimulatedActuator> {
        tracing::info!("Connecting to simulated actuator with {} joints", config.joints.len());
        Ok(SimulatedActuator::new(config).with_faults(faults))
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> SimulatedActuator {
        self.faults = faults;
        self
    }

    /// Shared handle, stays readable after the actuator is released
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::Disconnected)
        }
    }

    fn joint(&self, joint_id: &str) -> Result<&SimulatedJoint> {
        self.joints
            .get(joint_id)
            .ok_or_else(|| DriverError::UnknownJoint(joint_id.to_owned()))
    }

    /// Moves joints to their targets and returns how long the motion takes
    fn apply(&mut self, targets: &[JointTarget]) -> Result<Duration> {
        for target in targets {
            let joint = self.joint(&target.joint_id)?;
            if !joint.config.hard.contains(target.value) {
                return Err(DriverError::CommandRejected(format!(
                    "{} is beyond the hard limits of {}",
                    target.value, target.joint_id
                )));
            }
        }
        let mut longest = Duration::ZERO;
        for target in targets {
            if let Some(joint) = self.joints.get_mut(&target.joint_id) {
                let distance = if joint.config.relative {
                    joint.position += target.value;
                    target.value.abs()
                } else {
                    let distance = (target.value - joint.position).abs();
                    joint.position = target.value;
                    distance
                };
                longest = longest.max(Duration::from_secs_f64(distance / joint.config.speed));
            }
        }
        Ok(longest)
    }
}

#[async_trait]
impl ActuatorDriver for SimulatedActuator {
    fn get_limits(&self, joint_id: &str) -> Result<ActuatorLimits> {
        self.log.record(ActuatorCall::GetLimits(joint_id.to_owned()));
        let joint = self.joint(joint_id)?;
        Ok(ActuatorLimits {
            joint_id: joint_id.to_owned(),
            soft: joint.config.soft,
            hard: joint.config.hard,
        })
    }

    fn position(&self, joint_id: &str) -> Result<f64> {
        Ok(self.joint(joint_id)?.position)
    }

    fn stow_pose(&self) -> Vec<JointTarget> {
        self.stow_pose.clone()
    }

    async fn stage(&mut self, joint_id: &str, value: f64) -> Result<()> {
        self.log
            .record(ActuatorCall::Stage(JointTarget::new(joint_id, value)));
        self.ensure_connected()?;
        self.joint(joint_id)?;
        self.staged.retain(|target| target.joint_id != joint_id);
        self.staged.push(JointTarget::new(joint_id, value));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        self.log.record(ActuatorCall::Flush(staged.clone()));
        self.ensure_connected()?;
        let index = self.flush_count;
        self.flush_count += 1;
        if self.faults.reject_flush == Some(index) {
            return Err(DriverError::CommandRejected(format!(
                "injected fault on flush {}",
                index
            )));
        }
        let duration = self.apply(&staged)?;
        self.settle_at = Some(Instant::now() + duration);
        self.stalled = self.faults.stall_flush == Some(index);
        Ok(())
    }

    async fn wait_settled(&mut self, timeout: Duration) -> Result<bool> {
        self.log.record(ActuatorCall::WaitSettled);
        self.ensure_connected()?;
        if self.stalled {
            sleep(timeout).await;
            return Ok(false);
        }
        let settle_at = match self.settle_at {
            Some(settle_at) => settle_at,
            None => return Ok(true),
        };
        if settle_at.saturating_duration_since(Instant::now()) > timeout {
            sleep(timeout).await;
            return Ok(false);
        }
        sleep_until(settle_at).await;
        self.settle_at = None;
        Ok(true)
    }

    async fn stow(&mut self) -> Result<()> {
        self.log.record(ActuatorCall::Stow);
        self.ensure_connected()?;
        if self.faults.fail_stow {
            return Err(DriverError::CommandRejected(
                "injected stow failure".to_owned(),
            ));
        }
        self.staged.clear();
        self.stalled = false;
        let stow_pose = self.stow_pose.clone();
        let duration = self.apply(&stow_pose)?;
        sleep(duration).await;
        self.settle_at = None;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.log.record(ActuatorCall::Stop);
        self.ensure_connected()?;
        if self.faults.fail_stop {
            return Err(DriverError::CommandRejected(
                "injected stop failure".to_owned(),
            ));
        }
        self.staged.clear();
        self.settle_at = None;
        self.stalled = false;
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.log.record(ActuatorCall::Release);
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simulator() -> SimulatedActuator {
        SimulatedActuator::new(&RobotConfig::included())
    }

    #[test]
    fn limit_range_is_inclusive() {
        let range = LimitRange::new(-1.0, 1.0);
        assert!(range.contains(1.0));
        assert!(range.contains(-1.0));
        assert!(!range.contains(1.0001));
        assert!(!range.contains(f64::NAN));
        assert_relative_eq!(range.clamp(3.0), 1.0);
    }

    #[test]
    fn starts_in_stow_pose() {
        let actuator = simulator();
        assert_relative_eq!(actuator.position("joint_wrist_yaw").unwrap(), 3.4);
        assert_relative_eq!(actuator.position("joint_lift").unwrap(), 0.2);
    }

    #[test]
    fn unknown_joint_limits() {
        let actuator = simulator();
        assert_eq!(
            actuator.get_limits("joint_elbow").unwrap_err(),
            DriverError::UnknownJoint("joint_elbow".to_owned())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn flush_settles_after_slowest_joint() {
        let mut actuator = simulator();
        actuator.stage("joint_arm", 0.5).await.unwrap();
        actuator.stage("joint_lift", 0.5).await.unwrap();
        actuator.flush().await.unwrap();
        let start = Instant::now();
        assert!(actuator.wait_settled(Duration::from_secs(10)).await.unwrap());
        // arm: 0.5 m at 0.25 m/s, lift: 0.3 m at 0.3 m/s
        assert_relative_eq!(start.elapsed().as_secs_f64(), 2.0, epsilon = 1e-3);
        assert_relative_eq!(actuator.position("joint_arm").unwrap(), 0.5);
        assert_eq!(actuator.call_log().flushes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_on_slow_motion() {
        let mut actuator = simulator();
        actuator.stage("joint_arm", 0.5).await.unwrap();
        actuator.flush().await.unwrap();
        assert!(!actuator
            .wait_settled(Duration::from_millis(500))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn base_joints_accumulate() {
        let mut actuator = simulator();
        actuator.translate(0.5).await.unwrap();
        actuator.flush().await.unwrap();
        actuator.translate(0.25).await.unwrap();
        actuator.flush().await.unwrap();
        actuator.rotate(1.0).await.unwrap();
        actuator.flush().await.unwrap();
        assert_relative_eq!(actuator.position(TRANSLATE_JOINT).unwrap(), 0.75);
        assert_relative_eq!(actuator.position(ROTATE_JOINT).unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn beyond_hard_limit_is_rejected() {
        let mut actuator = simulator();
        actuator.stage("joint_lift", 1.5).await.unwrap();
        assert!(matches!(
            actuator.flush().await,
            Err(DriverError::CommandRejected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn injected_faults() {
        let faults = FaultPlan {
            reject_flush: Some(1),
            stall_flush: Some(0),
            ..Default::default()
        };
        let mut actuator = simulator().with_faults(faults);
        actuator.stage("joint_head_pan", 0.1).await.unwrap();
        actuator.flush().await.unwrap();
        assert!(!actuator.wait_settled(Duration::from_secs(1)).await.unwrap());
        actuator.stage("joint_head_pan", 0.2).await.unwrap();
        assert!(matches!(
            actuator.flush().await,
            Err(DriverError::CommandRejected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn released_actuator_refuses_commands() {
        let mut actuator = simulator();
        actuator.release().await.unwrap();
        assert_eq!(
            actuator.stage("joint_arm", 0.1).await.unwrap_err(),
            DriverError::Disconnected
        );
        assert_eq!(actuator.flush().await.unwrap_err(), DriverError::Disconnected);
    }
}
