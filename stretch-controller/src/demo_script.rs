use crate::actuator_driver::{ROTATE_JOINT, TRANSLATE_JOINT};
use crate::pose_resolver::{StepSpec, TargetSpec};
use std::f64::consts::PI;
use std::time::Duration;

pub const ARM: &str = "joint_arm";
pub const LIFT: &str = "joint_lift";
pub const WRIST_YAW: &str = "joint_wrist_yaw";
pub const WRIST_ROLL: &str = "joint_wrist_roll";
pub const WRIST_PITCH: &str = "joint_wrist_pitch";
pub const GRIPPER: &str = "joint_gripper_finger_left";
pub const HEAD_PAN: &str = "joint_head_pan";
pub const HEAD_TILT: &str = "joint_head_tilt";

/// Gripper command in device units, positive opens
const GRIPPER_OPEN: f64 = 100.0;
const GRIPPER_CLOSED: f64 = -100.0;
/// keeps the telescoping joints off their end stops
const EXTENSION_MARGIN: f64 = 0.005;

/// Stow, extend, articulate, grip, look, stow again, then drive a closed loop.
pub fn demonstration_script() -> Vec<StepSpec> {
    let articulation = 30_f64.to_radians();
    vec![
        StepSpec::stow("stow"),
        // arm and lift move together and wobble for a while after settling
        StepSpec::joints(
            "extend arm and raise lift",
            vec![
                TargetSpec::max(ARM).with_margin(EXTENSION_MARGIN),
                TargetSpec::max(LIFT).with_margin(EXTENSION_MARGIN),
            ],
        )
        .with_settle_delay(Duration::from_secs(2)),
        StepSpec::joints(
            "wrist yaw",
            vec![TargetSpec::literal(WRIST_YAW, articulation)],
        ),
        StepSpec::joints(
            "wrist roll",
            vec![TargetSpec::literal(WRIST_ROLL, articulation)],
        ),
        StepSpec::joints(
            "wrist pitch",
            vec![TargetSpec::literal(WRIST_PITCH, articulation)],
        )
        .with_settle_delay(Duration::from_secs(1)),
        StepSpec::joints(
            "open gripper",
            vec![TargetSpec::literal(GRIPPER, GRIPPER_OPEN)],
        ),
        StepSpec::joints(
            "close gripper",
            vec![TargetSpec::literal(GRIPPER, GRIPPER_CLOSED)],
        ),
        StepSpec::joints(
            "pan and tilt head camera",
            vec![
                TargetSpec::literal(HEAD_PAN, articulation),
                TargetSpec::literal(HEAD_TILT, articulation),
            ],
        ),
        StepSpec::stow("stow before navigation"),
        StepSpec::joints(
            "drive forward",
            vec![TargetSpec::literal(TRANSLATE_JOINT, 0.5)],
        ),
        StepSpec::joints("turn around", vec![TargetSpec::literal(ROTATE_JOINT, PI)]),
        StepSpec::joints(
            "drive back to start",
            vec![TargetSpec::literal(TRANSLATE_JOINT, 0.5)],
        ),
    ]
}
