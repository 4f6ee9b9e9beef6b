#![doc = include_str!("../../doc_include.md")]

pub mod actuator_driver;
pub mod demo_script;
pub mod error;
pub mod interrupt;
mod motion_sequencer;
pub mod motion_step;
pub mod pose_resolver;
pub mod robot_config;
pub mod sequence_guard;
