use crate::actuator_driver::LimitRange;
use crate::motion_step::JointTarget;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while accessing configuration")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    JsonError(#[from] serde_json::Error),
    #[error("error while parsing yaml")]
    YamlError(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointConfig {
    /// mechanical range
    pub hard: LimitRange,
    /// safe operating range, must lie inside `hard`
    pub soft: LimitRange,
    /// units per second, only used by the simulator
    pub speed: f64,
    /// relative joints (base odometry) move by the commanded amount
    #[serde(default)]
    pub relative: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RobotConfig {
    pub joints: BTreeMap<String, JointConfig>,
    pub stow_pose: Vec<JointTarget>,
    pub settle_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
}

lazy_static! {
    static ref INCLUDED: RobotConfig = {
        let json = include_str!("../config/stretch.json");
        RobotConfig::parse_json(json).expect("included robot config is valid")
    };
}

impl RobotConfig {
    /// Stretch comes with an included config file.
    ///
    /// This file is packaged with the binary
    /// This method retrieves this included version
    pub fn included() -> RobotConfig {
        INCLUDED.clone()
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn joint(&self, joint_id: &str) -> Option<&JointConfig> {
        self.joints.get(joint_id)
    }

    /// Checks ranges, speeds and the stow pose against the joint table
    pub fn validate(&self) -> Result<()> {
        for (joint_id, joint) in &self.joints {
            if !joint.hard.is_ordered() || !joint.soft.is_ordered() {
                return Err(ConfigError::Invalid(format!(
                    "joint {:?} has an inverted limit range",
                    joint_id
                )));
            }
            if !joint.hard.contains_range(&joint.soft) {
                return Err(ConfigError::Invalid(format!(
                    "soft limits of joint {:?} exceed its hard limits",
                    joint_id
                )));
            }
            if joint.speed.is_nan() || joint.speed <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "joint {:?} needs a positive speed",
                    joint_id
                )));
            }
        }
        for target in &self.stow_pose {
            match self.joints.get(&target.joint_id) {
                Some(joint) if joint.soft.contains(target.value) => (),
                Some(_) => {
                    return Err(ConfigError::Invalid(format!(
                        "stow value for {:?} is outside its soft limits",
                        target.joint_id
                    )))
                }
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "stow pose names unknown joint {:?}",
                        target.joint_id
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn parse_json(text: &str) -> Result<RobotConfig> {
        let config: RobotConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<RobotConfig> {
        let config: RobotConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn serialize_to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    pub fn serialize_to_yaml(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(yaml)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize_to_json()?)?;
        Ok(())
    }

    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize_to_yaml()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<RobotConfig> {
        let text = fs::read_to_string(path)?;
        RobotConfig::parse_json(&text)
    }

    pub fn load_yaml(path: impl AsRef<Path>) -> Result<RobotConfig> {
        let text = fs::read_to_string(path)?;
        RobotConfig::parse_yaml(&text)
    }

    /// Picks the format from the file extension, json unless `.yaml`/`.yml`
    pub fn load(path: impl AsRef<Path>) -> Result<RobotConfig> {
        let path = path.as_ref();
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("yaml") | Some("yml") => RobotConfig::load_yaml(path),
            _ => RobotConfig::load_json(path),
        }
    }
}
