use crate::error::DemoError;
use std::{fs, path::Path};
use stretch_controller::pose_resolver::StepSpec;

type Result<T> = std::result::Result<T, DemoError>;

pub fn parse_json_script(text: &str) -> Result<Vec<StepSpec>> {
    non_empty(serde_json::from_str(text)?)
}

pub fn parse_yaml_script(text: &str) -> Result<Vec<StepSpec>> {
    non_empty(serde_yaml::from_str(text)?)
}

/// Reads a list of steps, `.yaml`/`.yml` as YAML and anything else as JSON
pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<StepSpec>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("yaml") | Some("yml") => parse_yaml_script(&text),
        _ => parse_json_script(&text),
    }
}

fn non_empty(steps: Vec<StepSpec>) -> Result<Vec<StepSpec>> {
    if steps.is_empty() {
        Err(DemoError::EmptyScript)
    } else {
        Ok(steps)
    }
}
