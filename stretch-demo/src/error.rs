use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Failed to read script file {0:?}")]
    ScriptIo(#[from] std::io::Error),
    #[error("Failed to parse JSON script {0:?}")]
    ScriptJson(#[from] serde_json::Error),
    #[error("Failed to parse YAML script {0:?}")]
    ScriptYaml(#[from] serde_yaml::Error),
    #[error("Script contains no steps")]
    EmptyScript,
}
