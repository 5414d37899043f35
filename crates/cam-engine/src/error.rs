use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("camera.settings is empty")]
    NoSettings,
    #[error("setting {0} declared more than once")]
    DuplicateSetting(String),
    #[error("exclusion on {param} excludes unknown setting {excluded}")]
    UnknownExcluded { param: String, excluded: String },
    #[error("snap-validated parameter {0} has no legal values")]
    EmptyValueSet(String),
    #[error("recording lock names unknown setting {0}")]
    UnknownLocked(String),
}
