use thiserror::Error;

/// Fatal build errors. Any of these aborts the pipeline run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{table}: empty path")]
    EmptyPath { table: String },

    /// A path tried to descend through a leaf.
    #[error("{table}.{path}: not a map at {at}")]
    NotAMap {
        table: String,
        path: String,
        at: String,
    },

    #[error("cannot set {table}.{path} to {value}, unresolved conflict with {current}")]
    Conflict {
        table: String,
        path: String,
        value: String,
        current: String,
    },

    #[error("cannot register stage {name:?}, position #{position} already taken")]
    PositionTaken { position: u32, name: String },

    #[error("stage {name:?} failed: {message}")]
    Stage { name: String, message: String },

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BuildError {
    pub(crate) fn conflict(
        table: &str,
        path: &[String],
        value: &serde_json::Value,
        current: &serde_json::Value,
    ) -> Self {
        BuildError::Conflict {
            table: table.to_string(),
            path: path.join("."),
            value: value.to_string(),
            current: current.to_string(),
        }
    }
}
