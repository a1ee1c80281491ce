//! Failures that abort a hook.
//!
//! A missing engine script is not represented here: it is a skip.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Stage;

/// One of the two directory mirrors performed during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStep {
    /// Build directory mirrored into the deploy directory.
    BuildToDeploy,
    /// pkgin database stashed into the package cache.
    PkginCache,
}

impl fmt::Display for CopyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyStep::BuildToDeploy => f.write_str("copy build into place"),
            CopyStep::PkginCache => f.write_str("copy pkgin cache"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{stage} script {} exited with {}", script.display(), describe_exit(*code))]
    ScriptFailed {
        stage: Stage,
        script: PathBuf,
        code: Option<i32>,
        timed_out: bool,
    },

    #[error("{stage} script {} could not be run", script.display())]
    ScriptSpawn {
        stage: Stage,
        script: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{step} exited with {}", describe_exit(*code))]
    CopyFailed { step: CopyStep, code: Option<i32> },

    #[error("{step} failed")]
    CopyIo {
        step: CopyStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialize engine payload")]
    Serialization(#[from] serde_json::Error),

    #[error("no engine set in the registry")]
    EngineUnset,

    #[error("read registry")]
    Registry(#[source] anyhow::Error),
}

impl HookError {
    /// Title used when the failure is rendered as a fatal block.
    pub fn title(&self) -> String {
        match self {
            HookError::ScriptFailed { stage, .. } | HookError::ScriptSpawn { stage, .. } => {
                format!("{stage} script failed")
            }
            HookError::CopyFailed { step, .. } | HookError::CopyIo { step, .. } => {
                format!("{step} failed")
            }
            HookError::Serialization(_) => "engine payload invalid".to_string(),
            HookError::EngineUnset | HookError::Registry(_) => "engine unknown".to_string(),
        }
    }

    /// Script and copy failures are stage failures; the rest mean the hook
    /// was given bad input.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            HookError::ScriptFailed { .. }
                | HookError::ScriptSpawn { .. }
                | HookError::CopyFailed { .. }
                | HookError::CopyIo { .. }
        )
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal or timed out)".to_string(),
    }
}
