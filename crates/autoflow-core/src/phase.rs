//! Fixed task phases and handler priorities.

use serde::{Deserialize, Serialize};

/// Handler runs first within its phase.
pub const PRIORITY_FIRST: i32 = 255;
/// Priority given to handlers that do not specify one.
pub const PRIORITY_DEFAULT: i32 = 128;
/// Handler runs last within its phase.
pub const PRIORITY_LAST: i32 = 0;

/// A named stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Input,
    Metainfo,
    Filter,
    Download,
    Modify,
    Output,
    Learn,
    Abort,
    Exit,
}

impl Phase {
    /// Normal execution order. `Abort` is not part of it; it runs only for
    /// aborted tasks, right before `Exit`.
    pub const SEQUENCE: [Phase; 9] = [
        Phase::Start,
        Phase::Input,
        Phase::Metainfo,
        Phase::Filter,
        Phase::Download,
        Phase::Modify,
        Phase::Output,
        Phase::Learn,
        Phase::Exit,
    ];

    pub const ALL: [Phase; 10] = [
        Phase::Start,
        Phase::Input,
        Phase::Metainfo,
        Phase::Filter,
        Phase::Download,
        Phase::Modify,
        Phase::Output,
        Phase::Learn,
        Phase::Abort,
        Phase::Exit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Input => "input",
            Phase::Metainfo => "metainfo",
            Phase::Filter => "filter",
            Phase::Download => "download",
            Phase::Modify => "modify",
            Phase::Output => "output",
            Phase::Learn => "learn",
            Phase::Abort => "abort",
            Phase::Exit => "exit",
        }
    }

    /// Default handler priority for this phase.
    pub fn default_priority(self) -> i32 {
        PRIORITY_DEFAULT
    }

    /// Phases that keep running once the task is aborting.
    pub fn runs_when_aborting(self) -> bool {
        matches!(self, Phase::Abort | Phase::Exit)
    }

    /// Phases skipped by learn-mode runs.
    pub fn skipped_when_learning(self) -> bool {
        matches!(self, Phase::Download | Phase::Modify | Phase::Output)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}
