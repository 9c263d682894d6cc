//! Pure routing between pipeline stages.

use std::fmt;

use cr_core::{Error, Result};

use crate::state::{first_pending, Step, StepKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Plan,
    Search,
    Extract,
    Summarize,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Plan => "plan",
            Stage::Search => "search",
            Stage::Extract => "extract",
            Stage::Summarize => "summarize",
            Stage::End => "end",
        };
        f.write_str(name)
    }
}

/// Where to go from the current step list.
///
/// Any pending step of an unknown type fails the run before more work is
/// done. Otherwise a pending search step goes to the search executor, and
/// with nothing pending (including an empty plan) the run moves on to the
/// summarizer.
pub fn route(steps: &[Step]) -> Result<Stage> {
    let mut pending = steps.iter().filter(|step| step.is_pending()).peekable();
    let has_pending = pending.peek().is_some();
    for step in pending {
        if let StepKind::Other(kind) = &step.kind {
            return Err(Error::UnknownStepType(kind.clone()));
        }
    }
    Ok(if has_pending { Stage::Search } else { Stage::Summarize })
}

/// Where a saved run picks up again. A pending step that already holds its
/// search payload goes straight to extraction.
pub fn resume_stage(steps: &[Step]) -> Result<Stage> {
    match route(steps)? {
        Stage::Search if first_pending(steps).is_some_and(|i| steps[i].search_result.is_some()) => {
            Ok(Stage::Extract)
        }
        stage => Ok(stage),
    }
}

/// Transition after `stage` has run.
pub fn next_stage(stage: Stage, steps: &[Step]) -> Result<Stage> {
    match stage {
        Stage::Plan | Stage::Extract => route(steps),
        Stage::Search => Ok(Stage::Extract),
        Stage::Summarize | Stage::End => Ok(Stage::End),
    }
}
