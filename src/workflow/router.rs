//! Conditional edges of the workflow graph
//!
//! Pure functions of the merged state. The iteration cap is enforced here,
//! not inside Research.

use super::{Route, Stage};
use crate::state::{InvestigationState, Status};

/// Solutions below this confidence send the run back to Research while
/// iterations remain.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Research again iff Research asked to stay and the cap is not reached.
pub fn next_after_research(state: &InvestigationState) -> Stage {
    if state.status == Status::Researching && state.iterations_remaining() {
        Stage::Research
    } else {
        Stage::Audit
    }
}

/// Low-confidence refinement takes priority over approval.
pub fn next_after_solve(state: &InvestigationState) -> Route {
    if state.solution_confidence < LOW_CONFIDENCE_THRESHOLD && state.iterations_remaining() {
        Route::Stage(Stage::Research)
    } else if state.needs_human_approval {
        Route::Stage(Stage::Approve)
    } else {
        Route::End
    }
}

/// Full edge table.
pub fn successor(stage: Stage, state: &InvestigationState) -> Route {
    match stage {
        Stage::Diagnose => Route::Stage(Stage::Research),
        Stage::Research => Route::Stage(next_after_research(state)),
        Stage::Audit => Route::Stage(Stage::Solve),
        Stage::Solve => next_after_solve(state),
        Stage::Approve => Route::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: Status, iterations: u32, max: u32) -> InvestigationState {
        let mut state = InvestigationState::new("err", max);
        state.status = status;
        state.iterations = iterations;
        state
    }

    #[test]
    fn research_loops_only_while_researching_and_under_cap() {
        assert_eq!(next_after_research(&state(Status::Researching, 1, 3)), Stage::Research);
        assert_eq!(next_after_research(&state(Status::Researching, 3, 3)), Stage::Audit);
        assert_eq!(next_after_research(&state(Status::Auditing, 1, 3)), Stage::Audit);
    }

    #[test]
    fn solve_routes_by_confidence_then_approval() {
        let mut s = state(Status::Complete, 1, 3);
        s.solution_confidence = 0.9;
        assert_eq!(next_after_solve(&s), Route::End);

        s.needs_human_approval = true;
        assert_eq!(next_after_solve(&s), Route::Stage(Stage::Approve));

        s.solution_confidence = 0.2;
        assert_eq!(next_after_solve(&s), Route::Stage(Stage::Research));

        s.iterations = 3;
        assert_eq!(next_after_solve(&s), Route::Stage(Stage::Approve));

        s.needs_human_approval = false;
        assert_eq!(next_after_solve(&s), Route::End);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut s = state(Status::Complete, 0, 3);
        s.solution_confidence = LOW_CONFIDENCE_THRESHOLD;
        assert_eq!(next_after_solve(&s), Route::End);
    }

    #[test]
    fn routing_is_idempotent() {
        let mut s = state(Status::Researching, 2, 3);
        s.solution_confidence = 0.1;
        assert_eq!(next_after_research(&s), next_after_research(&s));
        assert_eq!(next_after_solve(&s), next_after_solve(&s));
        for stage in [Stage::Diagnose, Stage::Research, Stage::Audit, Stage::Solve, Stage::Approve] {
            assert_eq!(successor(stage, &s), successor(stage, &s));
        }
    }

    #[test]
    fn fixed_edges() {
        let s = state(Status::Investigating, 0, 3);
        assert_eq!(successor(Stage::Diagnose, &s), Route::Stage(Stage::Research));
        assert_eq!(successor(Stage::Audit, &s), Route::Stage(Stage::Solve));
        assert_eq!(successor(Stage::Approve, &s), Route::End);
    }
}
