use super::{trail_entry, StageContext};
use crate::state::{InvestigationState, StateUpdate, Status};
use crate::workflow::progress::ProgressEvent;
use crate::workflow::Stage;

/// Approval checkpoint. Surfaces the pending action and halts; resuming is
/// up to the caller.
pub fn run(ctx: &StageContext<'_>, state: &InvestigationState) -> StateUpdate {
    tracing::warn!(pending_action = %state.pending_action, "human approval required");
    ctx.progress.emit(ProgressEvent::ApprovalRequired {
        pending_action: state.pending_action.clone(),
        proposed_solution: state.proposed_solution.clone(),
    });

    let mut update = StateUpdate::with_message(
        state,
        trail_entry(Stage::Approve, "Awaiting human approval", &[]),
    );
    update.status = Some(Status::AwaitingApproval);
    update
}
