use crate::core::turn::can_transition;
use crate::core::types::ExecutionStatus::*;

#[test]
fn happy_path_transitions_are_allowed() {
    let path = [
        (Idle, Processing),
        (Processing, Processing),
        (Processing, AwaitingAction),
        (AwaitingAction, Processing),
        (Processing, Idle),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn every_suspension_can_resume_or_fail() {
    for suspended in [AwaitingAction, AwaitingFollowup, AwaitingApproval] {
        assert!(can_transition(suspended, Processing));
        assert!(can_transition(suspended, Failed));
    }
}

#[test]
fn approval_resolution_may_fall_through_to_parked_work() {
    assert!(can_transition(AwaitingApproval, AwaitingAction));
    assert!(!can_transition(AwaitingAction, AwaitingApproval));
}

#[test]
fn failed_executions_accept_a_fresh_turn() {
    assert!(can_transition(Failed, Processing));
    assert!(!can_transition(Failed, Idle));
}

#[test]
fn terminal_states_never_jump_straight_to_suspension() {
    for from in [Idle, Failed] {
        for to in [AwaitingAction, AwaitingFollowup, AwaitingApproval] {
            assert!(
                !can_transition(from, to),
                "unexpected transition {:?} -> {:?}",
                from,
                to
            );
        }
    }
}

#[test]
fn suspensions_only_come_out_of_processing() {
    assert!(can_transition(Processing, AwaitingFollowup));
    assert!(can_transition(Processing, AwaitingApproval));
    assert!(!can_transition(AwaitingFollowup, AwaitingAction));
}
