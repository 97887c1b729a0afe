//! The allocation state machine is pure and total: replaying the same event
//! sequence from the same starting state always reaches the same place.

use devicepool::manager::allocation_fsm::transition;
use devicepool::{AllocationEvent, AllocationState};

fn replay(start: AllocationState, events: &[AllocationEvent]) -> AllocationState {
    events.iter().fold(start, |state, &event| transition(state, event).0)
}

#[test]
fn replaying_the_same_event_sequence_is_deterministic() {
    use AllocationEvent::*;

    let sequence = [
        ConnectedOnline,
        AvailableCheckPassed,
        AllocateRequest,
        FreeAvailable,
        ExplicitAllocateRequest,
        FreeUnavailable,
        ConnectedOnline,
    ];

    let first = replay(AllocationState::Unknown, &sequence);
    let second = replay(AllocationState::Unknown, &sequence);
    assert_eq!(first, second);
}

#[test]
fn a_second_force_allocate_on_an_allocated_device_is_rejected() {
    let (allocated, changed) = transition(AllocationState::Available, AllocationEvent::ForceAllocateRequest);
    assert_eq!(allocated, AllocationState::Allocated);
    assert!(changed);

    let (still, changed_again) = transition(allocated, AllocationEvent::ForceAllocateRequest);
    assert_eq!(still, AllocationState::Allocated, "rejected events must not alter the state");
    assert!(!changed_again);
}

#[test]
fn disconnect_after_allocated_keeps_the_device_allocated() {
    let (state, changed) = transition(AllocationState::Allocated, AllocationEvent::Disconnected);
    assert_eq!(state, AllocationState::Allocated, "I4: an allocated device stays Allocated through a disconnect");
    assert!(!changed, "the cell is a self-loop, not a transition");
}

#[test]
fn ignored_devices_reject_every_allocate_variant() {
    for event in [
        AllocationEvent::AllocateRequest,
        AllocationEvent::ExplicitAllocateRequest,
        AllocationEvent::ForceAllocateRequest,
    ] {
        let (state, changed) = transition(AllocationState::Ignored, event);
        assert_eq!(state, AllocationState::Ignored);
        assert!(!changed);
    }
}
