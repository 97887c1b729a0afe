//! Pure allocation state machine (SPEC_FULL.md §4.4).
//!
//! `transition` never blocks and never performs I/O; it is the single
//! source of truth for which `(state, event)` pairs are legal. Every other
//! component only ever drives the FSM through [`crate::device::ManagedDevice::apply_event`].

use crate::models::{AllocationEvent, AllocationState};

/// Applies `event` to `from`, returning the new state and whether it
/// actually changed. `changed == false` means the event was rejected and
/// `from` is returned unmodified (e.g. a second `ForceAllocateRequest` on
/// an already-`Allocated` device).
pub fn transition(from: AllocationState, event: AllocationEvent) -> (AllocationState, bool) {
    use AllocationEvent::*;
    use AllocationState::*;

    match (from, event) {
        // Unknown
        (Unknown, ConnectedOnline) => (CheckingAvailability, true),
        (Unknown, ConnectedOffline) => (Unknown, false),
        (Unknown, ForceAllocateRequest) => (Allocated, true),
        (Unknown, ForceAvailable) => (Available, true),
        (Unknown, Disconnected) => (Unknown, false),

        // CheckingAvailability
        (CheckingAvailability, StateChangeOffline) => (Unavailable, true),
        (CheckingAvailability, AvailableCheckPassed) => (Available, true),
        (CheckingAvailability, AvailableCheckFailed) => (Unavailable, true),
        (CheckingAvailability, AvailableCheckIgnored) => (Ignored, true),
        (CheckingAvailability, ForceAllocateRequest) => (Allocated, true),
        (CheckingAvailability, ForceAvailable) => (Available, true),
        (CheckingAvailability, Disconnected) => (Unknown, true),

        // Available
        (Available, StateChangeOnline) => (Available, false),
        (Available, StateChangeOffline) => (Unavailable, true),
        (Available, AllocateRequest) => (Allocated, true),
        (Available, ExplicitAllocateRequest) => (Allocated, true),
        (Available, ForceAllocateRequest) => (Allocated, true),
        (Available, FreeAvailable) => (Available, false),
        (Available, FreeUnavailable) => (Unavailable, true),
        (Available, FreeUnknown) => (Unknown, true),
        (Available, ForceAvailable) => (Available, false),
        (Available, Disconnected) => (Unknown, true),

        // Allocated
        (Allocated, ConnectedOnline) => (Allocated, false),
        (Allocated, ConnectedOffline) => (Allocated, false),
        (Allocated, StateChangeOnline) => (Allocated, false),
        (Allocated, StateChangeOffline) => (Unavailable, true),
        (Allocated, ForceAllocateRequest) => (Allocated, false),
        (Allocated, FreeAvailable) => (Available, true),
        (Allocated, FreeUnavailable) => (Unavailable, true),
        (Allocated, FreeUnknown) => (Unknown, true),
        (Allocated, Disconnected) => (Allocated, false),

        // Unavailable
        (Unavailable, ConnectedOnline) => (CheckingAvailability, true),
        (Unavailable, StateChangeOnline) => (Available, true),
        (Unavailable, StateChangeOffline) => (Unavailable, false),
        (Unavailable, FreeAvailable) => (Available, true),
        (Unavailable, FreeUnavailable) => (Unavailable, false),
        (Unavailable, FreeUnknown) => (Unknown, true),
        (Unavailable, ForceAvailable) => (Available, true),
        (Unavailable, Disconnected) => (Unknown, true),

        // Ignored
        (Ignored, ConnectedOnline) => (Ignored, false),
        (Ignored, AllocateRequest) => (Ignored, false),
        (Ignored, ExplicitAllocateRequest) => (Ignored, false),
        (Ignored, ForceAllocateRequest) => (Ignored, false),
        (Ignored, ForceAvailable) => (Available, true),
        (Ignored, Disconnected) => (Unknown, true),

        // Anything not named above is rejected: state unchanged.
        (state, _) => (state, false),
    }
}
