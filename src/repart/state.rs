//! Boot partition growth as a small state machine.
//!
//! ```text
//!  boot from A, A == B  --(shrink B from the left, clone A onto B, boot B)-->  boot from B, A != B
//!        ^                                                                           |
//!        |  (clone B onto A, boot A)                                                 |  (move and shrink A,
//!        |                                                                           v   grow boot)
//!  boot from B, A == B                                                             done
//!
//!  boot from A, A != B: diverged, refuse
//! ```
//!
//! Every run classifies the disk once and performs at most one transition.
//! A transition that switches root partitions must be followed by a reboot
//! before the next run.

use std::fmt;

use super::roles::RootSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowState {
    /// Boot partition already has the target size.
    Satisfied,
    /// Running from root-A with equal roots: make room in root-B and move
    /// the system there.
    PrepareStandby,
    /// Running from root-A but the roots differ. Nothing here produces that
    /// layout.
    Diverged,
    /// Running from root-B with equal roots: move the system back to root-A.
    Resync,
    /// Running from root-B with root-B already shrunk: shift root-A and grow
    /// the boot partition into the freed space.
    ExpandBoot,
    /// The running root is neither root partition.
    UnknownRoot,
}

impl fmt::Display for GrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrowState::Satisfied => "satisfied",
            GrowState::PrepareStandby => "prepare-standby",
            GrowState::Diverged => "diverged",
            GrowState::Resync => "resync",
            GrowState::ExpandBoot => "expand-boot",
            GrowState::UnknownRoot => "unknown-root",
        })
    }
}

/// Side effects of one transition. Deltas are in the unit of the growth
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Nothing,
    /// Move root-B's start right, reformat it, copy the live system onto it
    /// and boot from it next.
    CloneToStandby { root_b_delta_start: i64 },
    /// Reformat root-A, copy the live system onto it and boot from it next.
    CloneToRootA,
    /// Rewrite root-A with moved bounds, then grow the boot partition's end
    /// keeping its files.
    ResizeBoot {
        root_a_delta_start: i64,
        root_a_delta_end: i64,
        boot_delta_end: i64,
    },
    /// Refuse without touching the disk.
    Abort,
}

/// What the caller should expect once the action has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Done,
    Reboot,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    pub outcome: Expected,
}

pub fn classify(
    boot_len: u64,
    target: u64,
    active: Option<RootSlot>,
    roots_equal: bool,
) -> GrowState {
    if boot_len >= target {
        return GrowState::Satisfied;
    }
    match (active, roots_equal) {
        (Some(RootSlot::A), true) => GrowState::PrepareStandby,
        (Some(RootSlot::A), false) => GrowState::Diverged,
        (Some(RootSlot::B), true) => GrowState::Resync,
        (Some(RootSlot::B), false) => GrowState::ExpandBoot,
        (None, _) => GrowState::UnknownRoot,
    }
}

/// `delta` is how much the boot partition still has to grow.
pub fn transition(state: GrowState, delta: i64) -> Transition {
    let (action, outcome) = match state {
        GrowState::Satisfied => (Action::Nothing, Expected::Done),
        GrowState::PrepareStandby => (
            Action::CloneToStandby {
                root_b_delta_start: delta / 2,
            },
            Expected::Reboot,
        ),
        GrowState::Resync => (Action::CloneToRootA, Expected::Reboot),
        GrowState::ExpandBoot => (
            Action::ResizeBoot {
                root_a_delta_start: delta,
                root_a_delta_end: delta / 2,
                boot_delta_end: delta,
            },
            Expected::Done,
        ),
        GrowState::Diverged | GrowState::UnknownRoot => (Action::Abort, Expected::Failure),
    };
    Transition { action, outcome }
}
