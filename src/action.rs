//! The closed vocabulary of timed actions a frame can apply to kites.

use glam::Vec2;

use crate::kite::Tip;

/// One choreography instruction.
///
/// Plain variants carry absolute targets; `*Add` variants carry deltas
/// relative to the targeted kite's pose at the moment the action starts.
/// `Wait` and `Quit` carry no spatial payload and only consume time
/// (`Quit` additionally terminates the whole script).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Glide to an absolute position.
    Move(Vec2),

    /// Glide by a positional delta.
    MoveAdd(Vec2),

    /// Turn in place to an absolute angle (degrees).
    Rotation(f32),

    /// Turn in place by an angle delta (degrees).
    RotationAdd(f32),

    /// Rotate about a wingtip to an absolute angle.
    TipRotation(Tip, f32),

    /// Rotate about a wingtip by an angle delta.
    TipRotationAdd(Tip, f32),

    /// Hold position for the frame duration.
    Wait,

    /// Hold, then finish the script. Terminal.
    Quit,
}

impl Action {
    /// True for actions that only consume time and never touch a pose.
    pub fn is_timed_only(&self) -> bool {
        matches!(self, Action::Wait | Action::Quit)
    }

    /// Short name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::Move(_) => "move",
            Action::MoveAdd(_) => "move-add",
            Action::Rotation(_) => "rotation",
            Action::RotationAdd(_) => "rotation-add",
            Action::TipRotation(..) => "tip-rotation",
            Action::TipRotationAdd(..) => "tip-rotation-add",
            Action::Wait => "wait",
            Action::Quit => "quit",
        }
    }
}
