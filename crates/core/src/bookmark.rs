//! Bookmark jump targets.

/// Default minimum distance between the playhead and a jump target, in
/// seconds. Keeps a repeated press from landing on the mark just left.
pub const DEFAULT_MARK_GUARD_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkDirection {
    Forward,
    Backward,
}

/// Resolved jump: where to seek and how far that is from the playhead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkJump {
    pub target: f64,
    /// `target - current`; negative for backward jumps.
    pub delta: f64,
}

/// Find the bookmark to jump to from `current`.
///
/// `marks` must be sorted ascending. Forward picks the first mark more than
/// `guard` ahead, otherwise the last mark; backward picks the last mark more
/// than `guard` behind, otherwise the first mark. `None` only when there are
/// no marks.
pub fn nearest_mark(
    marks: &[f64],
    current: f64,
    direction: MarkDirection,
    guard: f64,
) -> Option<MarkJump> {
    let target = match direction {
        MarkDirection::Forward => marks
            .iter()
            .copied()
            .find(|&m| m > current + guard)
            .or_else(|| marks.last().copied()),
        MarkDirection::Backward => marks
            .iter()
            .rev()
            .copied()
            .find(|&m| m < current - guard)
            .or_else(|| marks.first().copied()),
    }?;

    Some(MarkJump {
        target,
        delta: target - current,
    })
}
