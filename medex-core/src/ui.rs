//! Side-effect sink for per-slot progress rendering.
//!
//! The engine reports what each slot is doing; how that is drawn (spinners,
//! bars, nothing at all) is the caller's concern. Unit tests run with
//! [`NullUi`].

use medex_model::MediaKind;

pub trait SlotUi: Send + Sync {
    /// A slot started working on `name`.
    fn attach(&self, _slot: usize, _kind: MediaKind, _name: &str) {}

    /// Total work units for the slot's current task became known (for
    /// video, the clip duration in seconds once ffmpeg reports it).
    fn set_progress_total(&self, _slot: usize, _total: f64) {}

    /// Progress within the current task.
    fn set_progress_value(&self, _slot: usize, _value: f64) {}

    /// The slot finished (successfully or not) and is free again.
    fn detach(&self, _slot: usize) {}

    /// One more file fully settled; advances the overall counter.
    fn advance_overall(&self) {}
}

/// Renders nothing.
pub struct NullUi;

impl SlotUi for NullUi {}

/// Fixed-width scrolling window over a display name. Names shorter than the
/// window are padded; longer names rotate through `name + " · "` one
/// character per tick.
pub fn name_scroller(name: &str, width: usize, tick: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= width {
        let mut out: String = chars.into_iter().collect();
        out.extend(std::iter::repeat(' ').take(width - name.chars().count()));
        return out;
    }
    let looped: Vec<char> = chars.into_iter().chain(" · ".chars()).collect();
    let len = looped.len();
    let start = tick % len;
    (0..width).map(|i| looped[(start + i) % len]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_are_padded() {
        assert_eq!(name_scroller("abc", 5, 0), "abc  ");
        assert_eq!(name_scroller("abc", 5, 7), "abc  ");
    }

    #[test]
    fn long_names_scroll_one_char_per_tick() {
        let rendered = name_scroller("abcdefgh", 4, 0);
        assert_eq!(rendered, "abcd");
        let rendered = name_scroller("abcdefgh", 4, 2);
        assert_eq!(rendered, "cdef");
        // Wraps through the separator back to the start.
        let rendered = name_scroller("abcdefgh", 4, 8);
        assert_eq!(rendered, " · a");
    }
}
