//! Result window arithmetic for paginated queries.

use serde::{Deserialize, Serialize};

/// Half-open index range `[lower, upper)` into a result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub lower: usize,
    pub upper: usize,
}

impl Window {
    pub fn len(&self) -> usize { self.upper - self.lower }
    pub fn is_empty(&self) -> bool { self.lower == self.upper }
}

/// Compute the window for `offset`/`first` over a list of `len` items.
/// Absent or non-positive values mean "from the start" and "to the end".
pub fn window(offset: Option<i64>, first: Option<i64>, len: usize) -> Window {
    let lower = match offset {
        Some(o) if o > 0 => usize::try_from(o).unwrap_or(usize::MAX).min(len),
        _ => 0,
    };
    let upper = match first {
        Some(f) if f > 0 => lower.saturating_add(usize::try_from(f).unwrap_or(usize::MAX)).min(len),
        _ => len,
    };
    Window { lower, upper }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_table() {
        let cases: &[(Option<i64>, Option<i64>, usize, (usize, usize))] = &[
            (None, None, 10, (0, 10)),
            (Some(3), None, 10, (3, 10)),
            (None, Some(4), 10, (0, 4)),
            (Some(8), Some(5), 10, (8, 10)),
            (Some(-5), Some(3), 10, (0, 3)),
            (Some(20), Some(5), 10, (10, 10)),
            (Some(0), Some(0), 10, (0, 10)),
            (Some(2), Some(-1), 10, (2, 10)),
            (None, None, 0, (0, 0)),
            (Some(i64::MAX), Some(i64::MAX), 7, (7, 7)),
            (Some(1), Some(i64::MAX), 7, (1, 7)),
        ];
        for &(offset, first, len, (lo, up)) in cases {
            let w = window(offset, first, len);
            assert_eq!((w.lower, w.upper), (lo, up), "offset={:?} first={:?} len={}", offset, first, len);
        }
    }

    #[test]
    fn bounds_hold_everywhere() {
        for len in 0..6usize {
            for o in -2..9i64 {
                for f in -2..9i64 {
                    let w = window(Some(o), Some(f), len);
                    assert!(w.lower <= w.upper && w.upper <= len);
                }
            }
        }
    }
}
