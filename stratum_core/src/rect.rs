// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer pixel rectangles and anchor points.
//!
//! Everything here works in output-space pixels with the y axis growing
//! downward. Rectangles are position + extent rather than corner pairs,
//! which keeps clipping and translation arithmetic overflow-friendly for
//! the sizes this crate deals with.

use alloc::vec::Vec;

/// An axis-aligned pixel rectangle: top-left corner plus width and height.
///
/// A rectangle with zero (or negative) width or height is *empty*; empty
/// rectangles clip to empty and contain nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub w: i32,
    /// Height in pixels.
    pub h: i32,
}

impl Rect {
    /// The empty rectangle at the origin.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Creates a rectangle from its top-left corner and size.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Creates a rectangle from a position and size pair.
    #[inline]
    #[must_use]
    pub const fn from_pos_size(pos: (i32, i32), size: (i32, i32)) -> Self {
        Self::new(pos.0, pos.1, size.0, size.1)
    }

    /// One past the right edge.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> i32 {
        self.x + self.w
    }

    /// One past the bottom edge.
    #[inline]
    #[must_use]
    pub const fn bottom(&self) -> i32 {
        self.y + self.h
    }

    /// The top-left corner.
    #[inline]
    #[must_use]
    pub const fn pos(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// The `(width, height)` pair.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> (i32, i32) {
        (self.w, self.h)
    }

    /// Returns `true` if this rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// This rectangle moved by `(dx, dy)`.
    #[inline]
    #[must_use]
    pub const fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.w, self.h)
    }

    /// This rectangle with its top-left corner replaced.
    #[inline]
    #[must_use]
    pub const fn with_pos(&self, pos: (i32, i32)) -> Self {
        Self::new(pos.0, pos.1, self.w, self.h)
    }

    /// This rectangle with its size replaced, corner unchanged.
    #[inline]
    #[must_use]
    pub const fn with_size(&self, size: (i32, i32)) -> Self {
        Self::new(self.x, self.y, size.0, size.1)
    }

    /// The intersection of two rectangles.
    ///
    /// Returns [`Rect::ZERO`] positioned at the overlap's corner (an empty
    /// rectangle) when they do not overlap.
    #[must_use]
    pub fn clip(&self, other: &Self) -> Self {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if r <= x || b <= y {
            Self::new(x, y, 0, 0)
        } else {
            Self::new(x, y, r - x, b - y)
        }
    }

    /// The smallest rectangle covering both inputs.
    ///
    /// An empty input contributes nothing; the union of two empty
    /// rectangles is empty.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Self::new(x, y, r - x, b - y)
    }

    /// Returns `true` if `other` lies entirely within this rectangle.
    ///
    /// An empty `other` is contained by anything.
    #[must_use]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    /// Returns `true` if the two rectangles share at least one pixel.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Grows (or shrinks, for negative amounts) the rectangle by `(dw, dh)`
    /// in total, keeping its center fixed up to integer rounding.
    #[inline]
    #[must_use]
    pub const fn inflated(&self, dw: i32, dh: i32) -> Self {
        Self::new(self.x - dw / 2, self.y - dh / 2, self.w + dw, self.h + dh)
    }
}

/// A reference point within a rectangle.
///
/// Anchors name the point of a graphic that stays put when its size
/// changes: resizing a [`Anchor::Center`]-anchored graphic grows it
/// outward in all directions, a [`Anchor::TopLeft`]-anchored one grows
/// down and to the right.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Anchor {
    /// The top-left corner. The default.
    #[default]
    TopLeft,
    /// The top-right corner.
    TopRight,
    /// The bottom-left corner.
    BottomLeft,
    /// The bottom-right corner.
    BottomRight,
    /// The middle of the top edge.
    MidTop,
    /// The middle of the bottom edge.
    MidBottom,
    /// The middle of the left edge.
    MidLeft,
    /// The middle of the right edge.
    MidRight,
    /// The center.
    Center,
    /// A fixed offset from the top-left corner, in pixels.
    Offset(i32, i32),
}

impl Anchor {
    /// The anchor point for a rectangle of the given size, as an exact
    /// offset from its top-left corner.
    ///
    /// Midpoints land on half-pixel coordinates for odd extents; use
    /// [`Anchor::resolve`] for the rounded integer form.
    #[must_use]
    pub fn resolve_f(&self, size: (i32, i32)) -> kurbo::Vec2 {
        let w = f64::from(size.0);
        let h = f64::from(size.1);
        let (x, y) = match *self {
            Self::TopLeft => (0.0, 0.0),
            Self::TopRight => (w, 0.0),
            Self::BottomLeft => (0.0, h),
            Self::BottomRight => (w, h),
            Self::MidTop => (w / 2.0, 0.0),
            Self::MidBottom => (w / 2.0, h),
            Self::MidLeft => (0.0, h / 2.0),
            Self::MidRight => (w, h / 2.0),
            Self::Center => (w / 2.0, h / 2.0),
            Self::Offset(ox, oy) => (f64::from(ox), f64::from(oy)),
        };
        kurbo::Vec2::new(x, y)
    }

    /// [`Anchor::resolve_f`] rounded to whole pixels.
    #[must_use]
    pub fn resolve(&self, size: (i32, i32)) -> (i32, i32) {
        let v = self.resolve_f(size);
        (round_i32(v.x), round_i32(v.y))
    }
}

/// `f64::round` narrowed to `i32`.
///
/// Inputs here are pixel coordinates, far inside `i32` range.
#[inline]
#[must_use]
#[expect(clippy::cast_possible_truncation, reason = "pixel-range values")]
pub(crate) fn round_i32(v: f64) -> i32 {
    #[cfg(not(feature = "std"))]
    use kurbo::common::FloatFuncs as _;
    v.round() as i32
}

/// Subdivides `add` minus `rm` into non-overlapping rectangles.
///
/// Both inputs may overlap themselves and each other arbitrarily. The
/// result covers exactly the pixels in some `add` rectangle and no `rm`
/// rectangle, with no pixel covered twice.
///
/// Works on the grid induced by every input edge: each grid cell is
/// wholly inside or outside each input, so marking cells and re-emitting
/// horizontal runs of kept cells is exact.
#[must_use]
pub fn disjoint_difference(add: &[Rect], rm: &[Rect]) -> Vec<Rect> {
    if add.is_empty() {
        return Vec::new();
    }
    let mut xs: Vec<i32> = Vec::with_capacity(2 * (add.len() + rm.len()));
    let mut ys: Vec<i32> = Vec::with_capacity(xs.capacity());
    for r in add.iter().chain(rm) {
        if r.is_empty() {
            continue;
        }
        xs.push(r.x);
        xs.push(r.right());
        ys.push(r.y);
        ys.push(r.bottom());
    }
    xs.sort_unstable();
    xs.dedup();
    ys.sort_unstable();
    ys.dedup();
    if xs.len() < 2 || ys.len() < 2 {
        return Vec::new();
    }
    let cols = xs.len() - 1;
    let rows = ys.len() - 1;

    // Cell flags: bit 1 = covered by some `add`, bit 0 = covered by some `rm`.
    let mut grid = alloc::vec![0_u8; cols * rows];
    let mut mark = |r: &Rect, bit: u8| {
        if r.is_empty() {
            return;
        }
        let c0 = xs.partition_point(|&x| x < r.x);
        let c1 = xs.partition_point(|&x| x < r.right());
        let r0 = ys.partition_point(|&y| y < r.y);
        let r1 = ys.partition_point(|&y| y < r.bottom());
        for row in r0..r1 {
            for col in c0..c1 {
                grid[row * cols + col] |= bit;
            }
        }
    };
    for r in add {
        mark(r, 2);
    }
    for r in rm {
        mark(r, 1);
    }

    // Emit maximal horizontal runs of cells kept by `add` alone.
    let mut out = Vec::new();
    for row in 0..rows {
        let mut run: Option<usize> = None;
        for col in 0..=cols {
            let kept = col < cols && grid[row * cols + col] == 2;
            match (run, kept) {
                (None, true) => run = Some(col),
                (Some(start), false) => {
                    out.push(Rect::new(
                        xs[start],
                        ys[row],
                        xs[col] - xs[start],
                        ys[row + 1] - ys[row],
                    ));
                    run = None;
                }
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn area(rects: &[Rect]) -> i64 {
        rects.iter().map(|r| i64::from(r.w) * i64::from(r.h)).sum()
    }

    fn covers(rects: &[Rect], x: i32, y: i32) -> bool {
        rects
            .iter()
            .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom())
    }

    #[test]
    fn clip_overlapping() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.clip(&b), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn clip_disjoint_is_empty() {
        let a = Rect::new(0, 0, 4, 4);
        let b = Rect::new(10, 10, 4, 4);
        assert!(a.clip(&b).is_empty());
    }

    #[test]
    fn union_ignores_empty() {
        let a = Rect::new(2, 3, 4, 5);
        assert_eq!(a.union(&Rect::ZERO), a);
        assert_eq!(Rect::ZERO.union(&a), a);
    }

    #[test]
    fn union_covers_both() {
        let a = Rect::new(0, 0, 2, 2);
        let b = Rect::new(5, 7, 1, 1);
        let u = a.union(&b);
        assert!(u.contains_rect(&a));
        assert!(u.contains_rect(&b));
        assert_eq!(u, Rect::new(0, 0, 6, 8));
    }

    #[test]
    fn contains_rect_edges() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.contains_rect(&Rect::new(0, 0, 10, 10)));
        assert!(a.contains_rect(&Rect::new(9, 9, 1, 1)));
        assert!(!a.contains_rect(&Rect::new(9, 9, 2, 1)));
        // Empty rectangles are contained anywhere.
        assert!(a.contains_rect(&Rect::new(100, 100, 0, 5)));
    }

    #[test]
    fn inflated_keeps_center() {
        let a = Rect::new(10, 10, 4, 4);
        let b = a.inflated(2, 2);
        assert_eq!(b, Rect::new(9, 9, 6, 6));
    }

    #[test]
    fn anchor_center_of_odd_extent() {
        let v = Anchor::Center.resolve_f((5, 3));
        assert_eq!((v.x, v.y), (2.5, 1.5));
        assert_eq!(Anchor::Center.resolve((5, 3)), (3, 2));
    }

    #[test]
    fn anchor_corners() {
        assert_eq!(Anchor::TopLeft.resolve((8, 6)), (0, 0));
        assert_eq!(Anchor::BottomRight.resolve((8, 6)), (8, 6));
        assert_eq!(Anchor::MidBottom.resolve((8, 6)), (4, 6));
        assert_eq!(Anchor::Offset(3, -2).resolve((8, 6)), (3, -2));
    }

    #[test]
    fn disjoint_empty_add() {
        assert!(disjoint_difference(&[], &[Rect::new(0, 0, 5, 5)]).is_empty());
    }

    #[test]
    fn disjoint_no_removal_preserves_area() {
        let add = [Rect::new(0, 0, 10, 10), Rect::new(5, 5, 10, 10)];
        let out = disjoint_difference(&add, &[]);
        // Union area is 100 + 100 - 25 overlap.
        assert_eq!(area(&out), 175);
        for a in &out {
            for b in &out {
                if a != b {
                    assert!(!a.intersects(b), "result must be disjoint: {a:?} {b:?}");
                }
            }
        }
    }

    #[test]
    fn disjoint_subtracts_hole() {
        let add = [Rect::new(0, 0, 10, 10)];
        let rm = [Rect::new(3, 3, 4, 4)];
        let out = disjoint_difference(&add, &rm);
        assert_eq!(area(&out), 100 - 16);
        assert!(!covers(&out, 5, 5));
        assert!(covers(&out, 0, 0));
        assert!(covers(&out, 9, 9));
    }

    #[test]
    fn disjoint_removal_outside_add_is_noop() {
        let add = [Rect::new(0, 0, 4, 4)];
        let rm = [Rect::new(20, 20, 4, 4)];
        let out = disjoint_difference(&add, &rm);
        assert_eq!(area(&out), 16);
    }

    #[test]
    fn disjoint_skips_empty_inputs() {
        let add = [Rect::new(0, 0, 4, 4), Rect::new(50, 50, 0, 9)];
        let out = disjoint_difference(&add, &[Rect::new(1, 1, 0, 0)]);
        assert_eq!(area(&out), 16);
    }

    #[test]
    fn disjoint_exact_cover() {
        let add = [
            Rect::new(0, 0, 6, 3),
            Rect::new(2, 1, 6, 4),
            Rect::new(0, 2, 3, 6),
        ];
        let rm = [Rect::new(1, 1, 3, 3), Rect::new(4, 0, 1, 8)];
        let out = disjoint_difference(&add, &rm);
        for y in -1..10 {
            for x in -1..10 {
                let in_add = add
                    .iter()
                    .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom());
                let in_rm = rm
                    .iter()
                    .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom());
                assert_eq!(
                    covers(&out, x, y),
                    in_add && !in_rm,
                    "pixel ({x}, {y}) miscovered"
                );
            }
        }
    }
}
