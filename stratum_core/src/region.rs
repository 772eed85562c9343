// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spatial dirty tracking for partial re-rendering.

use alloc::vec::Vec;

use crate::rect::Rect;

/// The part of a surface whose pixels changed.
///
/// `Full` and `None` absorb rectangle lists when merged, so a chain of
/// fine-grained updates collapses to "redraw everything" the moment any
/// participant reports a whole-surface change. Rectangle lists are
/// concatenated, never unioned: entries may overlap, and consumers that
/// need disjoint coverage run [`disjoint_difference`] once at the edge
/// instead of paying for geometric merging on every report.
///
/// [`disjoint_difference`]: crate::rect::disjoint_difference
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DirtyRegion {
    /// Nothing changed; previous pixels can be reused.
    #[default]
    None,
    /// The entire surface changed.
    Full,
    /// These areas changed, in surface-space pixels. May overlap.
    Rects(Vec<Rect>),
}

impl DirtyRegion {
    /// Returns `true` if nothing changed.
    #[inline]
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns `true` if the whole surface changed.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Builds a region from a rectangle list, normalizing away entries
    /// that cover nothing.
    #[must_use]
    pub fn from_rects(rects: Vec<Rect>) -> Self {
        let mut rects = rects;
        rects.retain(|r| !r.is_empty());
        if rects.is_empty() {
            Self::None
        } else {
            Self::Rects(rects)
        }
    }

    /// Merges another region into this one.
    pub fn merge(&mut self, other: Self) {
        match (&mut *self, other) {
            (Self::Full, _) => {}
            (_, Self::Full) => *self = Self::Full,
            (_, Self::None) => {}
            (Self::None, other) => *self = other,
            (Self::Rects(a), Self::Rects(b)) => a.extend(b),
        }
    }

    /// Merges a single rectangle into this region.
    pub fn merge_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        match self {
            Self::Full => {}
            Self::None => *self = Self::Rects(alloc::vec![rect]),
            Self::Rects(rects) => rects.push(rect),
        }
    }

    /// Resolves the region against concrete surface bounds.
    ///
    /// `Full` becomes the bounds themselves; rectangle lists are clipped
    /// to the bounds and emptied entries dropped.
    #[must_use]
    pub fn into_rects(self, bounds: Rect) -> Vec<Rect> {
        match self {
            Self::None => Vec::new(),
            Self::Full => alloc::vec![bounds],
            Self::Rects(rects) => rects
                .into_iter()
                .map(|r| r.clip(&bounds))
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    /// The region moved by `(dx, dy)`. `Full` and `None` are unaffected.
    #[must_use]
    pub fn translated(self, dx: i32, dy: i32) -> Self {
        match self {
            Self::Rects(rects) => {
                Self::Rects(rects.into_iter().map(|r| r.translated(dx, dy)).collect())
            }
            other => other,
        }
    }

    /// Takes the accumulated region, leaving [`DirtyRegion::None`].
    #[must_use]
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}
