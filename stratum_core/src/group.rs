// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Moving and configuring graphics as a unit.

use alloc::vec::Vec;

use crate::compositor::{Compositor, GraphicId};
use crate::error::InvalidLayerError;
use crate::graphic::Graphic;
use crate::rect::{Anchor, Rect, round_i32};
use crate::surface::{BlendMode, Surface};

/// A set of graphics positioned relative to a shared origin.
///
/// The group position may be fractional; members sit at integer offsets
/// from its rounded value, so a group can be animated smoothly while
/// member spacing stays exact. The group holds handle clones; members
/// are added to a [`Compositor`] separately (see
/// [`GraphicsGroup::attach`]).
pub struct GraphicsGroup<S: Surface> {
    pos: (f64, f64),
    members: Vec<(Graphic<S>, (i32, i32))>,
}

impl<S: Surface> core::fmt::Debug for GraphicsGroup<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphicsGroup")
            .field("pos", &self.pos)
            .field("members", &self.members.len())
            .finish()
    }
}

impl<S: Surface> Default for GraphicsGroup<S> {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl<S: Surface> GraphicsGroup<S> {
    /// Creates an empty group at the given origin.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            pos: (x, y),
            members: Vec::new(),
        }
    }

    /// The group origin.
    #[must_use]
    pub fn pos(&self) -> (f64, f64) {
        self.pos
    }

    /// The rounded origin members are placed from.
    fn base(&self) -> (i32, i32) {
        (round_i32(self.pos.0), round_i32(self.pos.1))
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The members, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Graphic<S>> {
        self.members.iter().map(|(g, _)| g)
    }

    /// A member's offset from the group origin, if it is in the group.
    #[must_use]
    pub fn offset_of(&self, graphic: &Graphic<S>) -> Option<(i32, i32)> {
        self.members
            .iter()
            .find(|(g, _)| g.same_handle(graphic))
            .map(|&(_, rel)| rel)
    }

    /// Adds a graphic at an offset from the group origin, moving it
    /// there. Re-adding a member just changes its offset.
    pub fn add(&mut self, graphic: &Graphic<S>, rel: (i32, i32)) {
        let (bx, by) = self.base();
        graphic.move_to(bx + rel.0, by + rel.1);
        if let Some(entry) = self
            .members
            .iter_mut()
            .find(|(g, _)| g.same_handle(graphic))
        {
            entry.1 = rel;
        } else {
            self.members.push((graphic.clone(), rel));
        }
    }

    /// Removes a graphic from the group (its position is left as-is).
    /// Returns `false` if it was not a member.
    pub fn remove(&mut self, graphic: &Graphic<S>) -> bool {
        let before = self.members.len();
        self.members.retain(|(g, _)| !g.same_handle(graphic));
        self.members.len() != before
    }

    /// Moves the group origin, repositioning every member.
    pub fn set_pos(&mut self, x: f64, y: f64) {
        self.pos = (x, y);
        let (bx, by) = self.base();
        for (g, rel) in &self.members {
            g.move_to(bx + rel.0, by + rel.1);
        }
    }

    /// Moves the group origin by an offset.
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.set_pos(self.pos.0 + dx, self.pos.1 + dy);
    }

    /// The smallest rect covering every member (pre-rotation), or the
    /// empty rect for an empty group.
    #[must_use]
    pub fn rect(&self) -> Rect {
        let mut it = self.members.iter();
        let Some((first, _)) = it.next() else {
            return Rect::ZERO;
        };
        let mut rect = first.rect();
        for (g, _) in it {
            rect = rect.union(&g.rect());
        }
        rect
    }

    /// Sets every member's layer.
    pub fn set_layer(&self, layer: i32) {
        for (g, _) in &self.members {
            g.set_layer(layer);
        }
    }

    /// Shows or hides every member.
    pub fn set_visible(&self, visible: bool) {
        for (g, _) in &self.members {
            g.set_visible(visible);
        }
    }

    /// Sets every member's blend mode.
    pub fn set_blend_mode(&self, mode: BlendMode) {
        for (g, _) in &self.members {
            g.set_blend_mode(mode);
        }
    }

    /// Sets every member's resize anchor.
    pub fn set_anchor(&self, anchor: Anchor) {
        for (g, _) in &self.members {
            g.set_anchor(anchor);
        }
    }

    /// Sets every member's rotation anchor.
    pub fn set_rot_anchor(&self, anchor: Anchor) {
        for (g, _) in &self.members {
            g.set_rot_anchor(anchor);
        }
    }

    /// Sets every member's rotation threshold.
    pub fn set_rotate_threshold(&self, threshold: f64) {
        for (g, _) in &self.members {
            g.set_rotate_threshold(threshold);
        }
    }

    /// Adds every member to a compositor, returning their handles in
    /// member order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLayerError`] if any member has no layer; members
    /// added before the failing one stay added.
    pub fn attach(
        &self,
        compositor: &mut Compositor<S>,
    ) -> Result<Vec<GraphicId>, InvalidLayerError> {
        self.members
            .iter()
            .map(|(g, _)| compositor.add(g))
            .collect()
    }
}
