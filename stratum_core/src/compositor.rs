// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layered dirty-rectangle compositing onto a target surface.
//!
//! A [`Compositor`] owns a target surface and a set of graphics on
//! integer layers. [`Compositor::draw`] repaints only the parts of the
//! target that changed since the last draw: it gathers every member's
//! changed screen areas, culls areas hidden behind opaque graphics in
//! front, and paints the survivors back to front.
//!
//! The compositor is itself wrapped in a [`Graphic`] whose original
//! surface is the target, so a composition can be transformed and added
//! to another compositor like any other graphic.

use alloc::vec::Vec;

use crate::error::InvalidLayerError;
use crate::graphic::Graphic;
use crate::rect::{Rect, disjoint_difference};
use crate::region::DirtyRegion;
use crate::surface::Surface;
use crate::trace::{
    DrawBeginEvent, DrawEndEvent, GraphicPreparedEvent, LayerPaintedEvent, Tracer,
};

/// Sort key for painting order.
///
/// The overlay sorts in front of every numbered layer; lower numbers
/// sort in front of higher ones. Front-most layers are painted last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKey {
    /// The reserved front-most slot, held by at most one graphic.
    Overlay,
    /// An ordinary numbered layer.
    Normal(i32),
}

/// Handle to a graphic added to a [`Compositor`].
///
/// Slots are recycled; generation counters make stale handles fail
/// loudly rather than touch the wrong graphic.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicId {
    idx: u32,
    generation: u32,
}

impl core::fmt::Debug for GraphicId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "GraphicId({}@gen{})", self.idx, self.generation)
    }
}

/// Content producers an enclosing compositor depends on.
///
/// A nested [`Compositor`] implements this; call
/// [`prepare`](Drawable::prepare) on inner drawables before drawing the
/// outer compositor so their graphics carry fresh content.
pub trait Drawable {
    /// Produces this frame's content, returning the disjoint target
    /// areas that changed.
    fn prepare(&mut self) -> Vec<Rect>;
}

/// Draws graphics to a target surface, repainting only what changed.
pub struct Compositor<S: Surface> {
    base: Graphic<S>,
    slots: Vec<Option<Graphic<S>>>,
    generation: Vec<u32>,
    free_list: Vec<u32>,
    overlay: Option<GraphicId>,
    dirty: DirtyRegion,
    draw_index: u64,
}

impl<S: Surface> core::fmt::Debug for Compositor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Compositor")
            .field("graphics", &self.len())
            .field("overlay", &self.overlay)
            .field("target_size", &self.base.orig_size())
            .finish_non_exhaustive()
    }
}

impl<S: Surface> Compositor<S> {
    /// Creates a compositor drawing onto `target`, positioned at `pos`
    /// for use as a graphic in an enclosing compositor.
    pub fn new(target: S, pos: (i32, i32)) -> Self {
        Self {
            base: Graphic::new(target, pos),
            slots: Vec::new(),
            generation: Vec::new(),
            free_list: Vec::new(),
            overlay: None,
            dirty: DirtyRegion::None,
            draw_index: 0,
        }
    }

    /// The graphic wrapping this compositor's target surface.
    ///
    /// Use it to position or transform the composition, or to add it to
    /// another compositor. Its original surface is the draw target.
    #[must_use]
    pub fn graphic(&self) -> &Graphic<S> {
        &self.base
    }

    /// The target surface size.
    #[must_use]
    pub fn target_size(&self) -> (i32, i32) {
        self.base.orig_size()
    }

    /// Number of graphics added, overlay included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Returns `true` if no graphics have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a graphic; it is drawn on its current layer each draw.
    ///
    /// The compositor keeps a clone of the handle, so the caller's copy
    /// stays live for moving and transforming the graphic.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLayerError`] if the graphic has no layer (it was
    /// previously installed as an overlay and not given a layer since).
    pub fn add(&mut self, graphic: &Graphic<S>) -> Result<GraphicId, InvalidLayerError> {
        if graphic.layer().is_none() {
            return Err(InvalidLayerError);
        }
        Ok(self.insert(graphic.clone()))
    }

    fn insert(&mut self, graphic: Graphic<S>) -> GraphicId {
        // Never draw over a possible previous location.
        graphic.set_was_visible(false);
        let idx = if let Some(idx) = self.free_list.pop() {
            self.generation[idx as usize] += 1;
            self.slots[idx as usize] = Some(graphic);
            idx
        } else {
            let idx = u32::try_from(self.slots.len()).expect("graphic slot count overflow");
            self.slots.push(Some(graphic));
            self.generation.push(0);
            idx
        };
        GraphicId {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    /// Removes a graphic, queueing its last drawn area for repainting.
    ///
    /// Returns the handle, which stays usable outside this compositor.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn remove(&mut self, id: GraphicId) -> Graphic<S> {
        self.validate(id);
        let graphic = self.slots[id.idx as usize]
            .take()
            .expect("validated slot is occupied");
        self.generation[id.idx as usize] += 1;
        self.free_list.push(id.idx);
        if self.overlay == Some(id) {
            self.overlay = None;
        }
        if graphic.was_visible() {
            self.dirty.merge_rect(graphic.last_postrot_rect());
        }
        graphic
    }

    /// Access to an added graphic.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn get(&self, id: GraphicId) -> &Graphic<S> {
        self.validate(id);
        self.slots[id.idx as usize]
            .as_ref()
            .expect("validated slot is occupied")
    }

    /// Returns whether the handle refers to a graphic still in this
    /// compositor.
    #[must_use]
    pub fn is_alive(&self, id: GraphicId) -> bool {
        (id.idx as usize) < self.slots.len()
            && self.generation[id.idx as usize] == id.generation
            && self.slots[id.idx as usize].is_some()
    }

    fn validate(&self, id: GraphicId) {
        assert!(self.is_alive(id), "stale {id:?}");
    }

    /// Installs a graphic as the overlay, drawn in front of every
    /// layer. Replaces (and removes) any previous overlay.
    ///
    /// The graphic's layer is cleared while it is the overlay; give it a
    /// layer again before re-adding it as an ordinary member.
    pub fn set_overlay(&mut self, graphic: &Graphic<S>) -> GraphicId {
        if let Some(old) = self.overlay.take() {
            let _ = self.remove(old);
        }
        graphic.clear_layer();
        let id = self.insert(graphic.clone());
        self.overlay = Some(id);
        id
    }

    /// The current overlay graphic, if any.
    #[must_use]
    pub fn overlay(&self) -> Option<&Graphic<S>> {
        self.overlay.map(|id| self.get(id))
    }

    /// Removes and returns the overlay, if any.
    pub fn take_overlay(&mut self) -> Option<Graphic<S>> {
        let id = self.overlay.take()?;
        Some(self.remove(id))
    }

    /// Marks target areas as needing a repaint regardless of graphic
    /// state (e.g. after the target was modified externally).
    pub fn dirty(&mut self, rects: &[Rect]) {
        for r in rects {
            self.dirty.merge_rect(*r);
        }
    }

    /// Marks the whole target as needing a repaint.
    pub fn dirty_all(&mut self) {
        self.dirty.merge(DirtyRegion::Full);
    }

    /// Repaints changed areas of the target.
    ///
    /// Returns the disjoint target rects that changed (empty if nothing
    /// did). The same areas are marked dirty on [`Compositor::graphic`]
    /// so enclosing compositors pick them up.
    pub fn draw(&mut self) -> Vec<Rect> {
        self.draw_traced(&mut Tracer::none())
    }

    /// [`Compositor::draw`] with trace events.
    pub fn draw_traced(&mut self, tracer: &mut Tracer<'_>) -> Vec<Rect> {
        let draw_index = self.draw_index;
        self.draw_index += 1;
        let (tw, th) = self.target_size();
        let bounds = Rect::new(0, 0, tw, th);

        // Group members by layer, overlay first (front-most paints
        // last); insertion order within a layer is kept.
        let mut members: Vec<(LayerKey, GraphicId, Graphic<S>)> = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(g) = slot {
                let key = g.layer().map_or(LayerKey::Overlay, LayerKey::Normal);
                let id = GraphicId {
                    idx: u32::try_from(idx).expect("slot index fits in u32"),
                    generation: self.generation[idx],
                };
                members.push((key, id, g.clone()));
            }
        }
        members.sort_by_key(|(key, ..)| *key);
        let mut layers: Vec<(LayerKey, Vec<(GraphicId, Graphic<S>)>)> = Vec::new();
        for (key, id, g) in members {
            match layers.last_mut() {
                Some((last, gs)) if *last == key => gs.push((id, g)),
                _ => layers.push((key, alloc::vec![(id, g)])),
            }
        }
        tracer.draw_begin(&DrawBeginEvent {
            draw_index,
            graphics: self.len(),
            layers: layers.len(),
        });

        // Gather changed screen areas from every member.
        let mut dirty: Vec<Rect> = self.dirty.take().into_rects(bounds);
        for (_, gs) in &layers {
            for (id, g) in gs {
                let mut g_dirty = g.pre_draw();
                let visible = g.is_visible();
                let was = g.was_visible();
                if visible != was {
                    // Appeared or disappeared: its whole area changed.
                    g_dirty.clear();
                    g_dirty.push(if visible {
                        g.cached_postrot_rect()
                    } else {
                        g.last_postrot_rect()
                    });
                }
                tracer.graphic_prepared(&GraphicPreparedEvent {
                    draw_index,
                    id: *id,
                    dirty_rects: g_dirty.len(),
                    visible,
                });
                if was {
                    let lr = g.last_postrot_rect();
                    dirty.extend(
                        g_dirty
                            .iter()
                            .map(|r| r.clip(&lr))
                            .filter(|r| !r.is_empty()),
                    );
                }
                if visible {
                    let pr = g.cached_postrot_rect();
                    dirty.extend(
                        g_dirty
                            .iter()
                            .map(|r| r.clip(&pr))
                            .filter(|r| !r.is_empty()),
                    );
                }
                g.set_was_visible(visible);
            }
        }
        dirty = dirty
            .into_iter()
            .map(|r| r.clip(&bounds))
            .filter(|r| !r.is_empty())
            .collect();
        if dirty.is_empty() {
            tracer.draw_end(&DrawEndEvent {
                draw_index,
                changed_rects: 0,
            });
            return Vec::new();
        }

        // Front to back: drop the parts of each layer's work that lie
        // under opaque graphics in front of it.
        let mut opaque: Vec<Rect> = Vec::new();
        let mut dirty_by_layer: Vec<Vec<Rect>> = Vec::with_capacity(layers.len());
        for (_, gs) in &layers {
            let mut layer_opaque = Vec::new();
            for r in &dirty {
                // Coverage is per graphic: each visible member hides the
                // part of the rect it opaquely covers, independently of
                // what else shares the layer.
                for (_, g) in gs {
                    if !g.is_visible() {
                        continue;
                    }
                    let piece = r.clip(&g.cached_postrot_rect());
                    if !piece.is_empty() && g.opaque_in(piece) {
                        layer_opaque.push(piece);
                    }
                }
            }
            // A layer is never culled by its own opacity.
            dirty_by_layer.push(disjoint_difference(&dirty, &opaque));
            opaque.extend(layer_opaque);
        }

        // Back to front: repaint the surviving areas.
        self.base.edit_orig(|target| {
            for (i, (key, gs)) in layers.iter().enumerate().rev() {
                let rs = &dirty_by_layer[i];
                for (_, g) in gs {
                    if !g.is_visible() {
                        continue;
                    }
                    let pr = g.cached_postrot_rect();
                    let draw_in: Vec<Rect> = rs
                        .iter()
                        .map(|r| r.clip(&pr))
                        .filter(|r| !r.is_empty())
                        .collect();
                    if !draw_in.is_empty() {
                        g.draw(target, &draw_in);
                    }
                }
                tracer.layer_painted(&LayerPaintedEvent {
                    draw_index,
                    layer: *key,
                    rects: rs.len(),
                });
            }
        });

        let all: Vec<Rect> = dirty_by_layer.into_iter().flatten().collect();
        let changed = disjoint_difference(&all, &[]);
        tracer.draw_end(&DrawEndEvent {
            draw_index,
            changed_rects: changed.len(),
        });
        #[cfg(feature = "trace-rich")]
        {
            let damage: Vec<crate::trace::DamageRect> = changed
                .iter()
                .map(|r| crate::trace::DamageRect {
                    x: r.x,
                    y: r.y,
                    width: u32::try_from(r.w).unwrap_or(0),
                    height: u32::try_from(r.h).unwrap_or(0),
                })
                .collect();
            tracer.damage_rects(draw_index, &damage);
        }
        if !changed.is_empty() {
            self.base.dirty(&changed);
        }
        changed
    }

    /// Draws, then returns the up-to-date target surface.
    pub fn composed(&mut self) -> alloc::rc::Rc<S> {
        let _ = self.draw();
        self.base.orig_surface()
    }
}

impl<S: Surface> Drawable for Compositor<S> {
    fn prepare(&mut self) -> Vec<Rect> {
        self.draw()
    }
}
