// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Positioned, transformable graphics.
//!
//! A [`Graphic`] pairs an original surface with a transform [`Chain`] and
//! a screen position. Transform mutators ([`Graphic::rescale`],
//! [`Graphic::crop`], and friends) update geometry immediately but defer
//! pixel work until [`Graphic::render`], which a compositor calls once
//! per frame.
//!
//! Cloning a handle shares everything. [`Graphic::view`] shares the
//! pixel pipeline but gives the new handle its own position, visibility,
//! and layer, so one rendered image can appear in several places; each
//! viewing handle receives change tracking independently.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::chain::{
    Chain, Dim, Insert, ResizeSpec, SizeChange, StageArgs, StageFn, StageName,
};
use crate::error::UnknownStageError;
use crate::rect::{Anchor, Rect};
use crate::region::DirtyRegion;
use crate::surface::{BlendMode, Rgba, Surface};

/// A change notification delivered to registered callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The final surface's content changed without the surface itself
    /// being replaced.
    Draw,
    /// The original surface's content was marked changed.
    DrawOrig,
    /// The final surface was replaced by a different one.
    Change,
    /// The original surface was replaced by a different one.
    ChangeOrig,
    /// The final size changed.
    Resize {
        /// Size before the change.
        old: (i32, i32),
        /// Size after the change.
        new: (i32, i32),
    },
    /// The original size changed.
    ResizeOrig {
        /// Size before the change.
        old: (i32, i32),
        /// Size after the change.
        new: (i32, i32),
    },
}

/// Event category, for registering callbacks against a subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Matches [`Event::Draw`].
    Draw,
    /// Matches [`Event::DrawOrig`].
    DrawOrig,
    /// Matches [`Event::Change`].
    Change,
    /// Matches [`Event::ChangeOrig`].
    ChangeOrig,
    /// Matches [`Event::Resize`].
    Resize,
    /// Matches [`Event::ResizeOrig`].
    ResizeOrig,
}

impl Event {
    /// This event's category.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Draw => EventKind::Draw,
            Self::DrawOrig => EventKind::DrawOrig,
            Self::Change => EventKind::Change,
            Self::ChangeOrig => EventKind::ChangeOrig,
            Self::Resize { .. } => EventKind::Resize,
            Self::ResizeOrig { .. } => EventKind::ResizeOrig,
        }
    }
}

/// Identifies a registered callback for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallbackId(u64);

type Callback = Box<dyn FnMut(&Event)>;

struct CbEntry {
    filter: Option<Vec<EventKind>>,
    cb: Callback,
}

/// Callback storage, kept outside the graphic state so callbacks can
/// call back into the graphic while they run.
#[derive(Default)]
struct Registry {
    entries: BTreeMap<u64, CbEntry>,
    next: u64,
    firing: bool,
    pending_rm: Vec<u64>,
}

impl Registry {
    fn add(&mut self, filter: Option<Vec<EventKind>>, cb: Callback) -> CallbackId {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, CbEntry { filter, cb });
        CallbackId(id)
    }

    fn remove(&mut self, id: CallbackId) {
        if self.firing {
            self.pending_rm.push(id.0);
        } else {
            self.entries.remove(&id.0);
        }
    }
}

fn fire(reg: &Rc<RefCell<Registry>>, event: &Event) {
    // Entries are taken out while firing so callbacks can register and
    // remove without hitting a borrowed registry. Removals are deferred;
    // registrations land in the emptied map and are merged back after.
    let mut taken = {
        let mut r = reg.borrow_mut();
        if r.entries.is_empty() {
            return;
        }
        r.firing = true;
        core::mem::take(&mut r.entries)
    };
    let kind = event.kind();
    for entry in taken.values_mut() {
        let matches = entry
            .filter
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind));
        if matches {
            (entry.cb)(event);
        }
    }
    let mut r = reg.borrow_mut();
    r.firing = false;
    taken.append(&mut r.entries);
    r.entries = taken;
    for id in core::mem::take(&mut r.pending_rm) {
        r.entries.remove(&id);
    }
}

/// State shared by every handle to the same image: the pixel pipeline.
struct Visual<S: Surface> {
    orig: Rc<S>,
    surface: Rc<S>,
    chain: Chain<S>,
    geom: crate::chain::GeomState,
    orig_dirty: DirtyRegion,
    opaque: bool,
    // Change tracking fanned out to viewing handles: `seq` counts renders
    // that changed pixels, `last_dirty` is the most recent one's region.
    seq: u64,
    last_dirty: DirtyRegion,
}

/// State owned per viewing handle: placement and visibility.
struct ViewState {
    pos: (i32, i32),
    // The shared geometry offset this handle has already folded into
    // `pos`; transform offsets move every handle by their delta.
    seen_offset: (i32, i32),
    visible: bool,
    was_visible: bool,
    layer: Option<i32>,
    blend_mode: BlendMode,
    // Mode as of the last draw; a difference repaints the whole rect.
    last_blend_mode: BlendMode,
    seen_seq: u64,
    last_rect: Rect,
    postrot_rect: Rect,
    last_postrot_rect: Rect,
}

/// A transformable graphic at a position.
///
/// Cheap to clone; clones share all state. See the [module
/// documentation](self) for the handle model.
pub struct Graphic<S: Surface> {
    visual: Rc<RefCell<Visual<S>>>,
    events: Rc<RefCell<Registry>>,
    state: Rc<RefCell<ViewState>>,
}

impl<S: Surface> Clone for Graphic<S> {
    fn clone(&self) -> Self {
        Self {
            visual: self.visual.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: Surface> core::fmt::Debug for Graphic<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Graphic")
            .field("pos", &st.pos)
            .field("visible", &st.visible)
            .field("layer", &st.layer)
            .finish_non_exhaustive()
    }
}

impl<S: Surface> Graphic<S> {
    /// Creates a graphic from a surface, on layer 0.
    pub fn new(surface: S, pos: (i32, i32)) -> Self {
        let size = surface.size();
        let orig = Rc::new(surface);
        let opaque = !orig.has_alpha();
        let rect = Rect::from_pos_size(pos, size);
        Self {
            visual: Rc::new(RefCell::new(Visual {
                surface: orig.clone(),
                orig,
                chain: Chain::new(),
                geom: crate::chain::GeomState::new(size),
                orig_dirty: DirtyRegion::None,
                opaque,
                seq: 0,
                last_dirty: DirtyRegion::None,
            })),
            events: Rc::new(RefCell::new(Registry::default())),
            state: Rc::new(RefCell::new(ViewState {
                pos,
                seen_offset: (0, 0),
                visible: true,
                was_visible: false,
                layer: Some(0),
                blend_mode: BlendMode::SourceOver,
                last_blend_mode: BlendMode::SourceOver,
                seen_seq: 0,
                last_rect: rect,
                postrot_rect: rect,
                last_postrot_rect: rect,
            })),
        }
    }

    /// A new handle onto the same image with its own position,
    /// visibility, and layer.
    ///
    /// The view starts at this handle's position and layer. Transforms
    /// and original-surface changes made through either handle affect
    /// both.
    #[must_use]
    pub fn view(&self) -> Self {
        let (st, v) = (self.state.borrow(), self.visual.borrow());
        let rect = Rect::from_pos_size(st.pos, v.geom.size);
        Self {
            visual: self.visual.clone(),
            events: self.events.clone(),
            state: Rc::new(RefCell::new(ViewState {
                pos: st.pos,
                seen_offset: st.seen_offset,
                visible: st.visible,
                was_visible: false,
                layer: st.layer,
                blend_mode: st.blend_mode,
                last_blend_mode: st.blend_mode,
                seen_seq: v.seq,
                last_rect: rect,
                postrot_rect: rect,
                last_postrot_rect: rect,
            })),
        }
    }

    /// Returns `true` if both handles view the same image.
    #[must_use]
    pub fn shares_image_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.visual, &other.visual)
    }

    /// Returns `true` if both are clones of the same handle (same
    /// position and visibility state, not merely the same image).
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    // placement

    /// Fold any new transform offset into this handle's position.
    fn sync_pos(geom: &crate::chain::GeomState, st: &mut ViewState) {
        let total = geom.total_offset();
        st.pos.0 += total.0 - st.seen_offset.0;
        st.pos.1 += total.1 - st.seen_offset.1;
        st.seen_offset = total;
    }

    /// The on-screen rect before rotation.
    #[must_use]
    pub fn rect(&self) -> Rect {
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        Self::sync_pos(&v.geom, &mut st);
        Rect::from_pos_size(st.pos, v.geom.size)
    }

    /// The top-left position (before rotation).
    #[must_use]
    pub fn pos(&self) -> (i32, i32) {
        self.rect().pos()
    }

    /// The current (pre-rotation) size.
    #[must_use]
    pub fn size(&self) -> (i32, i32) {
        self.visual.borrow().geom.size
    }

    /// The size of the original surface, before any transforms.
    #[must_use]
    pub fn orig_size(&self) -> (i32, i32) {
        self.visual.borrow().orig.size()
    }

    /// Moves the top-left to an absolute position.
    pub fn move_to(&self, x: i32, y: i32) {
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        Self::sync_pos(&v.geom, &mut st);
        st.pos = (x, y);
    }

    /// Moves by an offset.
    pub fn move_by(&self, dx: i32, dy: i32) {
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        Self::sync_pos(&v.geom, &mut st);
        st.pos.0 += dx;
        st.pos.1 += dy;
    }

    /// The on-screen rect actually drawn, including rotation.
    ///
    /// Applies any queued transforms first.
    #[must_use]
    pub fn postrot_rect(&self) -> Rect {
        self.render();
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        Self::sync_pos(&v.geom, &mut st);
        Rect::from_pos_size(
            (
                st.pos.0 + v.geom.rot_offset.0,
                st.pos.1 + v.geom.rot_offset.1,
            ),
            v.surface.size(),
        )
    }

    /// Whether this handle should be drawn.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    /// Shows or hides this handle (other handles are unaffected).
    pub fn set_visible(&self, visible: bool) {
        self.state.borrow_mut().visible = visible;
    }

    /// This handle's layer, or `None` while it is a compositor overlay.
    ///
    /// Lower layers draw in front of higher ones.
    #[must_use]
    pub fn layer(&self) -> Option<i32> {
        self.state.borrow().layer
    }

    /// Sets this handle's layer.
    pub fn set_layer(&self, layer: i32) {
        self.state.borrow_mut().layer = Some(layer);
    }

    pub(crate) fn clear_layer(&self) {
        self.state.borrow_mut().layer = None;
    }

    /// How this handle's pixels combine with what is already drawn.
    #[must_use]
    pub fn blend_mode(&self) -> BlendMode {
        self.state.borrow().blend_mode
    }

    /// Sets this handle's blend mode. The pixels are unchanged but every
    /// one composites differently, so the whole graphic redraws.
    pub fn set_blend_mode(&self, mode: BlendMode) {
        self.state.borrow_mut().blend_mode = mode;
    }

    // geometry attributes

    /// The point kept fixed when the graphic resizes.
    #[must_use]
    pub fn anchor(&self) -> Anchor {
        self.visual.borrow().geom.anchor
    }

    /// Sets the resize anchor and re-applies any resize around it.
    pub fn set_anchor(&self, anchor: Anchor) {
        let change = {
            let mut v = self.visual.borrow_mut();
            v.geom.anchor = anchor;
            let args = v.chain.last_args(&StageName::Resize).cloned();
            let orig_size = v.orig.size();
            let Visual { chain, geom, .. } = &mut *v;
            args.map(|args| chain.apply(geom, orig_size, StageName::Resize, args))
        };
        if let Some(change) = change {
            self.after_size_change(change);
        }
    }

    /// The point kept fixed when the graphic rotates.
    #[must_use]
    pub fn rot_anchor(&self) -> Anchor {
        self.visual.borrow().geom.rot_anchor
    }

    /// Sets the rotation anchor; takes effect on the next render.
    pub fn set_rot_anchor(&self, anchor: Anchor) {
        let mut v = self.visual.borrow_mut();
        v.geom.rot_anchor = anchor;
        if v.chain.is_applied(&StageName::Rotate) {
            v.geom.must_apply_rot = true;
        }
    }

    /// The smallest angle change treated as a rotation, in radians.
    #[must_use]
    pub fn rotate_threshold(&self) -> f64 {
        self.visual.borrow().geom.rotate_threshold
    }

    /// Sets the rotation threshold.
    pub fn set_rotate_threshold(&self, threshold: f64) {
        self.visual.borrow_mut().geom.rotate_threshold = threshold;
    }

    /// Current scale ratios.
    #[must_use]
    pub fn scale(&self) -> (f64, f64) {
        self.visual.borrow().geom.scale
    }

    /// Current crop window, if cropped.
    #[must_use]
    pub fn crop_window(&self) -> Option<Rect> {
        self.visual.borrow().geom.crop_window
    }

    /// Current `(x, y)` mirror flags.
    #[must_use]
    pub fn flipped(&self) -> (bool, bool) {
        self.visual.borrow().geom.flipped
    }

    /// Current tint colour.
    #[must_use]
    pub fn tint_colour(&self) -> Rgba {
        self.visual.borrow().geom.tint_colour
    }

    /// Current opacity (the tint colour's alpha).
    #[must_use]
    pub fn opacity(&self) -> u8 {
        self.visual.borrow().geom.tint_colour.a
    }

    /// Current rotation angle, counterclockwise in radians.
    #[must_use]
    pub fn angle(&self) -> f64 {
        self.visual.borrow().geom.angle
    }

    // surfaces

    /// The surface before any transforms.
    #[must_use]
    pub fn orig_surface(&self) -> Rc<S> {
        self.visual.borrow().orig.clone()
    }

    /// The transformed surface used for drawing.
    ///
    /// Applies any queued transforms first.
    #[must_use]
    pub fn surface(&self) -> Rc<S> {
        self.render();
        self.visual.borrow().surface.clone()
    }

    /// Replaces the original surface.
    ///
    /// If the size differs, the position moves to keep the anchor point
    /// fixed and every transform's geometry is recomputed.
    pub fn set_orig_surface(&self, surface: S) {
        let mut events = Vec::new();
        {
            let mut v = self.visual.borrow_mut();
            let new_size = surface.size();
            let old_size = v.orig.size();
            let old_final = v.geom.size;
            v.orig = Rc::new(surface);
            if new_size != old_size {
                let Visual { chain, geom, .. } = &mut *v;
                chain.undo_all(geom);
                let old_a = geom.anchor.resolve(old_size);
                let new_a = geom.anchor.resolve(new_size);
                geom.base_shift.0 += old_a.0 - new_a.0;
                geom.base_shift.1 += old_a.1 - new_a.1;
                geom.size = new_size;
                chain.reapply_all(geom, new_size);
                events.push(Event::ResizeOrig {
                    old: old_size,
                    new: new_size,
                });
                if v.geom.size != old_final {
                    events.push(Event::Resize {
                        old: old_final,
                        new: v.geom.size,
                    });
                }
            }
            v.orig_dirty.merge(DirtyRegion::Full);
            events.push(Event::ChangeOrig);
        }
        for e in events {
            fire(&self.events, &e);
        }
    }

    /// Marks areas of the original surface as changed.
    ///
    /// Use after mutating the original surface in place; an empty slice
    /// marks the whole surface.
    pub fn dirty(&self, rects: &[Rect]) {
        {
            let mut v = self.visual.borrow_mut();
            if rects.is_empty() {
                v.orig_dirty.merge(DirtyRegion::Full);
            } else {
                for r in rects {
                    v.orig_dirty.merge_rect(*r);
                }
            }
        }
        fire(&self.events, &Event::DrawOrig);
    }

    // transforms

    /// Applies a builtin stage in its current chain position.
    ///
    /// # Panics
    ///
    /// Panics if given [`StageArgs::Custom`]; custom stages are applied
    /// with [`Graphic::apply_custom_stage`].
    pub fn apply_stage(&self, args: StageArgs) {
        let change = {
            let mut v = self.visual.borrow_mut();
            let orig_size = v.orig.size();
            let name = builtin_name(&args);
            let Visual { chain, geom, .. } = &mut *v;
            chain.apply(geom, orig_size, name, args)
        };
        self.after_size_change(change);
    }

    /// Applies a builtin stage at an explicit chain position.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStageError`] if the position names a stage that
    /// is not in the chain.
    ///
    /// # Panics
    ///
    /// Panics if given [`StageArgs::Custom`].
    pub fn apply_stage_at(
        &self,
        args: StageArgs,
        insert: Insert,
    ) -> Result<(), UnknownStageError> {
        let change = {
            let mut v = self.visual.borrow_mut();
            let orig_size = v.orig.size();
            let name = builtin_name(&args);
            let Visual { chain, geom, .. } = &mut *v;
            chain.apply_at(geom, orig_size, name, args, insert)?
        };
        self.after_size_change(change);
        Ok(())
    }

    /// Applies a custom stage, replacing its function if it is already
    /// in the chain.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStageError`] if the position names a stage that
    /// is not in the chain.
    pub fn apply_custom_stage(
        &self,
        name: &str,
        func: StageFn<S>,
        insert: Insert,
    ) -> Result<(), UnknownStageError> {
        let change = {
            let mut v = self.visual.borrow_mut();
            let orig_size = v.orig.size();
            let Visual { chain, geom, .. } = &mut *v;
            chain.apply_custom(geom, orig_size, name, func, insert)?
        };
        self.after_size_change(change);
        Ok(())
    }

    /// Forces a stage to run again with its last arguments on the next
    /// render. Does nothing for stages that never ran.
    pub fn reapply_stage(&self, name: &StageName) {
        let mut v = self.visual.borrow_mut();
        let orig_size = v.orig.size();
        let Visual { chain, geom, .. } = &mut *v;
        chain.reapply(geom, orig_size, name);
    }

    /// Removes a stage from the chain, undoing its geometry.
    ///
    /// Returns the arguments the stage held, or `None` if it was never
    /// applied.
    pub fn remove_stage(&self, name: &StageName) -> Option<StageArgs> {
        let (args, change) = {
            let mut v = self.visual.borrow_mut();
            let orig_size = v.orig.size();
            let old = v.geom.size;
            let Visual { chain, geom, .. } = &mut *v;
            let args = chain.remove(geom, orig_size, name);
            let new = geom.size;
            (args, SizeChange { old, new })
        };
        self.after_size_change(change);
        args
    }

    /// The arguments a stage was last applied with, if any.
    #[must_use]
    pub fn last_stage_args(&self, name: &StageName) -> Option<StageArgs> {
        self.visual.borrow().chain.last_args(name).cloned()
    }

    /// Returns `true` if the stage has been applied.
    #[must_use]
    pub fn is_stage_applied(&self, name: &StageName) -> bool {
        self.visual.borrow().chain.is_applied(name)
    }

    /// The current stage order.
    #[must_use]
    pub fn stage_order(&self) -> Vec<StageName> {
        self.visual.borrow().chain.order().to_vec()
    }

    /// The surface size feeding the named stage, or `None` if it is not
    /// in the chain.
    #[must_use]
    pub fn size_before_stage(&self, name: &StageName) -> Option<(i32, i32)> {
        let v = self.visual.borrow();
        v.chain.size_before_stage(name, v.orig.size())
    }

    fn after_size_change(&self, change: SizeChange) {
        if change.changed() {
            fire(
                &self.events,
                &Event::Resize {
                    old: change.old,
                    new: change.new,
                },
            );
        }
    }

    /// Resizes to per-dimension targets.
    pub fn resize(&self, w: Dim, h: Dim) {
        self.apply_stage(StageArgs::Resize(ResizeSpec::Size { w, h }));
    }

    /// Resizes to an exact pixel size.
    pub fn resize_to(&self, size: (i32, i32)) {
        self.resize(Dim::Px(size.0), Dim::Px(size.1));
    }

    /// Scales by per-axis ratios of the current pre-resize size.
    pub fn rescale(&self, x: f64, y: f64) {
        self.apply_stage(StageArgs::Resize(ResizeSpec::Scale { x, y }));
    }

    /// Crops to a window, which need not lie within the surface.
    pub fn crop(&self, rect: Rect) {
        self.apply_stage(StageArgs::Crop(rect));
    }

    /// Mirrors across the vertical (`x`) and/or horizontal (`y`) axis.
    pub fn flip(&self, x: bool, y: bool) {
        self.apply_stage(StageArgs::Flip(x, y));
    }

    /// Multiplies the surface by a colour.
    pub fn tint(&self, colour: Rgba) {
        self.apply_stage(StageArgs::Tint(colour));
    }

    /// Sets opacity (0 transparent, 255 opaque) via the tint colour.
    pub fn set_opacity(&self, opacity: u8) {
        let colour = self.tint_colour().with_alpha(opacity);
        self.tint(colour);
    }

    /// Rotates counterclockwise by an angle in radians.
    pub fn rotate(&self, angle: f64) {
        self.apply_stage(StageArgs::Rotate(angle));
    }

    /// Replaces content with a solid colour of the current size.
    pub fn fill(&self, colour: Rgba) {
        self.apply_stage(StageArgs::Fill(colour));
    }

    // events

    /// Registers a callback for the given event kinds (all kinds if the
    /// slice is empty). Safe to call from inside a callback.
    pub fn on(&self, kinds: &[EventKind], cb: Callback) -> CallbackId {
        let filter = if kinds.is_empty() {
            None
        } else {
            Some(kinds.to_vec())
        };
        self.events.borrow_mut().add(filter, cb)
    }

    /// Removes a registered callback. Unknown ids are ignored.
    pub fn remove_callback(&self, id: CallbackId) {
        self.events.borrow_mut().remove(id);
    }

    // rendering and drawing

    /// Applies queued transforms and changes to the original surface,
    /// updating the final surface.
    pub fn render(&self) {
        let event = {
            let mut v = self.visual.borrow_mut();
            let orig_dirty = v.orig_dirty.take();
            let Visual {
                orig, chain, geom, ..
            } = &mut *v;
            let out = chain.render(orig, orig_dirty, geom);
            if out.dirty.is_none() {
                None
            } else {
                let changed = !Rc::ptr_eq(&v.surface, &out.surface);
                v.geom.size = out.before_rot_size;
                v.opaque = !out.surface.has_alpha();
                v.surface = out.surface;
                v.seq += 1;
                v.last_dirty = out.dirty;
                Some(if changed { Event::Change } else { Event::Draw })
            }
        };
        if let Some(e) = event {
            fire(&self.events, &e);
        }
    }

    /// Renders and returns this handle's changed screen areas since its
    /// last draw, in absolute coordinates. Called by the compositor
    /// before drawing; also refreshes the cached post-rotation rect.
    pub(crate) fn pre_draw(&self) -> Vec<Rect> {
        self.render();
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        Self::sync_pos(&v.geom, &mut st);

        // Pixel changes since this handle last drew.
        let mut dirty = if st.seen_seq == v.seq {
            DirtyRegion::None
        } else if st.seen_seq + 1 == v.seq {
            v.last_dirty.clone()
        } else {
            DirtyRegion::Full
        };
        st.seen_seq = v.seq;

        let rect = Rect::from_pos_size(st.pos, v.geom.size);
        st.postrot_rect = Rect::from_pos_size(
            (
                rect.x + v.geom.rot_offset.0,
                rect.y + v.geom.rot_offset.1,
            ),
            v.surface.size(),
        );
        if rect != st.last_rect {
            // Moved or resized: both old and new locations changed.
            dirty = DirtyRegion::Full;
        }
        st.last_rect = rect;
        if st.blend_mode != st.last_blend_mode {
            dirty = DirtyRegion::Full;
            st.last_blend_mode = st.blend_mode;
        }

        match dirty {
            DirtyRegion::None => Vec::new(),
            DirtyRegion::Full => alloc::vec![st.last_postrot_rect, st.postrot_rect],
            DirtyRegion::Rects(rects) => {
                let (px, py) = st.postrot_rect.pos();
                rects.into_iter().map(|r| r.translated(px, py)).collect()
            }
        }
    }

    /// The post-rotation rect as of the last [`Graphic::pre_draw`].
    pub(crate) fn cached_postrot_rect(&self) -> Rect {
        self.state.borrow().postrot_rect
    }

    pub(crate) fn last_postrot_rect(&self) -> Rect {
        self.state.borrow().last_postrot_rect
    }

    pub(crate) fn was_visible(&self) -> bool {
        self.state.borrow().was_visible
    }

    pub(crate) fn set_was_visible(&self, visible: bool) {
        self.state.borrow_mut().was_visible = visible;
    }

    /// Whether this handle's draw replaces every pixel in the rect. A
    /// multiply blit reads the destination, so it never counts.
    pub(crate) fn opaque_in(&self, rect: Rect) -> bool {
        let st = self.state.borrow();
        self.visual.borrow().opaque
            && matches!(st.blend_mode, BlendMode::SourceOver | BlendMode::Copy)
            && st.postrot_rect.contains_rect(&rect)
    }

    /// Mutates the original surface in place without marking dirt. The
    /// compositor pairs this with [`Graphic::dirty`] for the areas it
    /// actually repainted.
    pub(crate) fn edit_orig<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut v = self.visual.borrow_mut();
        f(Rc::make_mut(&mut v.orig))
    }

    /// Blits the given absolute screen rects onto `dest`. Must not
    /// change any graphic state other than draw bookkeeping.
    pub(crate) fn draw(&self, dest: &mut S, rects: &[Rect]) {
        let v = self.visual.borrow();
        let mut st = self.state.borrow_mut();
        let pr = st.postrot_rect;
        for r in rects {
            dest.blit(
                &v.surface,
                r.pos(),
                r.translated(-pr.x, -pr.y),
                st.blend_mode,
            );
        }
        st.last_postrot_rect = pr;
    }
}

/// The builtin stage the arguments belong to.
fn builtin_name(args: &StageArgs) -> StageName {
    match args {
        StageArgs::Crop(_) => StageName::Crop,
        StageArgs::Flip(..) => StageName::Flip,
        StageArgs::Tint(_) => StageName::Tint,
        StageArgs::Resize(_) => StageName::Resize,
        StageArgs::Rotate(_) => StageName::Rotate,
        StageArgs::Fill(_) => StageName::Fill,
        StageArgs::Custom => panic!("custom stages take a function"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsfc::TestSurface;
    use alloc::vec;

    fn graphic(size: (i32, i32), pos: (i32, i32)) -> Graphic<TestSurface> {
        Graphic::new(TestSurface::opaque(size), pos)
    }

    #[test]
    fn new_graphic_geometry() {
        let g = graphic((10, 6), (3, 4));
        assert_eq!(g.rect(), Rect::new(3, 4, 10, 6));
        assert_eq!(g.size(), (10, 6));
        assert_eq!(g.orig_size(), (10, 6));
        assert!(g.is_visible());
        assert_eq!(g.layer(), Some(0));
    }

    #[test]
    fn movement_is_per_handle() {
        let g = graphic((4, 4), (0, 0));
        let view = g.view();
        view.move_to(10, 10);
        g.move_by(1, 2);
        assert_eq!(g.pos(), (1, 2));
        assert_eq!(view.pos(), (10, 10));
        assert!(g.shares_image_with(&view));
    }

    #[test]
    fn transform_offset_moves_every_handle() {
        let g = graphic((10, 10), (5, 5));
        let view = g.view();
        view.move_to(100, 100);
        g.set_anchor(Anchor::Center);
        g.rescale(2.0, 2.0);
        // (1 - 2) * 5 = -5 shift on both handles.
        assert_eq!(g.rect(), Rect::new(0, 0, 20, 20));
        assert_eq!(view.rect(), Rect::new(95, 95, 20, 20));
    }

    #[test]
    fn crop_size_settles_on_render() {
        let g = graphic((10, 10), (0, 0));
        g.crop(Rect::new(2, 3, 5, 4));
        // The corner moves eagerly; the size catches up at render.
        assert_eq!(g.pos(), (2, 3));
        g.render();
        assert_eq!(g.rect(), Rect::new(2, 3, 5, 4));
        assert_eq!(g.crop_window(), Some(Rect::new(2, 3, 5, 4)));
    }

    #[test]
    fn surface_applies_queued_transforms() {
        let g = graphic((10, 10), (0, 0));
        g.rescale(3.0, 1.0);
        assert_eq!(g.surface().size(), (30, 10));
        assert_eq!(g.scale(), (3.0, 1.0));
    }

    #[test]
    fn set_orig_surface_keeps_anchor_fixed() {
        let g = graphic((10, 10), (0, 0));
        g.set_anchor(Anchor::BottomRight);
        g.set_orig_surface(TestSurface::opaque((4, 4)));
        // Bottom-right stays at (10, 10).
        assert_eq!(g.rect(), Rect::new(6, 6, 4, 4));
        assert_eq!(g.orig_size(), (4, 4));
    }

    #[test]
    fn resize_event_fires_on_size_change() {
        let g = graphic((10, 10), (0, 0));
        let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        g.on(
            &[EventKind::Resize],
            Box::new(move |e| sink.borrow_mut().push(*e)),
        );
        g.resize_to((20, 20));
        g.flip(true, false);
        assert_eq!(
            *seen.borrow(),
            vec![Event::Resize {
                old: (10, 10),
                new: (20, 20),
            }]
        );
    }

    #[test]
    fn callback_removal_inside_callback_is_deferred() {
        let g = graphic((4, 4), (0, 0));
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let handle: Rc<RefCell<Option<(Graphic<TestSurface>, CallbackId)>>> =
            Rc::new(RefCell::new(None));
        let h = handle.clone();
        let id = g.on(
            &[],
            Box::new(move |_| {
                *c.borrow_mut() += 1;
                if let Some((g, id)) = h.borrow_mut().take() {
                    g.remove_callback(id);
                }
            }),
        );
        *handle.borrow_mut() = Some((g.clone(), id));
        g.dirty(&[]);
        g.dirty(&[]);
        assert_eq!(*count.borrow(), 1, "callback removed itself after one call");
    }

    #[test]
    fn views_track_changes_independently() {
        let g = graphic((10, 10), (0, 0));
        let view = g.view();
        view.move_to(50, 0);
        assert_eq!(g.pre_draw(), vec![]);
        // The view moved since creation: old and new locations dirty.
        assert_eq!(
            view.pre_draw(),
            vec![Rect::new(0, 0, 10, 10), Rect::new(50, 0, 10, 10)]
        );

        g.dirty(&[Rect::new(1, 1, 2, 2)]);
        // Both handles report the change at their own location.
        assert_eq!(g.pre_draw(), vec![Rect::new(1, 1, 2, 2)]);
        assert_eq!(view.pre_draw(), vec![Rect::new(51, 1, 2, 2)]);
        // And only once.
        assert_eq!(g.pre_draw(), vec![]);
    }

    #[test]
    fn stale_view_falls_back_to_full() {
        let g = graphic((10, 10), (0, 0));
        let view = g.view();
        assert_eq!(view.pre_draw(), vec![]);
        // Two renders with changes while the view was not drawn.
        g.dirty(&[Rect::new(0, 0, 1, 1)]);
        g.render();
        g.dirty(&[Rect::new(2, 2, 1, 1)]);
        g.render();
        let rects = view.pre_draw();
        assert_eq!(rects, vec![Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)]);
    }

    #[test]
    fn blend_mode_change_forces_full_redraw() {
        let g = graphic((4, 4), (0, 0));
        assert_eq!(g.blend_mode(), BlendMode::SourceOver);
        assert_eq!(g.pre_draw(), vec![]);
        g.set_blend_mode(BlendMode::Multiply);
        // Same pixels, same rect, different compositing: all of it.
        assert_eq!(
            g.pre_draw(),
            vec![Rect::new(0, 0, 4, 4), Rect::new(0, 0, 4, 4)]
        );
        assert_eq!(g.pre_draw(), vec![], "reconciled after one draw pass");
    }

    #[test]
    fn blend_mode_is_per_handle() {
        let g = graphic((4, 4), (0, 0));
        let view = g.view();
        view.set_blend_mode(BlendMode::Multiply);
        assert_eq!(g.blend_mode(), BlendMode::SourceOver);
        assert_eq!(view.blend_mode(), BlendMode::Multiply);
        assert_eq!(g.pre_draw(), vec![], "only the changed handle redraws");
    }

    #[test]
    fn remove_stage_restores_geometry() {
        let g = graphic((10, 10), (0, 0));
        g.set_anchor(Anchor::Center);
        g.rescale(2.0, 2.0);
        assert_eq!(g.rect(), Rect::new(-5, -5, 20, 20));
        let args = g.remove_stage(&StageName::Resize);
        assert_eq!(
            args,
            Some(StageArgs::Resize(ResizeSpec::Scale { x: 2.0, y: 2.0 }))
        );
        assert_eq!(g.rect(), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn opacity_rides_the_tint_colour() {
        let g = graphic((4, 4), (0, 0));
        g.tint(Rgba::rgb(255, 0, 0));
        g.set_opacity(128);
        assert_eq!(g.tint_colour(), Rgba::new(255, 0, 0, 128));
        assert_eq!(g.opacity(), 128);
    }

    #[test]
    fn postrot_rect_covers_rotated_bounds() {
        let g = graphic((10, 10), (20, 20));
        g.rotate(core::f64::consts::FRAC_PI_4);
        assert_eq!(g.postrot_rect(), Rect::new(18, 18, 14, 14));
        assert_eq!(g.rect(), Rect::new(20, 20, 10, 10));
    }
}
