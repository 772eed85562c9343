// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end pixel tests: the compositing core driving [`PixelSurface`].

use std::rc::Rc;

use stratum_backend_soft::PixelSurface;
use stratum_core::compositor::{Compositor, Drawable};
use stratum_core::graphic::Graphic;
use stratum_core::rect::Rect;
use stratum_core::surface::{BlendMode, Rgba, Surface};

const BLUE: Rgba = Rgba::rgb(0, 0, 255);
const RED: Rgba = Rgba::rgb(255, 0, 0);
const GREEN: Rgba = Rgba::rgb(0, 255, 0);

fn sprite(size: (i32, i32), colour: Rgba, pos: (i32, i32)) -> Graphic<PixelSurface> {
    Graphic::new(PixelSurface::solid(size, colour), pos)
}

fn area(rects: &[Rect]) -> i64 {
    rects.iter().map(|r| i64::from(r.w) * i64::from(r.h)).sum()
}

fn covers(rects: &[Rect], x: i32, y: i32) -> bool {
    rects
        .iter()
        .any(|r| x >= r.x && x < r.right() && y >= r.y && y < r.bottom())
}

/// A 16x16 compositor with an opaque blue background on layer 1.
fn scene() -> Compositor<PixelSurface> {
    let mut c = Compositor::new(PixelSurface::new((16, 16), false), (0, 0));
    let bg = sprite((16, 16), BLUE, (0, 0));
    bg.set_layer(1);
    c.add(&bg).unwrap();
    c
}

fn pixel(c: &mut Compositor<PixelSurface>, x: i32, y: i32) -> Rgba {
    c.composed().pixel(x, y)
}

#[test]
fn first_draw_composes_the_scene() {
    let mut c = scene();
    c.add(&sprite((4, 4), RED, (2, 2))).unwrap();
    let changed = c.draw();
    assert_eq!(area(&changed), 256);
    assert_eq!(pixel(&mut c, 0, 0), BLUE);
    assert_eq!(pixel(&mut c, 2, 2), RED);
    assert_eq!(pixel(&mut c, 5, 5), RED);
    assert_eq!(pixel(&mut c, 6, 6), BLUE);
}

#[test]
fn redraw_without_changes_is_empty() {
    let mut c = scene();
    c.add(&sprite((4, 4), RED, (2, 2))).unwrap();
    let _ = c.draw();
    assert!(c.draw().is_empty());
}

#[test]
fn move_repaints_exactly_the_two_areas() {
    let mut c = scene();
    let s = sprite((4, 4), RED, (2, 2));
    c.add(&s).unwrap();
    let _ = c.draw();

    s.move_to(10, 10);
    let changed = c.draw();
    assert_eq!(area(&changed), 32, "old area plus new area");
    assert!(covers(&changed, 2, 2));
    assert!(covers(&changed, 10, 10));
    assert!(!covers(&changed, 7, 7));
    // Background restored behind the old position.
    assert_eq!(pixel(&mut c, 2, 2), BLUE);
    assert_eq!(pixel(&mut c, 10, 10), RED);
}

#[test]
fn overlapping_move_repaints_the_union() {
    let mut c = scene();
    let s = sprite((10, 10), RED, (0, 0));
    c.add(&s).unwrap();
    let _ = c.draw();

    s.move_by(1, 0);
    let changed = c.draw();
    // Old and new rects overlap; the repaint is exactly their union.
    assert_eq!(area(&changed), 110);
    for r in &changed {
        assert!(Rect::new(0, 0, 11, 10).contains_rect(r), "{r:?} in union");
    }
    assert!(covers(&changed, 0, 5), "vacated column repainted");
    assert!(covers(&changed, 10, 5), "newly covered column repainted");
    assert_eq!(pixel(&mut c, 0, 5), BLUE);
    assert_eq!(pixel(&mut c, 1, 5), RED);
    assert_eq!(pixel(&mut c, 10, 5), RED);
}

#[test]
fn blend_mode_switch_repaints_without_motion() {
    let mut c = scene();
    let s = sprite((4, 4), GREEN, (2, 2));
    s.set_blend_mode(BlendMode::Multiply);
    c.add(&s).unwrap();
    let _ = c.draw();
    // Green multiplied into the blue background goes black.
    assert_eq!(pixel(&mut c, 3, 3), Rgba::rgb(0, 0, 0));

    s.set_blend_mode(BlendMode::SourceOver);
    let changed = c.draw();
    assert_eq!(area(&changed), 16, "whole sprite repaints");
    assert!(covers(&changed, 2, 2));
    assert_eq!(pixel(&mut c, 3, 3), GREEN);
}

#[test]
fn front_layer_wins_in_overlap_regardless_of_insertion_order() {
    for front_first in [true, false] {
        let mut c = scene();
        let front = sprite((4, 4), RED, (4, 4));
        let back = sprite((4, 4), GREEN, (6, 6));
        back.set_layer(0);
        front.set_layer(-1);
        if front_first {
            c.add(&front).unwrap();
            c.add(&back).unwrap();
        } else {
            c.add(&back).unwrap();
            c.add(&front).unwrap();
        }
        let _ = c.draw();
        assert_eq!(pixel(&mut c, 6, 6), RED, "front_first={front_first}");
        assert_eq!(pixel(&mut c, 8, 8), GREEN);
        assert_eq!(pixel(&mut c, 1, 1), BLUE);
    }
}

#[test]
fn overlay_draws_in_front_of_layer_zero() {
    let mut c = scene();
    let member = sprite((4, 4), GREEN, (0, 0));
    member.set_layer(-5);
    c.add(&member).unwrap();
    let hud = sprite((2, 2), RED, (0, 0));
    c.set_overlay(&hud);
    let _ = c.draw();
    assert_eq!(pixel(&mut c, 0, 0), RED);
    assert_eq!(pixel(&mut c, 3, 3), GREEN);
}

#[test]
fn removal_restores_the_background() {
    let mut c = scene();
    let id = c.add(&sprite((4, 4), RED, (2, 2))).unwrap();
    let _ = c.draw();
    let _ = c.remove(id);
    let changed = c.draw();
    assert_eq!(area(&changed), 16);
    assert_eq!(pixel(&mut c, 3, 3), BLUE);
}

#[test]
fn hiding_repaints_what_was_behind() {
    let mut c = scene();
    let s = sprite((4, 4), RED, (2, 2));
    c.add(&s).unwrap();
    let _ = c.draw();
    s.set_visible(false);
    let _ = c.draw();
    assert_eq!(pixel(&mut c, 3, 3), BLUE);
    s.set_visible(true);
    let _ = c.draw();
    assert_eq!(pixel(&mut c, 3, 3), RED);
}

#[test]
fn opacity_blends_with_the_background() {
    let mut c = scene();
    let s = sprite((4, 4), RED, (2, 2));
    s.set_opacity(128);
    c.add(&s).unwrap();
    let _ = c.draw();
    let px = pixel(&mut c, 3, 3);
    // Red at 128/255 coverage over opaque blue.
    assert_eq!(px.r, 128);
    assert_eq!(px.g, 0);
    assert_eq!(px.b, 127);
    assert_eq!(px.a, 255);
}

#[test]
fn tint_multiplies_member_pixels() {
    let mut c = scene();
    let s = sprite((4, 4), Rgba::rgb(255, 255, 255), (2, 2));
    s.tint(Rgba::rgb(255, 0, 0));
    c.add(&s).unwrap();
    let _ = c.draw();
    assert_eq!(pixel(&mut c, 3, 3), RED);
}

#[test]
fn crop_composites_only_the_window() {
    let mut c = scene();
    let mut two_tone = PixelSurface::solid((8, 4), RED);
    two_tone.fill(GREEN, Some(Rect::new(4, 0, 4, 4)));
    let s = Graphic::new(two_tone, (0, 0));
    s.crop(Rect::new(4, 0, 4, 4));
    c.add(&s).unwrap();
    let _ = c.draw();
    // The corner moves with the window, so surviving pixels keep their
    // screen location; the red half is simply gone.
    assert_eq!(s.rect(), Rect::new(4, 0, 4, 4));
    assert_eq!(pixel(&mut c, 4, 0), GREEN);
    assert_eq!(pixel(&mut c, 7, 3), GREEN);
    assert_eq!(pixel(&mut c, 0, 0), BLUE);
    assert_eq!(pixel(&mut c, 8, 0), BLUE);
}

#[test]
fn quarter_rotation_composites_exactly() {
    let mut c = scene();
    let mut bar = PixelSurface::solid((4, 2), RED);
    bar.fill(GREEN, Some(Rect::new(2, 0, 2, 2)));
    let s = Graphic::new(bar, (0, 1));
    s.rotate(std::f64::consts::FRAC_PI_2);
    c.add(&s).unwrap();
    let _ = c.draw();
    // Counterclockwise about the centre: the green right half ends up on
    // top, and the taller bounding box re-centres over the old rect.
    assert_eq!(s.postrot_rect(), Rect::new(1, 0, 2, 4));
    assert_eq!(pixel(&mut c, 1, 0), GREEN);
    assert_eq!(pixel(&mut c, 1, 3), RED);
    assert_eq!(pixel(&mut c, 0, 0), BLUE);
}

#[test]
fn nested_compositor_feeds_the_outer_scene() {
    let mut inner = Compositor::new(PixelSurface::new((8, 8), false), (4, 4));
    let inner_bg = sprite((8, 8), GREEN, (0, 0));
    inner_bg.set_layer(1);
    inner.add(&inner_bg).unwrap();
    let s = sprite((2, 2), RED, (1, 1));
    inner.add(&s).unwrap();

    let mut outer = scene();
    outer.add(inner.graphic()).unwrap();

    let _ = inner.prepare();
    let _ = outer.draw();
    assert_eq!(pixel(&mut outer, 4, 4), GREEN);
    assert_eq!(pixel(&mut outer, 5, 5), RED);
    assert_eq!(pixel(&mut outer, 13, 13), BLUE);

    // Incremental: a change inside the inner scene flows through.
    s.move_to(5, 5);
    let _ = inner.prepare();
    let changed = outer.draw();
    assert!(!changed.is_empty());
    assert!(covers(&changed, 5, 5), "old sprite area repainted");
    assert!(covers(&changed, 9, 9), "new sprite area repainted");
    assert_eq!(pixel(&mut outer, 5, 5), GREEN);
    assert_eq!(pixel(&mut outer, 9, 9), RED);
}

#[test]
fn composed_returns_a_shared_surface() {
    let mut c = scene();
    let first = c.composed();
    let second = c.composed();
    assert!(Rc::ptr_eq(&first, &second), "no change, no copy");
}
