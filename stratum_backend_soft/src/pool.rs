// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed sharing of loaded surfaces.
//!
//! Graphics clone their source surface cheaply through `Rc`, so any
//! number of graphics can present the same image without copying it.
//! [`ResourcePool`] is the keyed front for that: load (or build) a
//! surface once under a name, and hand out shared handles afterwards.

use std::collections::HashMap;
use std::rc::Rc;

use crate::PixelSurface;

/// A keyed cache of shared surfaces.
#[derive(Clone, Debug, Default)]
pub struct ResourcePool {
    entries: HashMap<String, Rc<PixelSurface>>,
}

impl ResourcePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pooled surfaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores a surface under a key, returning the shared handle.
    /// Replaces any previous entry for the key.
    pub fn insert(&mut self, key: impl Into<String>, surface: PixelSurface) -> Rc<PixelSurface> {
        let rc = Rc::new(surface);
        self.entries.insert(key.into(), Rc::clone(&rc));
        rc
    }

    /// The pooled surface for a key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Rc<PixelSurface>> {
        self.entries.get(key).map(Rc::clone)
    }

    /// The pooled surface for a key, building and pooling it on a miss.
    pub fn get_or_insert_with(
        &mut self,
        key: &str,
        build: impl FnOnce() -> PixelSurface,
    ) -> Rc<PixelSurface> {
        if let Some(rc) = self.entries.get(key) {
            return Rc::clone(rc);
        }
        self.insert(key, build())
    }

    /// Drops a key's entry; existing handles stay valid.
    pub fn remove(&mut self, key: &str) -> Option<Rc<PixelSurface>> {
        self.entries.remove(key)
    }

    /// Drops every entry nothing outside the pool still holds.
    pub fn prune(&mut self) {
        self.entries.retain(|_, rc| Rc::strong_count(rc) > 1);
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::surface::{Rgba, Surface};

    #[test]
    fn get_or_insert_builds_once() {
        let mut pool = ResourcePool::new();
        let mut builds = 0;
        let first = pool.get_or_insert_with("tile", || {
            builds += 1;
            PixelSurface::solid((4, 4), Rgba::rgb(9, 9, 9))
        });
        let second = pool.get_or_insert_with("tile", || {
            builds += 1;
            PixelSurface::new((1, 1), true)
        });
        assert_eq!(builds, 1);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn insert_replaces() {
        let mut pool = ResourcePool::new();
        pool.insert("a", PixelSurface::new((1, 1), false));
        pool.insert("a", PixelSurface::new((2, 2), false));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("a").map(|s| s.size()), Some((2, 2)));
    }

    #[test]
    fn prune_keeps_shared_entries() {
        let mut pool = ResourcePool::new();
        let held = pool.insert("held", PixelSurface::new((1, 1), false));
        pool.insert("loose", PixelSurface::new((1, 1), false));
        pool.prune();
        assert_eq!(pool.len(), 1);
        assert!(pool.get("held").is_some());
        drop(held);
    }
}
