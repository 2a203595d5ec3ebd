// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Fixed-capacity slot allocation for shader-visible descriptors.
//!
//! Each heap is an occupancy bitmap plus a "next free" cursor.  Allocation is first-fit
//! starting at the cursor; releasing a slot below the cursor rewinds it, so textures that are
//! released and recreated with the same shape tend to land in the same low slots.

use crate::Error;

/// Which heap a descriptor lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeapKind {
    /// Shader-resource and unordered-access views.
    ShaderResource,
    RenderTarget,
    Sampler,
}

/// A slot in a [`DescriptorHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle {
    pub heap: HeapKind,
    pub index: u32,
}

#[derive(Debug)]
pub struct DescriptorHeap {
    kind: HeapKind,
    occupied: Vec<bool>,
    cursor: u32,
    live: u32,
}

impl DescriptorHeap {
    pub fn new(kind: HeapKind, capacity: u32) -> Self {
        DescriptorHeap {
            kind,
            occupied: vec![false; capacity as usize],
            cursor: 0,
            live: 0,
        }
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.occupied.len() as u32
    }

    /// Number of slots currently allocated.
    pub fn live(&self) -> u32 {
        self.live
    }

    /**
    Allocates the first free slot at or after the cursor.

    Returns [`Error::HeapExhausted`] when every slot is taken.  Slots before the cursor are
    always occupied (the cursor only moves past occupied slots and rewinds on release), so the
    scan never needs to wrap.
    */
    pub fn allocate(&mut self) -> Result<DescriptorHandle, Error> {
        let start = self.cursor as usize;
        match self.occupied[start..].iter().position(|o| !o) {
            Some(offset) => {
                let index = start + offset;
                self.occupied[index] = true;
                self.cursor = index as u32 + 1;
                self.live += 1;
                Ok(DescriptorHandle {
                    heap: self.kind,
                    index: index as u32,
                })
            }
            None => {
                logwise::warn_sync!(
                    "Descriptor heap {heap} exhausted",
                    heap = logwise::privacy::LogIt(&self.kind)
                );
                Err(Error::HeapExhausted {
                    heap: self.kind,
                    capacity: self.capacity(),
                })
            }
        }
    }

    /// Returns a slot to the heap.  Releasing a free slot, or a slot from another heap, does nothing.
    pub fn release(&mut self, handle: DescriptorHandle) {
        if handle.heap != self.kind {
            logwise::warn_sync!(
                "Descriptor {handle} released to the wrong heap",
                handle = logwise::privacy::LogIt(&handle)
            );
            return;
        }
        let Some(slot) = self.occupied.get_mut(handle.index as usize) else {
            return;
        };
        if !*slot {
            return;
        }
        *slot = false;
        self.live -= 1;
        if handle.index < self.cursor {
            self.cursor = handle.index;
        }
    }

    pub fn is_live(&self, handle: DescriptorHandle) -> bool {
        handle.heap == self.kind
            && self
                .occupied
                .get(handle.index as usize)
                .copied()
                .unwrap_or(false)
    }
}

/// The three heaps a device needs, with their capacities fixed at init.
#[derive(Debug)]
pub struct DescriptorHeaps {
    pub shader_resource: DescriptorHeap,
    pub render_target: DescriptorHeap,
    pub sampler: DescriptorHeap,
}

impl DescriptorHeaps {
    pub fn new(shader_resource: u32, render_target: u32, sampler: u32) -> Self {
        DescriptorHeaps {
            shader_resource: DescriptorHeap::new(HeapKind::ShaderResource, shader_resource),
            render_target: DescriptorHeap::new(HeapKind::RenderTarget, render_target),
            sampler: DescriptorHeap::new(HeapKind::Sampler, sampler),
        }
    }

    pub fn get_mut(&mut self, kind: HeapKind) -> &mut DescriptorHeap {
        match kind {
            HeapKind::ShaderResource => &mut self.shader_resource,
            HeapKind::RenderTarget => &mut self.render_target,
            HeapKind::Sampler => &mut self.sampler,
        }
    }

    pub fn release(&mut self, handle: DescriptorHandle) {
        self.get_mut(handle.heap).release(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_until_exhausted() {
        let mut heap = DescriptorHeap::new(HeapKind::ShaderResource, 3);
        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        let c = heap.allocate().unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert!(matches!(
            heap.allocate(),
            Err(Error::HeapExhausted { capacity: 3, .. })
        ));
        assert_eq!(heap.live(), 3);
    }

    #[test]
    fn release_rewinds_cursor() {
        let mut heap = DescriptorHeap::new(HeapKind::ShaderResource, 8);
        let handles: Vec<_> = (0..8).map(|_| heap.allocate().unwrap()).collect();
        for h in &handles {
            heap.release(*h);
        }
        assert_eq!(heap.live(), 0);
        let again: Vec<_> = (0..8).map(|_| heap.allocate().unwrap().index).collect();
        assert_eq!(again, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn reuses_lowest_freed_slot() {
        let mut heap = DescriptorHeap::new(HeapKind::RenderTarget, 8);
        let handles: Vec<_> = (0..5).map(|_| heap.allocate().unwrap()).collect();
        heap.release(handles[3]);
        heap.release(handles[1]);
        assert_eq!(heap.allocate().unwrap().index, 1);
        assert_eq!(heap.allocate().unwrap().index, 3);
        assert_eq!(heap.allocate().unwrap().index, 5);
    }

    #[test]
    fn double_release_is_noop() {
        let mut heap = DescriptorHeap::new(HeapKind::Sampler, 2);
        let a = heap.allocate().unwrap();
        let _b = heap.allocate().unwrap();
        heap.release(a);
        heap.release(a);
        assert_eq!(heap.live(), 1);
        let c = heap.allocate().unwrap();
        assert_eq!(c, a);
        assert!(heap.allocate().is_err());
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut heap = DescriptorHeap::new(HeapKind::ShaderResource, 4);
        let mut live = Vec::new();
        for round in 0..32u32 {
            if round % 3 == 2 {
                if let Some(h) = live.pop() {
                    heap.release(h);
                }
            } else if let Ok(h) = heap.allocate() {
                assert!(!live.contains(&h));
                live.push(h);
            }
            assert!(heap.live() <= heap.capacity());
            assert_eq!(heap.live() as usize, live.len());
        }
    }

    #[test]
    fn foreign_handles_are_ignored() {
        let mut heaps = DescriptorHeaps::new(2, 2, 2);
        let rtv = heaps.render_target.allocate().unwrap();
        heaps.shader_resource.release(rtv);
        assert!(heaps.render_target.is_live(rtv));
        heaps.release(rtv);
        assert!(!heaps.render_target.is_live(rtv));
    }

    #[test]
    fn handles_sort_by_heap_then_index() {
        let mut heaps = DescriptorHeaps::new(4, 4, 4);
        let sampler = heaps.sampler.allocate().unwrap();
        let srv_first = heaps.shader_resource.allocate().unwrap();
        let rtv = heaps.render_target.allocate().unwrap();
        let srv_second = heaps.shader_resource.allocate().unwrap();
        let sorted: std::collections::BTreeSet<_> = [sampler, srv_first, rtv, srv_second].into_iter().collect();
        let order: Vec<_> = sorted.into_iter().collect();
        assert_eq!(order, vec![srv_first, srv_second, rtv, sampler]);
    }
}
