// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The input frame and the frames before it.

[`FrameHistory`] keeps N+1 textures: slot 0 is the frame being shaded, slot k the frame from k
frames ago.  Advancing moves handles, never pixels: the oldest texture is recycled into slot 0
and the new frame is uploaded over it.

```
use framechain::images::history::HistoryRing;

let mut ring = HistoryRing::new(vec!["a", "b", "c"]);
assert_eq!(ring.advance("d"), "c");
assert_eq!(ring.get(0), Some(&"d"));
assert_eq!(ring.get(2), Some(&"b"));
```
*/

use crate::Error;
use crate::bindings::visible_to::{MipLevels, TextureConfig};
use crate::images::device::BoundDevice;
use crate::images::texture::Texture;
use crate::pixel_formats::PixelFormat;

/// A fixed-size ring where index 0 is the newest entry.
#[derive(Debug)]
pub struct HistoryRing<T> {
    slots: Vec<T>,
}

impl<T> HistoryRing<T> {
    pub fn new(slots: Vec<T>) -> Self {
        HistoryRing { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, k: usize) -> Option<&T> {
        self.slots.get(k)
    }

    pub fn get_mut(&mut self, k: usize) -> Option<&mut T> {
        self.slots.get_mut(k)
    }

    /// Puts `new` in slot 0, moves every entry one slot older, and returns the one pushed out.
    pub fn advance(&mut self, new: T) -> T {
        self.slots.rotate_right(1);
        std::mem::replace(&mut self.slots[0], new)
    }

    /// Moves the oldest entry into slot 0 so it can be overwritten in place.
    pub fn recycle(&mut self) {
        if !self.slots.is_empty() {
            self.slots.rotate_right(1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.slots.drain(..)
    }
}

/// What the ring's textures look like; any change means a full re-init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HistoryShape {
    depth: u32,
    width: u32,
    height: u32,
    format: PixelFormat,
    mips: MipLevels,
}

#[derive(Debug, Default)]
pub struct FrameHistory {
    ring: Option<HistoryRing<Texture>>,
    shape: Option<HistoryShape>,
}

impl FrameHistory {
    pub fn new() -> Self {
        FrameHistory::default()
    }

    /// Number of previous frames kept (N).
    pub fn depth(&self) -> u32 {
        self.shape.map(|s| s.depth).unwrap_or(0)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.shape.map(|s| (s.width, s.height))
    }

    /**
    Makes sure the ring has `depth + 1` slots of the given shape.

    Returns `true` when the ring was (re)created.  All slots are released and recreated together;
    a ring with mixed sizes is never observable.
    */
    pub fn ensure(
        &mut self,
        device: &mut BoundDevice,
        depth: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        mips: MipLevels,
    ) -> Result<bool, Error> {
        let shape = HistoryShape {
            depth,
            width,
            height,
            format,
            mips,
        };
        if self.shape == Some(shape) && self.ring.is_some() {
            return Ok(false);
        }
        self.release(device);
        let mut slots = Vec::with_capacity(depth as usize + 1);
        for k in 0..=depth {
            let config = TextureConfig::new(format!("history {k}"), width, height, format).with_mips(mips);
            match Texture::create(device, &config) {
                Ok(t) => slots.push(t),
                Err(e) => {
                    for mut t in slots {
                        t.release(device);
                    }
                    return Err(e);
                }
            }
        }
        logwise::info_sync!(
            "History ring {width}x{height} with {depth} previous frames",
            width = width,
            height = height,
            depth = depth
        );
        self.ring = Some(HistoryRing::new(slots));
        self.shape = Some(shape);
        Ok(true)
    }

    /// Rotates so slot 0 holds the texture the next frame will be uploaded into.
    pub fn advance(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.recycle();
        }
    }

    /// Slot 0.
    pub fn current(&self) -> Option<&Texture> {
        self.slot(0)
    }

    pub fn current_mut(&mut self) -> Option<&mut Texture> {
        self.ring.as_mut().and_then(|r| r.get_mut(0))
    }

    /// The frame from `k` frames ago.  Slots beyond the depth fall back to the oldest.
    pub fn slot(&self, k: u32) -> Option<&Texture> {
        let ring = self.ring.as_ref()?;
        let k = (k as usize).min(ring.len().saturating_sub(1));
        ring.get(k)
    }

    pub fn textures(&self) -> impl Iterator<Item = &Texture> {
        self.ring.iter().flat_map(|r| r.iter())
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        if let Some(mut ring) = self.ring.take() {
            for mut t in ring.drain() {
                t.release(device);
            }
        }
        self.shape = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::device::HeapCapacities;
    use crate::imp::headless::HeadlessBackend;

    #[test]
    fn n_plus_one_advances_fill_the_ring_in_order() {
        let n = 4usize;
        let mut ring = HistoryRing::new(vec![usize::MAX; n + 1]);
        for i in 0..=n {
            ring.advance(i);
        }
        for k in 0..=n {
            assert_eq!(ring.get(k), Some(&(n - k)));
        }
    }

    #[test]
    fn recycle_reuses_the_oldest_handle() {
        let mut ring = HistoryRing::new(vec![0, 1, 2]);
        ring.recycle();
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 0, 1]);
    }

    #[test]
    fn rotation_moves_textures_not_pixels() {
        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut history = FrameHistory::new();
        assert!(history.ensure(&mut device, 2, 8, 8, PixelFormat::Rgba8Unorm, MipLevels::One).unwrap());
        assert!(!history.ensure(&mut device, 2, 8, 8, PixelFormat::Rgba8Unorm, MipLevels::One).unwrap());
        let ids: Vec<_> = history.textures().map(|t| t.resource()).collect();
        history.advance();
        assert_eq!(history.slot(0).unwrap().resource(), ids[2]);
        assert_eq!(history.slot(1).unwrap().resource(), ids[0]);
        assert_eq!(history.slot(9).unwrap().resource(), ids[1]);
        history.release(&mut device);
    }

    #[test]
    fn resize_recreates_every_slot() {
        let backend = HeadlessBackend::new(64, 64);
        let probe = backend.probe();
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut history = FrameHistory::new();
        history.ensure(&mut device, 1, 8, 8, PixelFormat::Rgba8Unorm, MipLevels::One).unwrap();
        let live = probe.stats().live_textures;
        assert!(history.ensure(&mut device, 1, 16, 8, PixelFormat::Rgba8Unorm, MipLevels::One).unwrap());
        assert_eq!(probe.stats().live_textures, live);
        assert!(history.textures().all(|t| t.size() == (16, 8)));
        history.release(&mut device);
    }
}
