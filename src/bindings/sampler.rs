// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Sampler state and the shared sampler table.

use crate::Error;
use crate::bindings::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::imp::{Device, ViewDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

impl FilterMode {
    pub fn from_smooth(smooth: bool) -> Self {
        if smooth {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    ClampToBorder,
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

impl WrapMode {
    pub const ALL: [WrapMode; 4] = [
        WrapMode::ClampToBorder,
        WrapMode::ClampToEdge,
        WrapMode::Repeat,
        WrapMode::MirroredRepeat,
    ];

    /// Parses the preset spelling (`clamp_to_border`, `repeat`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clamp_to_border" => Some(WrapMode::ClampToBorder),
            "clamp_to_edge" => Some(WrapMode::ClampToEdge),
            "repeat" => Some(WrapMode::Repeat),
            "mirrored_repeat" => Some(WrapMode::MirroredRepeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub wrap: WrapMode,
    /// Sample between mip levels as well.
    pub mipmapped: bool,
}

/**
Every filter × wrap sampler, allocated once in the sampler heap.

Shader passes and sprites pick a sampler by `(filter, wrap)` instead of creating their own.
*/
#[derive(Debug)]
pub struct SamplerTable {
    // [filter][wrap]
    slots: [[DescriptorHandle; 4]; 2],
    mipmapped: [[DescriptorHandle; 4]; 2],
}

impl SamplerTable {
    pub(crate) fn new(device: &mut dyn Device, heap: &mut DescriptorHeap) -> Result<Self, Error> {
        let mut make = |filter: FilterMode, wrap: WrapMode, mipmapped: bool| {
            let handle = heap.allocate()?;
            device.write_descriptor(
                handle,
                &ViewDescriptor::Sampler(SamplerDescriptor {
                    filter,
                    wrap,
                    mipmapped,
                }),
            )?;
            Ok::<_, Error>(handle)
        };
        let mut row = |filter: FilterMode, mipmapped: bool| -> Result<[DescriptorHandle; 4], Error> {
            Ok([
                make(filter, WrapMode::ClampToBorder, mipmapped)?,
                make(filter, WrapMode::ClampToEdge, mipmapped)?,
                make(filter, WrapMode::Repeat, mipmapped)?,
                make(filter, WrapMode::MirroredRepeat, mipmapped)?,
            ])
        };
        let slots = [row(FilterMode::Nearest, false)?, row(FilterMode::Linear, false)?];
        let mipmapped = [row(FilterMode::Nearest, true)?, row(FilterMode::Linear, true)?];
        Ok(SamplerTable { slots, mipmapped })
    }

    pub fn get(&self, filter: FilterMode, wrap: WrapMode) -> DescriptorHandle {
        self.slots[filter as usize][wrap as usize]
    }

    pub fn get_mipmapped(&self, filter: FilterMode, wrap: WrapMode) -> DescriptorHandle {
        self.mipmapped[filter as usize][wrap as usize]
    }

    pub(crate) fn lookup(&self, desc: SamplerDescriptor) -> DescriptorHandle {
        if desc.mipmapped {
            self.get_mipmapped(desc.filter, desc.wrap)
        } else {
            self.get(desc.filter, desc.wrap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrap_modes() {
        assert_eq!(WrapMode::parse("repeat"), Some(WrapMode::Repeat));
        assert_eq!(WrapMode::parse("mirrored_repeat"), Some(WrapMode::MirroredRepeat));
        assert_eq!(WrapMode::parse("wobble"), None);
    }

    #[test]
    fn wrap_discriminants_index_the_table() {
        for (i, w) in WrapMode::ALL.iter().enumerate() {
            assert_eq!(*w as usize, i);
        }
    }
}
