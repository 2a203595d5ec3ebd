// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Defines binding types: descriptor heaps, samplers, resource states and usage declarations. */

pub mod descriptor_heap;
pub mod resource_tracking;
pub mod sampler;
pub mod visible_to;

pub use descriptor_heap::{DescriptorHandle, DescriptorHeap, HeapKind};
pub use resource_tracking::ResourceState;
