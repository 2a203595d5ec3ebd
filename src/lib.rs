// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! framechain drives multi-pass video shader chains on the GPU.

A frontend hands it one decoded frame at a time.  framechain uploads the frame into a history
ring, runs it through a chain of shader passes described by a preset, composites the result into
a letterboxed viewport, draws menus, overlays and on-screen text on top, and presents it with the
configured pacing.

Here is how the pieces fit together:

| Piece              | Module                                   | Owns                                                  |
|--------------------|------------------------------------------|-------------------------------------------------------|
| Descriptor heaps   | [`bindings::descriptor_heap`]            | Fixed-capacity slot tables for views and samplers    |
| Textures           | [`images::texture`]                      | GPU texture, staging buffer, views, per-mip states    |
| Frame history      | [`images::history`]                      | The last N+1 input frames                            |
| Pass chain         | [`images::pass_chain`]                   | Compiled passes, render targets, feedback, LUTs      |
| Present loop       | [`images::port`]                         | Swapchain views, the command list, repeat scheduling |
| Overlay scene      | [`images::overlay`], [`images::sprites`] | Menu, overlays, text and the sprite ring buffer      |
| Driver             | [`images::Engine`]                       | All of the above, plus the runtime hooks             |

# Frames in flight

framechain keeps exactly one frame in flight.  Before recording frame N+1 the present loop waits
for the fence of frame N, and every operation that replaces resources a frame may reference
(loading a preset, resizing, unloading textures) waits for the GPU to go idle first.  This trades
CPU/GPU overlap for the guarantee that nothing in flight is ever freed.

# Failure policy

Resource exhaustion degrades locally: a pass whose render target could not be created breaks
the chain for that frame, and the last good output is shown.  Shader compile failures are
returned from [`images::Engine::set_shader`] while the previous chain keeps running.  Device
failures are returned from [`images::Engine::new`].  See [`Error`].

# Backends

Backends implement [`Device`], [`Queue`] and [`Swapchain`].  [`headless::HeadlessBackend`]
records what it is asked to do without a GPU and is what the tests run on.  With the
`backend_wgpu` feature (on by default), `wgpu_backend::WgpuBackend` renders through
[wgpu](https://wgpu.rs), and `wgpu_backend::WgslCompiler` reflects WGSL pass sources with naga.
*/

pub mod bindings;
pub mod config;
mod error;
pub mod images;
mod imp;
pub mod pixel_formats;

pub use error::Error;
pub use imp::headless;
#[cfg(feature = "backend_wgpu")]
pub use imp::wgpu as wgpu_backend;
pub use imp::{
    Backend, BindingKind, BindingLayout, BlendMode, BufferDescriptor, BufferId, COPY_PITCH_ALIGNMENT, Device,
    Footprint, PipelineDescriptor, PipelineId, PipelineKind, Queue, ResourceId, ShaderCode, ShaderStage,
    Swapchain, TextureDescriptor, Topology, VertexLayout, ViewDescriptor,
};
