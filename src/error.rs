// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Crate-wide error type.

use crate::bindings::descriptor_heap::HeapKind;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::visible_to::FormatSupport;
use crate::pixel_formats::PixelFormat;

/**
Everything that can go wrong while orchestrating GPU resources.

Errors fall into three families:

| Family              | Variants                                                   | Who handles it                           |
|---------------------|------------------------------------------------------------|------------------------------------------|
| Resource exhaustion | [`Error::HeapExhausted`], [`Error::OutOfMemory`]           | recovered locally, the stage is "broken" |
| Shader failure      | [`Error::ShaderCompile`], [`Error::Preset`]                | surfaced from `set_shader`               |
| Device failure      | [`Error::Device`], [`Error::Swapchain`], [`Error::FenceTimeout`] | surfaced from initialization or `frame` |

A missing pixel format is normally substituted silently; [`Error::FormatUnsupported`] is only
raised when no format in the fallback list satisfies the requested capabilities.
*/
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{heap:?} descriptor heap exhausted ({capacity} slots)")]
    HeapExhausted { heap: HeapKind, capacity: u32 },
    #[error("out of GPU memory creating {0}")]
    OutOfMemory(String),
    #[error("no supported format for {requested:?} with {required:?}")]
    FormatUnsupported {
        requested: PixelFormat,
        required: FormatSupport,
    },
    #[error("shader pass {pass} failed to compile: {message}")]
    ShaderCompile { pass: usize, message: String },
    #[error("shader preset: {0}")]
    Preset(String),
    #[error("device: {0}")]
    Device(String),
    #[error("swapchain: {0}")]
    Swapchain(String),
    #[error("timed out waiting for fence value {0}")]
    FenceTimeout(u64),
    #[error("invalid resource transition {before:?} -> {after:?}")]
    InvalidTransition {
        before: ResourceState,
        after: ResourceState,
    },
    #[error("command list is not recording")]
    NotRecording,
    #[error("unknown resource {0}")]
    UnknownResource(String),
    #[error("image decode: {0}")]
    Image(#[from] png::DecodingError),
    #[error("unsupported image layout: {0}")]
    ImageLayout(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /**
    True for errors that the pipeline recovers from by marking the affected stage broken
    instead of failing the frame.
    */
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Error::HeapExhausted { .. } | Error::OutOfMemory(_))
    }

    /// True for errors that indicate the device itself is unusable.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Error::Device(_) | Error::Swapchain(_) | Error::FenceTimeout(_)
        )
    }
}
