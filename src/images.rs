// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! The rendering component of framechain: textures, the pass chain and the present loop. */

pub use device::BoundDevice;
pub use engine::{Collaborators, Engine};

pub mod command_list;
pub mod device;
pub mod engine;
pub mod texture;
pub mod mipmap;
pub mod history;

pub mod preset;
pub mod shader;
pub mod uniforms;
pub mod quad;
pub mod pass_chain;

pub mod sprites;
pub mod font;
pub mod overlay;
pub mod hdr;
pub mod viewport;
pub mod image_loader;
mod stock_shaders;

pub mod port;
