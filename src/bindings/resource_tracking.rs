// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Resource state tracking for GPU resources.
//!
//! Every GPU resource is in exactly one [`ResourceState`] per subresource.  Moving between
//! states requires a barrier in the command list, and only the edges listed in
//! [`ResourceState::can_transition_to`] are legal.  The graph is deliberately narrower than what
//! most APIs accept: a resource that was just copied into must be read or rendered before it can
//! be presented, for example.
//!
//! | From            | Legal destinations                                         |
//! |-----------------|------------------------------------------------------------|
//! | Undefined       | anything                                                   |
//! | ShaderRead      | RenderTarget, CopyDest, CopySource, UnorderedAccess        |
//! | RenderTarget    | ShaderRead, CopySource, Present                            |
//! | CopyDest        | ShaderRead, RenderTarget, CopySource                       |
//! | CopySource      | ShaderRead, RenderTarget, CopyDest, Present                |
//! | UnorderedAccess | ShaderRead                                                 |
//! | Present         | RenderTarget, CopySource                                   |

use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    ShaderRead,
    RenderTarget,
    CopyDest,
    CopySource,
    UnorderedAccess,
    Present,
}

impl ResourceState {
    pub fn can_transition_to(self, after: ResourceState) -> bool {
        use ResourceState::*;
        match (self, after) {
            (_, Undefined) => false,
            (a, b) if a == b => false,
            (Undefined, _) => true,
            (ShaderRead, RenderTarget | CopyDest | CopySource | UnorderedAccess) => true,
            (RenderTarget, ShaderRead | CopySource | Present) => true,
            (CopyDest, ShaderRead | RenderTarget | CopySource) => true,
            (CopySource, ShaderRead | RenderTarget | CopyDest | Present) => true,
            (UnorderedAccess, ShaderRead) => true,
            (Present, RenderTarget | CopySource) => true,
            _ => false,
        }
    }
}

/// Which part of a resource a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subresource {
    All,
    Mip(u32),
}

/**
Per-mip state of one resource.

The tracker is the single owner of a resource's state; barriers are only emitted through it, so
the `before` half of every barrier is correct by construction.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct StateTracker {
    mips: Vec<ResourceState>,
}

impl StateTracker {
    pub fn new(mip_levels: u32, initial: ResourceState) -> Self {
        StateTracker {
            mips: vec![initial; mip_levels.max(1) as usize],
        }
    }

    pub fn mip(&self, level: u32) -> ResourceState {
        self.mips[level as usize]
    }

    pub fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    /// The shared state when all mips agree.
    pub fn uniform(&self) -> Option<ResourceState> {
        let first = self.mips[0];
        self.mips.iter().all(|s| *s == first).then_some(first)
    }

    pub(crate) fn set(&mut self, sub: Subresource, state: ResourceState) {
        match sub {
            Subresource::All => self.mips.iter_mut().for_each(|m| *m = state),
            Subresource::Mip(level) => self.mips[level as usize] = state,
        }
    }
}

impl Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.uniform() {
            Some(state) => write!(f, "StateTracker({:?} x{})", state, self.mips.len()),
            None => f.debug_list().entries(self.mips.iter()).finish(),
        }
    }
}
