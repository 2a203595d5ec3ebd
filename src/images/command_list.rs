// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend-neutral command recording.
//!
//! A [`CommandList`] is reset at the start of each presented frame, filled in a strict order,
//! closed, and handed to [`crate::imp::Queue::execute`].  Backends replay the recorded
//! [`Command`]s in order; there is no reordering.

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::{ResourceState, StateTracker, Subresource};
use crate::images::viewport::{Rect, Viewport};
use crate::imp::{BufferId, Footprint, PipelineId, ResourceId};

/// A resource bound to a pipeline binding slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Texture(DescriptorHandle),
    StorageTexture(DescriptorHandle),
    Sampler(DescriptorHandle),
    ConstantBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        resource: ResourceId,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders unordered-access writes against later reads of the same resource.
    UavBarrier { resource: ResourceId },
    CopyBufferToTexture {
        buffer: BufferId,
        footprint: Footprint,
        texture: ResourceId,
        mip: u32,
    },
    SetPipeline(PipelineId),
    SetRenderTarget {
        view: DescriptorHandle,
        width: u32,
        height: u32,
    },
    ClearRenderTarget {
        view: DescriptorHandle,
        color: [f32; 4],
    },
    SetViewport(Viewport),
    SetScissor(Rect),
    Bind { binding: u32, resource: Binding },
    SetVertexBuffer {
        buffer: BufferId,
        offset: u64,
        stride: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Closed,
    Recording,
}

#[derive(Debug)]
pub struct CommandList {
    label: String,
    state: ListState,
    commands: Vec<Command>,
    dump: bool,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        CommandList {
            label: label.into(),
            state: ListState::Closed,
            commands: Vec::new(),
            dump: false,
        }
    }

    /// Log every command when the list closes.
    pub fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Discards previous commands and starts recording.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.state = ListState::Recording;
    }

    pub fn close(&mut self) -> Result<(), Error> {
        if self.state != ListState::Recording {
            return Err(Error::NotRecording);
        }
        self.state = ListState::Closed;
        if self.dump {
            logwise::info_sync!(
                "{label}: {commands}",
                label = self.label.clone(),
                commands = logwise::privacy::LogIt(&self.commands)
            );
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.state == ListState::Recording
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn record(&mut self, command: Command) -> Result<(), Error> {
        if self.state != ListState::Recording {
            return Err(Error::NotRecording);
        }
        self.commands.push(command);
        Ok(())
    }

    /**
    Transitions `sub` of `resource` to `after`, updating `tracker`.

    Subresources already in `after` are skipped.  Illegal edges fail with
    [`Error::InvalidTransition`] without recording anything.
    */
    pub fn transition(
        &mut self,
        resource: ResourceId,
        tracker: &mut StateTracker,
        sub: Subresource,
        after: ResourceState,
    ) -> Result<(), Error> {
        if self.state != ListState::Recording {
            return Err(Error::NotRecording);
        }
        let levels: Vec<u32> = match sub {
            Subresource::All => (0..tracker.mip_levels()).collect(),
            Subresource::Mip(m) => vec![m],
        };
        for &level in &levels {
            let before = tracker.mip(level);
            if before != after && !before.can_transition_to(after) {
                return Err(Error::InvalidTransition { before, after });
            }
        }
        match (sub, tracker.uniform()) {
            (Subresource::All, Some(before)) => {
                if before != after {
                    self.commands.push(Command::Barrier {
                        resource,
                        subresource: Subresource::All,
                        before,
                        after,
                    });
                }
            }
            _ => {
                for level in levels {
                    let before = tracker.mip(level);
                    if before != after {
                        self.commands.push(Command::Barrier {
                            resource,
                            subresource: Subresource::Mip(level),
                            before,
                            after,
                        });
                    }
                }
            }
        }
        tracker.set(sub, after);
        Ok(())
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_while_open() {
        let mut list = CommandList::new("test");
        assert!(matches!(
            list.record(Command::Dispatch { x: 1, y: 1, z: 1 }),
            Err(Error::NotRecording)
        ));
        list.reset();
        list.record(Command::Dispatch { x: 1, y: 1, z: 1 }).unwrap();
        list.close().unwrap();
        assert!(list.close().is_err());
        assert_eq!(list.commands().len(), 1);
        list.reset();
        assert!(list.commands().is_empty());
    }

    #[test]
    fn transition_validates_graph() {
        let mut list = CommandList::new("test");
        list.reset();
        let mut tracker = StateTracker::new(1, ResourceState::CopyDest);
        let err = list.transition(ResourceId(1), &mut tracker, Subresource::All, ResourceState::Present);
        assert!(matches!(err, Err(Error::InvalidTransition { .. })));
        assert_eq!(tracker.mip(0), ResourceState::CopyDest);
        assert!(list.commands().is_empty());

        list.transition(ResourceId(1), &mut tracker, Subresource::All, ResourceState::ShaderRead)
            .unwrap();
        // already there: nothing recorded
        list.transition(ResourceId(1), &mut tracker, Subresource::All, ResourceState::ShaderRead)
            .unwrap();
        assert_eq!(list.commands().len(), 1);
    }

    #[test]
    fn mixed_mips_get_per_level_barriers() {
        let mut list = CommandList::new("test");
        list.reset();
        let mut tracker = StateTracker::new(3, ResourceState::ShaderRead);
        list.transition(ResourceId(2), &mut tracker, Subresource::Mip(1), ResourceState::UnorderedAccess)
            .unwrap();
        list.transition(ResourceId(2), &mut tracker, Subresource::All, ResourceState::ShaderRead)
            .unwrap();
        assert_eq!(
            list.commands()[1],
            Command::Barrier {
                resource: ResourceId(2),
                subresource: Subresource::Mip(1),
                before: ResourceState::UnorderedAccess,
                after: ResourceState::ShaderRead,
            }
        );
        assert_eq!(list.commands().len(), 2);
    }
}
