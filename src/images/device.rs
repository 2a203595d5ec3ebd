// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A backend bound to its descriptor heaps, samplers and fence.

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHeaps;
use crate::bindings::sampler::SamplerTable;
use crate::images::command_list::CommandList;
use crate::imp::Backend;
use std::time::Duration;

/// Capacities of the three descriptor heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapCapacities {
    pub shader_resource: u32,
    pub render_target: u32,
    pub sampler: u32,
}

impl Default for HeapCapacities {
    fn default() -> Self {
        HeapCapacities {
            shader_resource: 1024,
            render_target: 64,
            sampler: 32,
        }
    }
}

/**
A backend plus everything that lives exactly as long as it: descriptor heaps, the shared sampler
table, and the single submission fence.

There is one fence and one command submission unit per device.  [`BoundDevice::submit`] bumps
the fence value; [`BoundDevice::wait_for_previous`] blocks until the last submission completes.
*/
#[derive(Debug)]
pub struct BoundDevice {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) heaps: DescriptorHeaps,
    pub(crate) samplers: SamplerTable,
    fence_value: u64,
    fence_timeout: Option<Duration>,
}

impl BoundDevice {
    pub fn bind(
        mut backend: Box<dyn Backend>,
        capacities: HeapCapacities,
        fence_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let mut heaps = DescriptorHeaps::new(
            capacities.shader_resource,
            capacities.render_target,
            capacities.sampler,
        );
        let samplers = SamplerTable::new(backend.as_mut(), &mut heaps.sampler)?;
        logwise::info_sync!("Bound device {name}", name = backend.name());
        Ok(BoundDevice {
            backend,
            heaps,
            samplers,
            fence_value: 0,
            fence_timeout,
        })
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    pub fn heaps(&self) -> &DescriptorHeaps {
        &self.heaps
    }

    pub fn samplers(&self) -> &SamplerTable {
        &self.samplers
    }

    /// Fence value of the most recent submission.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Executes a closed list and signals a new fence value.
    pub fn submit(&mut self, list: &CommandList) -> Result<u64, Error> {
        self.backend.execute(list)?;
        self.fence_value += 1;
        self.backend.signal(self.fence_value)?;
        Ok(self.fence_value)
    }

    /// Blocks until the most recent submission has completed on the GPU.
    pub fn wait_for_previous(&mut self) -> Result<(), Error> {
        if self.backend.completed_value() >= self.fence_value {
            return Ok(());
        }
        let interval = logwise::perfwarn_begin!("wait_for_previous");
        let result = self.backend.wait(self.fence_value, self.fence_timeout);
        drop(interval);
        if let Err(e) = &result {
            logwise::error_sync!(
                "Fence wait failed: {err}",
                err = logwise::privacy::LogIt(e)
            );
        }
        result
    }

    /// Full GPU-idle sync before mutating resources that in-flight work may reference.
    pub fn sync(&mut self) -> Result<(), Error> {
        self.wait_for_previous()
    }
}

impl Drop for BoundDevice {
    fn drop(&mut self) {
        // resources owned elsewhere are released against an idle device
        let _ = self.wait_for_previous();
    }
}
