// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::Error;
use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

/**
Polls `future` once.

wgpu's error scopes and native callbacks resolve as soon as the work they observe is done, so
on native targets a single poll is enough.  `None` means the future was still pending.
*/
pub(super) fn poll_once<F: Future>(future: F) -> Option<F::Output> {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(output) => Some(output),
        Poll::Pending => None,
    }
}

/**
Runs `f` inside out-of-memory and validation error scopes.

`map` turns a validation message into the crate error for this kind of object.
*/
pub(super) fn scoped<T>(
    device: &wgpu::Device,
    label: &str,
    map: impl FnOnce(String) -> Error,
    f: impl FnOnce(&wgpu::Device) -> T,
) -> Result<T, Error> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f(device);
    let validation = poll_once(device.pop_error_scope()).flatten();
    let oom = poll_once(device.pop_error_scope()).flatten();
    if oom.is_some() {
        return Err(Error::OutOfMemory(label.to_string()));
    }
    match validation {
        Some(e) => Err(map(e.to_string())),
        None => Ok(value),
    }
}
