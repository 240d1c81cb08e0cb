//! Command Submission Context.
//!
//! Owns the command queue, N per-frame slots (one command allocator plus the
//! fence value it was last submitted with), the shared command buffer
//! (wrapped in a [`FrameRecorder`]) and the completion fence.
//!
//! # Frame slots
//!
//! ```text
//! advance_frame:   next = (current + 1) % N
//!                  wait until fence >= slots[next].fence_value   (only steady-state wait)
//!                  reset slots[next].allocator, reopen the buffer on it
//! submit_and_signal: close, submit, signal ++next_value, slots[current].fence_value = next_value
//! ```
//!
//! The context starts on slot 0 with a closed buffer, so the first
//! `advance_frame` opens slot 1. Because a slot is only reused after its
//! fence value completes, the CPU never runs more than N - 1 frames ahead.

use std::sync::Arc;

use cadence_rhi::{CommandRecorder, GpuDevice, RhiError, ScissorRect, Viewport};
use tracing::{debug, error, trace, warn};

use crate::error::{FrameError, FrameResult};
use crate::recorder::FrameRecorder;

/// Counters kept by the context for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    /// Successful `advance_frame` calls.
    pub frames_advanced: u64,
    /// Advances that had to block on the GPU.
    pub blocking_waits: u64,
    /// Command buffers submitted.
    pub submissions: u64,
    /// `wait_for_idle` calls.
    pub idle_waits: u64,
}

struct FrameSlot<D: GpuDevice> {
    allocator: D::CommandAllocator,
    /// Fence value that retires the work last recorded on this slot.
    fence_value: u64,
}

/// Records and submits GPU work on a single queue.
pub struct SubmissionContext<D: GpuDevice> {
    recorder: FrameRecorder<D>,
    slots: Vec<FrameSlot<D>>,
    fence: D::Fence,
    queue: D::Queue,
    device: Arc<D>,
    current: usize,
    next_value: u64,
    stats: SubmissionStats,
}

impl<D: GpuDevice> SubmissionContext<D> {
    /// Creates the queue, `frame_slots` allocators, one closed command
    /// buffer and the fence.
    ///
    /// # Errors
    ///
    /// Any failure is a [`FrameError::Setup`]; fewer than two slots is
    /// rejected.
    pub fn create(device: Arc<D>, frame_slots: usize) -> FrameResult<Self> {
        if frame_slots < 2 {
            return Err(FrameError::Setup {
                stage: "submission context",
                source: RhiError::InvalidArgument(format!(
                    "at least 2 frame slots are required (got {frame_slots})"
                )),
            });
        }

        let setup = || FrameError::setup("submission context");

        let queue = device.create_queue().map_err(setup())?;
        let fence = device.create_fence(0).map_err(setup())?;

        let slots = (0..frame_slots)
            .map(|_| {
                device.create_command_allocator().map(|allocator| FrameSlot {
                    allocator,
                    fence_value: 0,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(setup())?;

        let command_buffer = device
            .create_command_buffer(&slots[0].allocator)
            .map_err(setup())?;

        debug!(
            "Submission context created on {} backend with {} frame slots",
            device.name(),
            frame_slots
        );

        Ok(Self {
            recorder: FrameRecorder::new(command_buffer),
            slots,
            fence,
            queue,
            device,
            current: 0,
            next_value: 0,
            stats: SubmissionStats::default(),
        })
    }

    /// Moves to the next frame slot and opens the command buffer on it.
    ///
    /// Blocks only when the slot's previous work has not completed yet.
    pub fn advance_frame(&mut self) -> FrameResult<()> {
        let next = (self.current + 1) % self.slots.len();
        let required = self.slots[next].fence_value;

        let completed = self.device.completed_value(&self.fence)?;
        if completed < required {
            trace!(
                "Slot {} busy (completed {}, needs {}), waiting",
                next, completed, required
            );
            self.stats.blocking_waits += 1;
            self.device.wait_for_value(&self.fence, required)?;
        }

        if self.recorder.is_recording() {
            debug!("Discarding commands recorded after the last submission");
            self.device.close_command_buffer(self.recorder.buffer_mut())?;
        }

        let slot = &mut self.slots[next];
        self.device.reset_command_allocator(&mut slot.allocator)?;
        self.device
            .reopen_command_buffer(self.recorder.buffer_mut(), &slot.allocator)?;

        self.recorder.reset_state_cache();
        self.current = next;
        self.stats.frames_advanced += 1;
        Ok(())
    }

    /// Closes and submits the command buffer, then signals the fence with a
    /// new value recorded against the current slot. Does not block.
    ///
    /// Returns the signaled value.
    ///
    /// # Errors
    ///
    /// A signal failure after the work was submitted is a
    /// [`FrameError::Device`]: the slot could no longer be tracked.
    pub fn submit_and_signal(&mut self) -> FrameResult<u64> {
        self.require_recording()?;

        self.device.close_command_buffer(self.recorder.buffer_mut())?;
        self.device.submit(&self.queue, self.recorder.raw())?;
        self.stats.submissions += 1;

        let value = self.next_value + 1;
        if let Err(e) = self.device.signal(&self.queue, &self.fence, value) {
            error!("Failed to signal fence value {} after submission: {}", value, e);
            return Err(FrameError::Device(e));
        }
        self.next_value = value;
        self.slots[self.current].fence_value = value;

        trace!("Submitted slot {} (fence value {})", self.current, value);
        Ok(value)
    }

    /// Submits, blocks until the work completes, then reopens the buffer
    /// on the same slot. For one-shot work such as uploads or draining.
    pub fn submit_and_wait_idle(&mut self) -> FrameResult<()> {
        let value = self.submit_and_signal()?;
        self.device.wait_for_value(&self.fence, value)?;

        let slot = &mut self.slots[self.current];
        self.device.reset_command_allocator(&mut slot.allocator)?;
        self.device
            .reopen_command_buffer(self.recorder.buffer_mut(), &slot.allocator)?;

        self.recorder.reset_state_cache();
        Ok(())
    }

    /// Blocks until every signaled value has completed.
    pub fn wait_for_idle(&mut self) -> FrameResult<()> {
        self.stats.idle_waits += 1;
        if self.device.completed_value(&self.fence)? < self.next_value {
            self.device.wait_for_value(&self.fence, self.next_value)?;
        }
        debug!("GPU idle at fence value {}", self.next_value);
        Ok(())
    }

    /// Sets the viewport unless it equals the last one applied in this
    /// recording.
    pub fn set_viewport(&mut self, viewport: &Viewport) -> FrameResult<()> {
        self.require_recording()?;
        self.recorder.set_viewport(viewport);
        Ok(())
    }

    /// Sets the scissor rectangle unless it equals the last one applied in
    /// this recording.
    pub fn set_scissor(&mut self, scissor: &ScissorRect) -> FrameResult<()> {
        self.require_recording()?;
        self.recorder.set_scissor(scissor);
        Ok(())
    }

    fn require_recording(&self) -> FrameResult<()> {
        if self.recorder.is_recording() {
            Ok(())
        } else {
            Err(FrameError::MissingDependency(
                "command buffer is not open for recording",
            ))
        }
    }

    /// Highest fence value the GPU has completed.
    pub fn completed_value(&self) -> FrameResult<u64> {
        Ok(self.device.completed_value(&self.fence)?)
    }

    /// Frames submitted but not yet completed by the GPU.
    pub fn frames_in_flight(&self) -> FrameResult<u64> {
        Ok(self.next_value.saturating_sub(self.completed_value()?))
    }

    /// Last value signaled on the fence.
    #[inline]
    pub fn last_signaled_value(&self) -> u64 {
        self.next_value
    }

    /// Fence value recorded for `slot`, if the slot exists.
    pub fn slot_fence_value(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|s| s.fence_value)
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frame_slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    #[inline]
    pub fn stats(&self) -> SubmissionStats {
        self.stats
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    #[inline]
    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }

    #[inline]
    pub fn command_buffer(&self) -> &D::CommandBuffer {
        self.recorder.raw()
    }

    #[inline]
    pub fn recorder(&self) -> &FrameRecorder<D> {
        &self.recorder
    }

    /// Recorder of the open frame. Viewport and scissor set through it
    /// share the context's cache.
    #[inline]
    pub fn recorder_mut(&mut self) -> &mut FrameRecorder<D> {
        &mut self.recorder
    }
}

impl<D: GpuDevice> Drop for SubmissionContext<D> {
    fn drop(&mut self) {
        // Allocators must not be released while the GPU still reads them.
        match self.device.completed_value(&self.fence) {
            Ok(completed) if completed >= self.next_value => {}
            _ => {
                warn!("Submission context dropped with GPU work outstanding, draining");
                if let Err(e) = self.device.wait_for_value(&self.fence, self.next_value) {
                    tracing::error!("Failed to drain GPU work: {}", e);
                }
            }
        }
        debug!("Submission context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::headless::{HeadlessGpu, RecordedCommand};

    fn context(slots: usize, latency: u64) -> SubmissionContext<HeadlessGpu> {
        SubmissionContext::create(Arc::new(HeadlessGpu::with_gpu_latency(latency)), slots).unwrap()
    }

    #[test]
    fn rejects_single_slot() {
        let result = SubmissionContext::create(Arc::new(HeadlessGpu::new()), 1);
        assert!(matches!(result, Err(FrameError::Setup { .. })));
    }

    #[test]
    fn starts_closed_on_slot_zero() {
        let ctx = context(3, 0);
        assert_eq!(ctx.current_slot(), 0);
        assert!(!ctx.is_recording());
        assert_eq!(ctx.last_signaled_value(), 0);
    }

    #[test]
    fn first_advance_opens_slot_one() {
        let mut ctx = context(3, 0);
        ctx.advance_frame().unwrap();
        assert_eq!(ctx.current_slot(), 1);
        assert!(ctx.is_recording());
    }

    #[test]
    fn submit_without_open_buffer_is_missing_dependency() {
        let mut ctx = context(2, 0);
        assert!(matches!(
            ctx.submit_and_signal(),
            Err(FrameError::MissingDependency(_))
        ));
        assert_eq!(ctx.last_signaled_value(), 0);
        assert_eq!(ctx.stats().submissions, 0);
    }

    #[test]
    fn signal_values_are_recorded_per_slot() {
        let mut ctx = context(3, 0);
        for expected in 1..=4 {
            ctx.advance_frame().unwrap();
            assert_eq!(ctx.submit_and_signal().unwrap(), expected);
        }
        // Slots visited: 1, 2, 0, 1
        assert_eq!(ctx.slot_fence_value(0), Some(3));
        assert_eq!(ctx.slot_fence_value(1), Some(4));
        assert_eq!(ctx.slot_fence_value(2), Some(2));
    }

    #[test]
    fn advance_blocks_when_slot_is_busy() {
        let mut ctx = context(2, 2);
        for _ in 0..3 {
            ctx.advance_frame().unwrap();
            assert!(ctx.frames_in_flight().unwrap() <= 1);
            ctx.submit_and_signal().unwrap();
        }
        assert_eq!(ctx.stats().blocking_waits, 1);
    }

    #[test]
    fn viewport_cache_skips_duplicates_within_a_recording() {
        let mut ctx = context(2, 0);
        ctx.advance_frame().unwrap();
        let vp = Viewport::full(64, 64);
        ctx.set_viewport(&vp).unwrap();
        ctx.set_viewport(&vp).unwrap();
        let count = ctx
            .command_buffer()
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::SetViewport(_)))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn viewport_requires_open_buffer() {
        let mut ctx = context(2, 0);
        assert!(matches!(
            ctx.set_scissor(&ScissorRect::full(1, 1)),
            Err(FrameError::MissingDependency(_))
        ));
    }

    #[test]
    fn failed_signal_after_submit_is_fatal() {
        let mut ctx = context(3, 0);
        ctx.advance_frame().unwrap();
        ctx.device().fail_next_signal();

        let err = ctx.submit_and_signal().unwrap_err();
        assert!(matches!(err, FrameError::Device(_)));
        assert!(err.is_fatal());
        assert_eq!(ctx.last_signaled_value(), 0);
        assert_eq!(ctx.slot_fence_value(1), Some(0));
    }

    #[test]
    fn advance_waits_only_for_a_busy_slot() {
        // A GPU lagging by as many signals as there are slots stalls every
        // advance from the fourth frame on.
        let cases: [(u64, [u64; 6]); 2] = [(2, [0; 6]), (3, [0, 0, 0, 1, 2, 3])];
        for (latency, expected_waits) in cases {
            let mut ctx = context(3, latency);
            for (frame, expected) in expected_waits.iter().enumerate() {
                ctx.advance_frame().unwrap();
                assert_eq!(
                    ctx.stats().blocking_waits,
                    *expected,
                    "latency {latency}, frame {frame}"
                );
                let required = ctx.slot_fence_value(ctx.current_slot()).unwrap();
                assert!(
                    ctx.completed_value().unwrap() >= required,
                    "slot {} reopened before fence value {} completed",
                    ctx.current_slot(),
                    required
                );
                ctx.submit_and_signal().unwrap();
            }
        }
    }

    #[test]
    fn advance_after_wait_idle_discards_open_buffer() {
        let mut ctx = context(3, 0);
        ctx.advance_frame().unwrap();
        ctx.submit_and_wait_idle().unwrap();
        ctx.set_viewport(&Viewport::full(16, 16)).unwrap();
        assert_eq!(ctx.command_buffer().commands().len(), 1);

        ctx.advance_frame().unwrap();
        assert_eq!(ctx.current_slot(), 2);
        assert!(ctx.is_recording());
        assert!(ctx.command_buffer().commands().is_empty());
        assert_eq!(ctx.recorder().viewport(), None);
        assert_eq!(ctx.stats().submissions, 1);
        assert_eq!(ctx.device().submitted().len(), 1);
    }

    #[test]
    fn submit_and_wait_idle_reopens_same_slot() {
        let mut ctx = context(3, 5);
        ctx.advance_frame().unwrap();
        ctx.submit_and_wait_idle().unwrap();
        assert_eq!(ctx.current_slot(), 1);
        assert!(ctx.is_recording());
        assert_eq!(ctx.completed_value().unwrap(), 1);
    }

    #[test]
    fn wait_for_idle_retires_everything() {
        let mut ctx = context(3, 10);
        for _ in 0..2 {
            ctx.advance_frame().unwrap();
            ctx.submit_and_signal().unwrap();
        }
        ctx.wait_for_idle().unwrap();
        assert_eq!(ctx.frames_in_flight().unwrap(), 0);
        assert_eq!(ctx.stats().idle_waits, 1);
    }
}
