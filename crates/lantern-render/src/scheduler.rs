//! The frame loop state machine.
//!
//! [`FrameScheduler`] drives acquire, record, submit, present and advance for
//! every tick, and is the only place that decides whether an error ends the
//! process, drops a frame, or triggers a swapchain rebuild. GPU work is done
//! by a [`FrameBackend`]; the scheduler only sequences it.

use crate::camera::TransformUniforms;
use crate::error::{RenderError, Result};
use crate::mesh::MeshKind;
use crate::overlay::{FrameStats, MeshRequest, NoopOverlay, Overlay};
use crate::pacing::FramePacer;
use ash::vk;
use lantern_gpu::{AcquiredImage, GpuError, InFlightTracker, MemoryStats, Severity};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Stale acquires absorbed after a rebuild, at an unchanged extent, before
/// another rebuild is forced.
const STALE_ACQUIRES_PER_REBUILD: u32 = 3;

/// Lifecycle of the frame loop.
///
/// `Uninitialized -> Running <-> Paused`, either of which can move to
/// `ShouldBeClosed`, and finally `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Uninitialized,
    Running,
    /// The window has a zero-sized framebuffer.
    Paused,
    /// A fatal error happened or the window asked to close.
    ShouldBeClosed,
    Closing,
}

/// What a call to [`FrameScheduler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The frame was dropped; the loop keeps running.
    Skipped,
    /// Nothing to draw into.
    Paused,
    Closed,
}

/// GPU side of the frame loop.
///
/// `slot` is an in-flight frame slot in `0..frames_in_flight()`;
/// `image` is a swapchain image index in `0..image_count()`.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    fn image_count(&self) -> usize;

    /// Block until the last submission from `slot` has finished.
    fn wait_for_slot(&mut self, slot: usize) -> lantern_gpu::Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: usize) -> lantern_gpu::Result<AcquiredImage>;

    fn update_uniforms(&mut self, image: usize, uniforms: &TransformUniforms) -> lantern_gpu::Result<()>;

    fn record(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<()>;

    /// Submit the slot's commands, signaling render-finished and the slot's fence.
    fn submit(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<()>;

    /// Present `image`. Returns whether the swapchain is suboptimal.
    fn present(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<bool>;

    /// Drop a frame after its image was acquired.
    ///
    /// Resets the slot's command buffer and still consumes the
    /// image-available semaphore and signals the slot's fence.
    fn abort_frame(&mut self, slot: usize) -> lantern_gpu::Result<()>;

    /// Wait for idle, then destroy and rebuild the swapchain and frame resources.
    fn rebuild(&mut self, extent: vk::Extent2D) -> lantern_gpu::Result<()>;

    /// Swap the mesh. The device is idle when this is called.
    fn replace_mesh(&mut self, kind: MeshKind) -> lantern_gpu::Result<()>;

    fn wait_idle(&mut self) -> lantern_gpu::Result<()>;

    /// Current mesh with its vertex and index counts.
    fn mesh_counts(&self) -> (MeshKind, u32, u32);

    fn memory_stats(&self) -> MemoryStats;

    /// Destroy every GPU object the backend owns.
    fn shutdown(&mut self);
}

/// Runs the frame loop over a [`FrameBackend`].
pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    state: SchedulerState,
    tracker: InFlightTracker,
    extent: vk::Extent2D,
    rebuild_pending: bool,
    rebuilds: u64,
    /// A rebuild ran and no frame has been presented since.
    awaiting_present: bool,
    stale_since_rebuild: u32,
    pacer: FramePacer,
    overlay: Box<dyn Overlay>,
    mesh_request: MeshRequest,
    stats: FrameStats,
}

impl<B: FrameBackend> FrameScheduler<B> {
    pub fn new(backend: B) -> Self {
        let tracker = InFlightTracker::new(backend.frames_in_flight(), backend.image_count());
        Self {
            backend,
            state: SchedulerState::Uninitialized,
            tracker,
            extent: vk::Extent2D::default(),
            rebuild_pending: false,
            rebuilds: 0,
            awaiting_present: false,
            stale_since_rebuild: 0,
            pacer: FramePacer::unlimited(),
            overlay: Box::new(NoopOverlay),
            mesh_request: MeshRequest::new(),
            stats: FrameStats::default(),
        }
    }

    #[must_use]
    pub fn with_pacer(mut self, pacer: FramePacer) -> Self {
        self.pacer = pacer;
        self
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: Box<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of swapchain rebuilds performed.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Handle for requesting a mesh swap between frames.
    pub fn mesh_request(&self) -> MeshRequest {
        self.mesh_request.clone()
    }

    fn ensure_state(&self, operation: &'static str, allowed: &[SchedulerState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RenderError::SchedulerState {
                operation,
                state: self.state,
            })
        }
    }

    /// Enter the loop with the window's current framebuffer extent.
    pub fn start(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.ensure_state("start", &[SchedulerState::Uninitialized])?;
        self.extent = extent;
        self.state = if is_zero(extent) {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        };
        self.refresh_stats();
        info!("Frame loop started ({:?})", self.state);
        Ok(())
    }

    /// Record a new framebuffer extent.
    ///
    /// A zero extent pauses the loop; the next non-zero extent resumes it.
    /// The rebuild itself runs at the start of the next tick.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent == self.extent && !is_zero(extent) {
            return;
        }
        self.extent = extent;
        match self.state {
            SchedulerState::Running if is_zero(extent) => {
                debug!("Framebuffer minimized, pausing");
                self.state = SchedulerState::Paused;
            }
            SchedulerState::Paused if !is_zero(extent) => {
                debug!("Framebuffer restored, resuming");
                self.state = SchedulerState::Running;
            }
            _ => {}
        }
        self.rebuild_pending = true;
    }

    /// Ask the loop to stop after the current frame.
    pub fn request_close(&mut self) {
        if matches!(
            self.state,
            SchedulerState::Uninitialized | SchedulerState::Running | SchedulerState::Paused
        ) {
            self.state = SchedulerState::ShouldBeClosed;
        }
    }

    /// Run one iteration of the frame loop.
    ///
    /// Fatal errors move the scheduler to [`SchedulerState::ShouldBeClosed`]
    /// and are returned; everything else is absorbed.
    pub fn tick(&mut self, uniforms: &TransformUniforms) -> Result<FrameOutcome> {
        match self.state {
            SchedulerState::Running => {}
            SchedulerState::Paused => return Ok(FrameOutcome::Paused),
            SchedulerState::ShouldBeClosed | SchedulerState::Closing => {
                return Ok(FrameOutcome::Closed)
            }
            SchedulerState::Uninitialized => {
                return Err(RenderError::SchedulerState {
                    operation: "tick",
                    state: self.state,
                })
            }
        }

        let frame_start = Instant::now();
        let outcome = self.run_frame(uniforms);
        self.pacer.record(frame_start, Instant::now());
        self.refresh_stats();
        self.overlay.update(&self.stats, &self.mesh_request);

        let outcome = outcome.map_err(|e| self.close_on_fatal(e))?;
        if outcome == FrameOutcome::Presented {
            self.pacer.wait(frame_start);
        }
        Ok(outcome)
    }

    fn run_frame(&mut self, uniforms: &TransformUniforms) -> Result<FrameOutcome> {
        self.apply_mesh_request()?;
        self.rebuild_if_stale()?;

        let slot = self.tracker.current_slot();
        let Some(acquired) = self.acquire_frame(slot)? else {
            self.stats.skipped_frames += 1;
            return Ok(FrameOutcome::Skipped);
        };
        let image = acquired.index as usize;

        // The image's frame slot may still be read by an older submission
        // from a different in-flight slot.
        if let Some(owner) = self.tracker.pending_owner(image) {
            let backend = &mut self.backend;
            self.tracker.wait_slot(owner, |s| backend.wait_for_slot(s))?;
        }

        if let Err(e) = self.record_and_submit(slot, image, uniforms) {
            return self.abort_frame(slot, image, e);
        }
        self.tracker.mark_submitted(slot, image);
        self.tracker.advance();

        match self.backend.present(slot, image) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.rebuild_pending = true;
                }
                self.awaiting_present = false;
                self.stale_since_rebuild = 0;
                self.stats.frame_count += 1;
                Ok(FrameOutcome::Presented)
            }
            Err(e) => match e.severity() {
                Severity::Recoverable => {
                    debug!("Present reported a stale swapchain");
                    self.rebuild_pending = true;
                    self.stats.skipped_frames += 1;
                    Ok(FrameOutcome::Skipped)
                }
                Severity::FrameAbort => {
                    warn!("Present failed, dropping frame: {e}");
                    self.stats.skipped_frames += 1;
                    Ok(FrameOutcome::Skipped)
                }
                Severity::Fatal => Err(e.into()),
            },
        }
    }

    fn record_and_submit(
        &mut self,
        slot: usize,
        image: usize,
        uniforms: &TransformUniforms,
    ) -> lantern_gpu::Result<()> {
        self.backend.update_uniforms(image, uniforms)?;
        self.backend.record(slot, image)?;
        self.backend.submit(slot, image)
    }

    /// Drop a frame whose image was acquired but never submitted.
    fn abort_frame(&mut self, slot: usize, image: usize, err: GpuError) -> Result<FrameOutcome> {
        if err.severity() == Severity::Fatal {
            return Err(err.into());
        }
        warn!("Dropping frame: {err}");
        self.backend.abort_frame(slot)?;
        self.tracker.mark_submitted(slot, image);
        self.tracker.advance();
        // The acquired image is never presented; a rebuild hands it back.
        self.rebuild_pending = true;
        self.stats.skipped_frames += 1;
        Ok(FrameOutcome::Skipped)
    }

    /// Wait for `slot`'s previous submission and acquire an image.
    ///
    /// Returns `None` when the swapchain is stale or the acquire timed out;
    /// a stale swapchain marks a rebuild as pending. Repeated stale acquires
    /// coalesce into one rebuild: those arriving before the rebuild runs
    /// share it, and those arriving after it but before the next present
    /// are skipped until [`STALE_ACQUIRES_PER_REBUILD`] of them pile up.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_frame(&mut self, slot: usize) -> Result<Option<AcquiredImage>> {
        let backend = &mut self.backend;
        self.tracker.wait_slot(slot, |s| backend.wait_for_slot(s))?;

        match self.backend.acquire(slot) {
            Ok(acquired) => {
                if acquired.suboptimal {
                    self.mark_stale();
                }
                Ok(Some(acquired))
            }
            Err(e) => match e.severity() {
                Severity::Recoverable => {
                    debug!("Acquire reported a stale swapchain");
                    self.mark_stale();
                    Ok(None)
                }
                Severity::FrameAbort => {
                    warn!("Acquire failed, dropping frame: {e}");
                    Ok(None)
                }
                Severity::Fatal => Err(e.into()),
            },
        }
    }

    fn mark_stale(&mut self) {
        if !self.awaiting_present {
            self.rebuild_pending = true;
            return;
        }
        self.stale_since_rebuild += 1;
        if self.stale_since_rebuild >= STALE_ACQUIRES_PER_REBUILD {
            debug!("Swapchain still stale after rebuild, rebuilding again");
            self.stale_since_rebuild = 0;
            self.rebuild_pending = true;
        }
    }

    /// Rebuild the swapchain and frame resources if a rebuild is pending.
    ///
    /// Returns whether a rebuild happened. Nothing is rebuilt while the
    /// framebuffer extent is zero.
    pub fn rebuild_if_stale(&mut self) -> Result<bool> {
        if !self.rebuild_pending || is_zero(self.extent) {
            return Ok(false);
        }

        self.backend.rebuild(self.extent)?;
        self.tracker.reset_images(self.backend.image_count());
        self.rebuild_pending = false;
        self.awaiting_present = true;
        self.stale_since_rebuild = 0;
        self.rebuilds += 1;
        info!(
            "Swapchain rebuilt ({}x{}, rebuild #{})",
            self.extent.width, self.extent.height, self.rebuilds
        );
        Ok(true)
    }

    /// Swap meshes between frames if one was requested.
    fn apply_mesh_request(&mut self) -> Result<()> {
        let Some(kind) = self.mesh_request.take() else {
            return Ok(());
        };
        if kind == self.backend.mesh_counts().0 {
            return Ok(());
        }

        self.backend.wait_idle()?;
        self.tracker.clear();
        self.backend.replace_mesh(kind)?;
        info!("Mesh switched to {kind}");
        Ok(())
    }

    fn close_on_fatal(&mut self, err: RenderError) -> RenderError {
        if err.severity() == Severity::Fatal {
            error!("Fatal frame loop error: {err}");
            self.state = SchedulerState::ShouldBeClosed;
        }
        err
    }

    fn refresh_stats(&mut self) {
        let (mesh, vertex_count, index_count) = self.backend.mesh_counts();
        let history = self.pacer.history();
        self.stats.last_frame_time = history.last();
        self.stats.average_frame_time = history.average();
        self.stats.swapchain_rebuilds = self.rebuilds;
        self.stats.mesh = mesh;
        self.stats.vertex_count = vertex_count;
        self.stats.index_count = index_count;
        self.stats.memory = self.backend.memory_stats();
    }

    /// Wait for the GPU and tear the backend down.
    pub fn shutdown(&mut self) {
        if self.state == SchedulerState::Closing {
            return;
        }
        self.state = SchedulerState::Closing;
        if let Err(e) = self.backend.wait_idle() {
            error!("Failed to wait idle during shutdown: {e}");
        }
        self.tracker.clear();
        self.backend.shutdown();
        info!(
            "Frame loop closed after {} frames ({} skipped, {} rebuilds)",
            self.stats.frame_count, self.stats.skipped_frames, self.rebuilds
        );
    }
}

fn is_zero(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_gpu::{RecordingError, RecordingState};
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Script {
        Ok,
        Suboptimal,
        Stale,
        Timeout,
        RecordFails,
        Lost,
    }

    impl Script {
        fn error(self) -> Option<GpuError> {
            match self {
                Self::Stale => Some(GpuError::PresentationStale),
                Self::Timeout => Some(GpuError::Vulkan(vk::Result::TIMEOUT)),
                Self::RecordFails => Some(
                    RecordingError::InvalidState {
                        operation: "record",
                        state: RecordingState::Began,
                    }
                    .into(),
                ),
                Self::Lost => Some(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)),
                Self::Ok | Self::Suboptimal => None,
            }
        }
    }

    struct MockBackend {
        slots: usize,
        images: usize,
        next_image: usize,
        acquires: VecDeque<Script>,
        records: VecDeque<Script>,
        presents: VecDeque<Script>,
        calls: Vec<String>,
        rebuilds: usize,
        mesh: MeshKind,
        shut_down: bool,
    }

    impl MockBackend {
        fn new(slots: usize, images: usize) -> Self {
            Self {
                slots,
                images,
                next_image: 0,
                acquires: VecDeque::new(),
                records: VecDeque::new(),
                presents: VecDeque::new(),
                calls: Vec::new(),
                rebuilds: 0,
                mesh: MeshKind::Triangle,
                shut_down: false,
            }
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    fn scripted(queue: &mut VecDeque<Script>) -> lantern_gpu::Result<Script> {
        let script = queue.pop_front().unwrap_or(Script::Ok);
        script.error().map_or(Ok(script), Err)
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            self.slots
        }

        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_for_slot(&mut self, slot: usize) -> lantern_gpu::Result<()> {
            self.calls.push(format!("wait {slot}"));
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> lantern_gpu::Result<AcquiredImage> {
            self.calls.push(format!("acquire {slot}"));
            let script = scripted(&mut self.acquires)?;
            let index = self.next_image as u32;
            self.next_image = (self.next_image + 1) % self.images;
            Ok(AcquiredImage {
                index,
                suboptimal: script == Script::Suboptimal,
            })
        }

        fn update_uniforms(&mut self, image: usize, _: &TransformUniforms) -> lantern_gpu::Result<()> {
            self.calls.push(format!("uniforms {image}"));
            Ok(())
        }

        fn record(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<()> {
            self.calls.push(format!("record {slot} {image}"));
            scripted(&mut self.records).map(|_| ())
        }

        fn submit(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<()> {
            self.calls.push(format!("submit {slot} {image}"));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<bool> {
            self.calls.push(format!("present {slot} {image}"));
            scripted(&mut self.presents).map(|s| s == Script::Suboptimal)
        }

        fn abort_frame(&mut self, slot: usize) -> lantern_gpu::Result<()> {
            self.calls.push(format!("abort {slot}"));
            Ok(())
        }

        fn rebuild(&mut self, extent: vk::Extent2D) -> lantern_gpu::Result<()> {
            self.calls.push(format!("rebuild {}x{}", extent.width, extent.height));
            self.rebuilds += 1;
            self.next_image = 0;
            Ok(())
        }

        fn replace_mesh(&mut self, kind: MeshKind) -> lantern_gpu::Result<()> {
            self.calls.push(format!("mesh {kind}"));
            self.mesh = kind;
            Ok(())
        }

        fn wait_idle(&mut self) -> lantern_gpu::Result<()> {
            self.calls.push("idle".to_string());
            Ok(())
        }

        fn mesh_counts(&self) -> (MeshKind, u32, u32) {
            (self.mesh, 3, 3)
        }

        fn memory_stats(&self) -> MemoryStats {
            MemoryStats::default()
        }

        fn shutdown(&mut self) {
            self.shut_down = true;
        }
    }

    fn running(slots: usize, images: usize) -> FrameScheduler<MockBackend> {
        let mut scheduler = FrameScheduler::new(MockBackend::new(slots, images));
        scheduler
            .start(vk::Extent2D {
                width: 800,
                height: 600,
            })
            .unwrap();
        scheduler
    }

    fn uniforms() -> TransformUniforms {
        TransformUniforms::default()
    }

    #[test]
    fn frame_runs_in_protocol_order() {
        let mut scheduler = running(2, 3);
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            scheduler.backend().calls,
            ["acquire 0", "uniforms 0", "record 0 0", "submit 0 0", "present 0 0"]
        );
        assert_eq!(scheduler.stats().frame_count, 1);
    }

    #[test]
    fn slots_cycle_and_wait_before_reuse() {
        let mut scheduler = running(2, 3);
        for _ in 0..3 {
            scheduler.tick(&uniforms()).unwrap();
        }
        let calls = &scheduler.backend().calls;
        let acquires: Vec<_> = calls.iter().filter(|c| c.starts_with("acquire")).collect();
        assert_eq!(acquires, ["acquire 0", "acquire 1", "acquire 0"]);

        // Slot 0 is reused on the third frame and must be waited on first.
        let wait = calls.iter().position(|c| c == "wait 0").unwrap();
        let third_acquire = calls.iter().rposition(|c| c == "acquire 0").unwrap();
        assert!(wait < third_acquire);
        assert_eq!(scheduler.backend().count("wait 1"), 0);
    }

    #[test]
    fn image_owner_is_waited_before_uniform_write() {
        // Two images, three slots: image 0 comes back while slot 0 is pending.
        let mut scheduler = running(3, 2);
        for _ in 0..3 {
            scheduler.tick(&uniforms()).unwrap();
        }
        let calls = &scheduler.backend().calls;
        let wait = calls.iter().position(|c| c == "wait 0").unwrap();
        let write = calls.iter().rposition(|c| c == "uniforms 0").unwrap();
        assert!(wait < write);
    }

    #[test]
    fn three_stale_acquires_cause_one_rebuild() {
        let mut scheduler = running(2, 3);
        scheduler
            .backend
            .acquires
            .extend([Script::Stale, Script::Stale, Script::Stale]);

        for _ in 0..3 {
            assert!(scheduler.acquire_frame(0).unwrap().is_none());
        }
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.backend().rebuilds, 0);

        assert!(scheduler.rebuild_if_stale().unwrap());
        assert!(!scheduler.rebuild_if_stale().unwrap());
        assert_eq!(scheduler.backend().rebuilds, 1);
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn three_stale_ticks_cause_one_rebuild() {
        let mut scheduler = running(2, 3);
        scheduler
            .backend
            .acquires
            .extend([Script::Stale, Script::Stale, Script::Stale]);

        for _ in 0..3 {
            assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        }
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.backend().rebuilds, 1);
        assert_eq!(scheduler.rebuild_count(), 1);
        assert_eq!(scheduler.stats().skipped_frames, 3);
    }

    #[test]
    fn persistent_stale_acquires_rebuild_again() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.extend([Script::Stale; 5]);

        // One rebuild for the first stale acquire, another once the
        // following stale acquires reach the limit.
        for _ in 0..5 {
            assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        }
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.backend().rebuilds, 2);
    }

    #[test]
    fn present_ends_stale_coalescing() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.extend([Script::Stale, Script::Ok, Script::Stale]);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert!(scheduler.rebuild_pending());

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.backend().rebuilds, 2);
    }

    #[test]
    fn stale_acquire_skips_and_rebuilds_next_tick() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.push_back(Script::Stale);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert_eq!(scheduler.backend().count("record"), 0);
        assert_eq!(scheduler.stats().skipped_frames, 1);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert_eq!(scheduler.backend().calls[1], "rebuild 800x600");
        assert_eq!(scheduler.rebuild_count(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.push_back(Script::Suboptimal);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
        assert!(scheduler.rebuild_pending());
    }

    #[test]
    fn stale_present_marks_rebuild() {
        let mut scheduler = running(2, 3);
        scheduler.backend.presents.push_back(Script::Stale);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert!(scheduler.rebuild_pending());
        assert_eq!(scheduler.state(), SchedulerState::Running);
    }

    #[test]
    fn recording_failure_aborts_only_that_frame() {
        let mut scheduler = running(2, 3);
        scheduler.backend.records.push_back(Script::RecordFails);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert_eq!(scheduler.backend().count("abort 0"), 1);
        assert_eq!(scheduler.backend().count("submit"), 0);
        assert_eq!(scheduler.state(), SchedulerState::Running);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn acquire_timeout_skips_without_rebuild() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.push_back(Script::Timeout);

        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Skipped);
        assert!(!scheduler.rebuild_pending());
    }

    #[test]
    fn fatal_error_requests_close() {
        let mut scheduler = running(2, 3);
        scheduler.backend.acquires.push_back(Script::Lost);

        let err = scheduler.tick(&uniforms()).unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(scheduler.state(), SchedulerState::ShouldBeClosed);
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Closed);
    }

    #[test]
    fn zero_extent_pauses_until_restored() {
        let mut scheduler = running(2, 3);
        scheduler.resize(0, 0);
        assert_eq!(scheduler.state(), SchedulerState::Paused);
        assert_eq!(scheduler.tick(&uniforms()).unwrap(), FrameOutcome::Paused);
        assert!(!scheduler.rebuild_if_stale().unwrap());

        scheduler.resize(1024, 768);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.tick(&uniforms()).unwrap();
        assert_eq!(scheduler.backend().rebuilds, 1);
        assert_eq!(scheduler.backend().calls[0], "rebuild 1024x768");
    }

    #[test]
    fn repeated_resizes_coalesce() {
        let mut scheduler = running(2, 3);
        scheduler.resize(640, 480);
        scheduler.resize(700, 500);
        scheduler.resize(720, 540);
        scheduler.tick(&uniforms()).unwrap();
        assert_eq!(scheduler.backend().rebuilds, 1);
        assert_eq!(scheduler.backend().calls[0], "rebuild 720x540");
    }

    #[test]
    fn mesh_swap_waits_for_idle() {
        let mut scheduler = running(2, 3);
        scheduler.tick(&uniforms()).unwrap();
        scheduler.mesh_request().request(MeshKind::Quad);
        scheduler.tick(&uniforms()).unwrap();

        let calls = &scheduler.backend().calls;
        let idle = calls.iter().position(|c| c == "idle").unwrap();
        assert_eq!(calls[idle + 1], "mesh quad");
        assert_eq!(scheduler.stats().mesh, MeshKind::Quad);
    }

    #[test]
    fn same_mesh_request_is_ignored() {
        let mut scheduler = running(2, 3);
        scheduler.mesh_request().request(MeshKind::Triangle);
        scheduler.tick(&uniforms()).unwrap();
        assert_eq!(scheduler.backend().count("idle"), 0);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut scheduler = FrameScheduler::new(MockBackend::new(2, 3));
        assert!(scheduler.tick(&uniforms()).is_err());

        scheduler
            .start(vk::Extent2D {
                width: 1,
                height: 1,
            })
            .unwrap();
        assert!(scheduler
            .start(vk::Extent2D {
                width: 1,
                height: 1,
            })
            .is_err());

        scheduler.request_close();
        assert_eq!(scheduler.state(), SchedulerState::ShouldBeClosed);

        scheduler.shutdown();
        assert_eq!(scheduler.state(), SchedulerState::Closing);
        assert!(scheduler.backend().shut_down);
        assert_eq!(scheduler.backend().count("idle"), 1);

        scheduler.shutdown();
        assert_eq!(scheduler.backend().count("idle"), 1);
    }
}
