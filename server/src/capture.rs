//! Frame capture pipeline
//!
//! Each avatar owns one [`CaptureRequest`] that is reused every step. Queued
//! requests are only processed once the current render frame has finished:
//! the session manager calls [`FrameCapturePipeline::drain`] after
//! `end_render`, and the pipeline refuses to drain while a frame is still in
//! progress. Completion is reported back through [`CaptureHost`], which is
//! where the outbound frame for that avatar gets assembled and sent.

use crate::avatar::AvatarId;
use log::{debug, warn};
use shared::{Quat, Vec3};
use std::collections::VecDeque;
use thiserror::Error;

/// Where the avatar's camera is when its images are rendered
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraPose {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Rendering collaborator
pub trait Renderer: Send {
    /// Renders the shared frame; captures are drained after this returns.
    fn render_frame(&mut self) {}

    /// Encoded image for one render variant; `None` is default rendering.
    fn render_with_variant(&mut self, variant: Option<&str>, camera: &CameraPose) -> Vec<u8>;

    fn file_extension(&self) -> &str {
        "bmp"
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CaptureError {
    #[error("cannot drain captures while a frame is rendering")]
    RenderInProgress,
}

/// Render variants of one avatar and the images produced for them
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    owner: AvatarId,
    variants: Vec<Option<String>>,
    images: Vec<Vec<u8>>,
}

impl CaptureRequest {
    pub fn new(owner: AvatarId, variants: Vec<Option<String>>) -> Self {
        Self {
            owner,
            variants,
            images: Vec::new(),
        }
    }

    pub fn owner(&self) -> AvatarId {
        self.owner
    }

    pub fn variants(&self) -> &[Option<String>] {
        &self.variants
    }

    /// Images in variant order, valid after the request was processed
    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    /// Renders every variant into the image list, growing it to fit.
    pub fn process(&mut self, renderer: &mut dyn Renderer, camera: &CameraPose) {
        if self.images.len() < self.variants.len() {
            self.images.resize(self.variants.len(), Vec::new());
        }
        for (slot, variant) in self.images.iter_mut().zip(self.variants.iter()) {
            *slot = renderer.render_with_variant(variant.as_deref(), camera);
        }
    }
}

/// Gives the pipeline access to requests owned elsewhere
pub trait CaptureHost {
    /// The live request of `owner` and its camera, or `None` if the avatar is gone
    fn capture_slot(&mut self, owner: AvatarId) -> Option<(&mut CaptureRequest, CameraPose)>;

    /// Called right after `owner`'s request has been processed
    fn capture_completed(&mut self, owner: AvatarId);
}

#[derive(Debug, Default)]
pub struct FrameCapturePipeline {
    queue: VecDeque<AvatarId>,
    rendering: bool,
}

impl FrameCapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `owner`'s request. Returns false if it was already pending.
    pub fn request_capture(&mut self, owner: AvatarId) -> bool {
        if self.queue.contains(&owner) {
            warn!("Capture for avatar {} is already queued", owner);
            return false;
        }
        self.queue.push_back(owner);
        true
    }

    /// Drops a pending request, e.g. when its avatar goes away
    pub fn cancel(&mut self, owner: AvatarId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != owner);
        before != self.queue.len()
    }

    pub fn is_pending(&self, owner: AvatarId) -> bool {
        self.queue.contains(&owner)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn begin_render(&mut self) {
        self.rendering = true;
    }

    pub fn end_render(&mut self) {
        self.rendering = false;
    }

    /// Processes every request queued before the call, in FIFO order.
    ///
    /// Requests queued by `capture_completed` wait for the next drain.
    /// Returns the number of requests completed.
    pub fn drain(
        &mut self,
        renderer: &mut dyn Renderer,
        host: &mut dyn CaptureHost,
    ) -> Result<usize, CaptureError> {
        if self.rendering {
            return Err(CaptureError::RenderInProgress);
        }

        let batch: Vec<AvatarId> = self.queue.drain(..).collect();
        let mut completed = 0;
        for owner in batch {
            match host.capture_slot(owner) {
                Some((request, camera)) => request.process(renderer, &camera),
                None => {
                    debug!("Discarding capture for removed avatar {}", owner);
                    continue;
                }
            }
            host.capture_completed(owner);
            completed += 1;
        }
        Ok(completed)
    }
}

/// Deterministic uncompressed BMP images, one solid colour per variant and pose
pub struct PlaceholderRenderer {
    width: u32,
    height: u32,
    frames_rendered: u64,
}

impl PlaceholderRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frames_rendered: 0,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn colour(variant: Option<&str>, camera: &CameraPose) -> [u8; 3] {
        let seed = variant
            .unwrap_or("")
            .bytes()
            .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let shade = |v: f32, salt: u32| ((v.abs() * 40.0) as u32).wrapping_add(seed >> salt) as u8;
        [
            shade(camera.position.z, 16),
            shade(camera.position.y, 8),
            shade(camera.position.x, 0),
        ]
    }

    fn encode_bmp(&self, bgr: [u8; 3]) -> Vec<u8> {
        let row_bytes = (self.width * 3 + 3) & !3;
        let pixel_bytes = row_bytes * self.height;
        let file_size = 54 + pixel_bytes;

        let mut data = Vec::with_capacity(file_size as usize);
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&file_size.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&54u32.to_le_bytes());
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&(self.width as i32).to_le_bytes());
        data.extend_from_slice(&(self.height as i32).to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&pixel_bytes.to_le_bytes());
        data.extend_from_slice(&2835i32.to_le_bytes());
        data.extend_from_slice(&2835i32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        let padding = (row_bytes - self.width * 3) as usize;
        for _ in 0..self.height {
            for _ in 0..self.width {
                data.extend_from_slice(&bgr);
            }
            data.extend(std::iter::repeat(0u8).take(padding));
        }
        data
    }
}

impl Default for PlaceholderRenderer {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

impl Renderer for PlaceholderRenderer {
    fn render_frame(&mut self) {
        self.frames_rendered += 1;
    }

    fn render_with_variant(&mut self, variant: Option<&str>, camera: &CameraPose) -> Vec<u8> {
        self.encode_bmp(Self::colour(variant, camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingRenderer {
        calls: Vec<Option<String>>,
    }

    impl Renderer for CountingRenderer {
        fn render_with_variant(&mut self, variant: Option<&str>, _camera: &CameraPose) -> Vec<u8> {
            self.calls.push(variant.map(str::to_string));
            vec![self.calls.len() as u8]
        }
    }

    #[derive(Default)]
    struct TestHost {
        requests: HashMap<AvatarId, CaptureRequest>,
        completed: Vec<AvatarId>,
    }

    impl TestHost {
        fn with(owners: &[(AvatarId, usize)]) -> Self {
            let mut host = Self::default();
            for (owner, variants) in owners {
                let variants = (0..*variants).map(|i| Some(format!("v{}", i))).collect();
                host.requests
                    .insert(*owner, CaptureRequest::new(*owner, variants));
            }
            host
        }
    }

    impl CaptureHost for TestHost {
        fn capture_slot(&mut self, owner: AvatarId) -> Option<(&mut CaptureRequest, CameraPose)> {
            self.requests
                .get_mut(&owner)
                .map(|r| (r, CameraPose::default()))
        }

        fn capture_completed(&mut self, owner: AvatarId) {
            self.completed.push(owner);
        }
    }

    #[test]
    fn test_image_count_matches_variants() {
        for n in [0, 1, 5] {
            let mut host = TestHost::with(&[(1, n)]);
            let mut pipeline = FrameCapturePipeline::new();
            let mut renderer = CountingRenderer::default();

            pipeline.request_capture(1);
            assert_eq!(pipeline.drain(&mut renderer, &mut host), Ok(1));
            assert_eq!(host.requests[&1].images().len(), n);
            assert_eq!(renderer.calls.len(), n);
        }
    }

    #[test]
    fn test_request_reused_without_shrinking() {
        let mut host = TestHost::with(&[(1, 2)]);
        let mut pipeline = FrameCapturePipeline::new();
        let mut renderer = CountingRenderer::default();

        for _ in 0..3 {
            pipeline.request_capture(1);
            pipeline.drain(&mut renderer, &mut host).unwrap();
        }
        assert_eq!(host.requests[&1].images(), &[vec![5], vec![6]]);
        assert_eq!(host.completed, vec![1, 1, 1]);
    }

    #[test]
    fn test_duplicate_request_queued_once() {
        let mut pipeline = FrameCapturePipeline::new();
        assert!(pipeline.request_capture(4));
        assert!(!pipeline.request_capture(4));
        assert_eq!(pipeline.pending(), 1);

        let mut host = TestHost::with(&[(4, 1)]);
        let mut renderer = CountingRenderer::default();
        assert_eq!(pipeline.drain(&mut renderer, &mut host), Ok(1));
        assert_eq!(host.completed, vec![4]);
    }

    #[test]
    fn test_drain_is_fifo() {
        let mut host = TestHost::with(&[(1, 1), (2, 1), (3, 1)]);
        let mut pipeline = FrameCapturePipeline::new();
        let mut renderer = CountingRenderer::default();

        pipeline.request_capture(3);
        pipeline.request_capture(1);
        pipeline.request_capture(2);
        pipeline.drain(&mut renderer, &mut host).unwrap();

        assert_eq!(host.completed, vec![3, 1, 2]);
    }

    #[test]
    fn test_no_drain_during_render() {
        let mut host = TestHost::with(&[(1, 1)]);
        let mut pipeline = FrameCapturePipeline::new();
        let mut renderer = CountingRenderer::default();

        pipeline.request_capture(1);
        pipeline.begin_render();
        assert_eq!(
            pipeline.drain(&mut renderer, &mut host),
            Err(CaptureError::RenderInProgress)
        );
        assert!(pipeline.is_pending(1));

        pipeline.end_render();
        assert_eq!(pipeline.drain(&mut renderer, &mut host), Ok(1));
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_removed_owner_is_skipped() {
        let mut host = TestHost::with(&[(1, 1)]);
        let mut pipeline = FrameCapturePipeline::new();
        let mut renderer = CountingRenderer::default();

        pipeline.request_capture(9);
        pipeline.request_capture(1);
        assert_eq!(pipeline.drain(&mut renderer, &mut host), Ok(1));
        assert_eq!(host.completed, vec![1]);
    }

    #[test]
    fn test_cancel_removes_pending() {
        let mut pipeline = FrameCapturePipeline::new();
        pipeline.request_capture(1);
        pipeline.request_capture(2);

        assert!(pipeline.cancel(1));
        assert!(!pipeline.cancel(1));
        assert!(!pipeline.is_pending(1));
        assert!(pipeline.is_pending(2));
    }

    #[test]
    fn test_placeholder_renderer_emits_bmp() {
        let mut renderer = PlaceholderRenderer::new(3, 2);
        let camera = CameraPose::default();

        let image = renderer.render_with_variant(None, &camera);
        assert_eq!(&image[..2], b"BM");
        // 3 pixels * 3 bytes padded to 12, two rows
        assert_eq!(image.len(), 54 + 24);
        assert_eq!(
            u32::from_le_bytes([image[2], image[3], image[4], image[5]]) as usize,
            image.len()
        );

        let depth = renderer.render_with_variant(Some("depth"), &camera);
        assert_ne!(image, depth);
        assert_eq!(image, renderer.render_with_variant(None, &camera));
    }
}
