use crate::backend::{AlertEvent, BlobExtremities};
use crate::types::{BodySide, Features, GestureKind, Hand, StreamResolution};

/// Row-major image with `C` interleaved channels of `T`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageBuffer<T, const C: usize> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

/// RGBA8 image: color, segmentation and scan preview.
pub type RgbaBuffer = ImageBuffer<u8, 4>;

/// Depth in millimetres.
pub type DepthBuffer = ImageBuffer<u16, 1>;

impl<T: Copy + Default, const C: usize> ImageBuffer<T, C> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width as usize * height as usize * C],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Reallocate to the given size and zero every element.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data
            .resize(width as usize * height as usize * C, T::default());
    }

    /// Zero every element, keeping the size.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
    }

    /// Resize only when the dimensions differ. Returns true if it resized.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.dimensions() == (width, height) {
            return false;
        }
        self.resize(width, height);
        true
    }
}

/// Buffer sizes every frame of a triad must share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameLayout {
    pub color: (u32, u32),
    pub depth: (u32, u32),
    pub scan: (u32, u32),
}

impl FrameLayout {
    pub fn with_color(mut self, res: &StreamResolution) -> Self {
        self.color = (res.width, res.height);
        self
    }

    pub fn with_depth(mut self, res: &StreamResolution) -> Self {
        self.depth = (res.width, res.height);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadState {
    pub count: u32,
    pub position: [f32; 3],
    /// Pitch, yaw, roll in degrees.
    pub rotation: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CursorState {
    pub position: [f32; 3],
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureState {
    pub fired: bool,
    pub side: BodySide,
}

impl Default for GestureState {
    fn default() -> Self {
        Self {
            fired: false,
            side: BodySide::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlobState {
    pub count: u32,
    /// Pixel count of the largest blob.
    pub pixel_count: u32,
    /// Extremities of the largest blob.
    pub extremities: BlobExtremities,
}

/// Everything one acquisition cycle produced.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    pub sequence_number: u64,
    pub color_image: RgbaBuffer,
    pub depth_image: DepthBuffer,
    pub scan_preview: RgbaBuffer,
    pub segmented_image: RgbaBuffer,
    pub head: HeadState,
    pub cursors: [CursorState; 2],
    pub gestures: [GestureState; GestureKind::COUNT],
    pub alerts: Vec<AlertEvent>,
    pub blobs: BlobState,
}

impl DataFrame {
    pub fn with_layout(layout: &FrameLayout) -> Self {
        let mut frame = Self::default();
        frame.apply_layout(layout);
        frame
    }

    /// Resize every image buffer to `layout`, zero-filled.
    pub fn apply_layout(&mut self, layout: &FrameLayout) {
        self.color_image.resize(layout.color.0, layout.color.1);
        self.segmented_image.resize(layout.color.0, layout.color.1);
        self.depth_image.resize(layout.depth.0, layout.depth.1);
        self.scan_preview.resize(layout.scan.0, layout.scan.1);
    }

    /// Clear the per-cycle tracking results. Image buffers are left as is.
    pub fn reset_tracking(&mut self) {
        self.head = HeadState::default();
        self.cursors = [CursorState::default(); 2];
        self.gestures = [GestureState::default(); GestureKind::COUNT];
        self.alerts.clear();
        self.blobs = BlobState::default();
    }

    /// Zero the images owned by `features`. Called for every feature that
    /// produced nothing this cycle, so the frame never carries older pixels
    /// under a newer sequence number.
    pub fn clear_images(&mut self, features: Features) {
        if features.contains(Features::CAMERA_STREAMING) {
            self.color_image.clear();
            self.depth_image.clear();
        }
        if features.contains(Features::SEGMENTATION_3D) {
            self.segmented_image.clear();
        }
        if features.contains(Features::SCAN_3D) {
            self.scan_preview.clear();
        }
    }

    pub fn cursor(&self, hand: Hand) -> CursorState {
        self.cursors[hand as usize]
    }

    pub fn gesture(&self, kind: GestureKind) -> GestureState {
        self.gestures[kind as usize]
    }
}
