use std::fmt;

bitflags::bitflags! {
    /// Capabilities a session can run each acquisition cycle.
    ///
    /// Every flag owns a distinct bit. Older releases of the camera plugin
    /// declared the hand cursor as `0x16`, which overlaps three other flags;
    /// that layout is not reproduced here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(C)]
    pub struct Features: u32 {
        const CAMERA_STREAMING = 1 << 0;
        const SCAN_3D          = 1 << 1;
        const HEAD_TRACKING    = 1 << 2;
        const SEGMENTATION_3D  = 1 << 3;
        const HAND_CURSOR      = 1 << 4;
        const BLOB_TRACKING    = 1 << 5;
    }
}

impl Features {
    /// Parse a single feature name as used in configuration strings.
    pub fn parse_name(name: &str) -> Option<Features> {
        match name.trim().to_ascii_lowercase().as_str() {
            "camera" | "camera_streaming" | "streaming" => Some(Features::CAMERA_STREAMING),
            "scan" | "scan_3d" | "scan3d" => Some(Features::SCAN_3D),
            "head" | "head_tracking" | "face" => Some(Features::HEAD_TRACKING),
            "segmentation" | "segmentation_3d" | "seg" => Some(Features::SEGMENTATION_3D),
            "cursor" | "hand_cursor" | "hand" => Some(Features::HAND_CURSOR),
            "blob" | "blob_tracking" => Some(Features::BLOB_TRACKING),
            _ => None,
        }
    }
}

/// Pixel layouts exchanged with the device.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, three bytes per pixel.
    Rgb24,
    /// Packed 8-bit RGBA, four bytes per pixel.
    Rgba8,
    /// 16-bit little-endian depth in millimetres.
    Depth16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Depth16 => 2,
        }
    }
}

/// Width, height and frame rate of one camera stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamResolution {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub format: PixelFormat,
}

impl StreamResolution {
    pub const fn new(width: u32, height: u32, fps: f32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for StreamResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.width, self.height, self.fps)
    }
}

/// Color stream resolutions supported by the camera family.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorResolution {
    Res1920x1080x30,
    Res1280x720x30,
    Res640x480x60,
    Res640x480x30,
    Res320x240x60,
    Res320x240x30,
}

impl ColorResolution {
    pub const ALL: [ColorResolution; 6] = [
        ColorResolution::Res1920x1080x30,
        ColorResolution::Res1280x720x30,
        ColorResolution::Res640x480x60,
        ColorResolution::Res640x480x30,
        ColorResolution::Res320x240x60,
        ColorResolution::Res320x240x30,
    ];

    /// Color streams are delivered as RGB and widened to RGBA when copied.
    pub fn value(self) -> StreamResolution {
        let (w, h, fps) = match self {
            ColorResolution::Res1920x1080x30 => (1920, 1080, 30.0),
            ColorResolution::Res1280x720x30 => (1280, 720, 30.0),
            ColorResolution::Res640x480x60 => (640, 480, 60.0),
            ColorResolution::Res640x480x30 => (640, 480, 30.0),
            ColorResolution::Res320x240x60 => (320, 240, 60.0),
            ColorResolution::Res320x240x30 => (320, 240, 30.0),
        };
        StreamResolution::new(w, h, fps, PixelFormat::Rgb24)
    }

    pub fn label(self) -> &'static str {
        match self {
            ColorResolution::Res1920x1080x30 => "1920 x 1080 x 30",
            ColorResolution::Res1280x720x30 => "1280 x 720 x 30",
            ColorResolution::Res640x480x60 => "640 x 480 x 60",
            ColorResolution::Res640x480x30 => "640 x 480 x 30",
            ColorResolution::Res320x240x60 => "320 x 240 x 60",
            ColorResolution::Res320x240x30 => "320 x 240 x 30",
        }
    }

    /// Parse `WIDTHxHEIGHTxFPS`, e.g. `640x480x30`.
    pub fn parse(s: &str) -> Option<ColorResolution> {
        let key = normalize_resolution(s);
        Self::ALL
            .into_iter()
            .find(|r| normalize_resolution(r.label()) == key)
    }
}

impl fmt::Display for ColorResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Depth stream resolutions. F200 modes are only served by front-facing
/// cameras, the rest only by the world-facing R200.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthResolution {
    Res640x480x60,
    Res640x480x30,
    Res628x468x90,
    Res628x468x60,
    Res628x468x30,
    Res480x360x90,
    Res480x360x60,
    Res480x360x30,
    Res320x240x90,
    Res320x240x60,
    Res320x240x30,
}

impl DepthResolution {
    pub const ALL: [DepthResolution; 11] = [
        DepthResolution::Res640x480x60,
        DepthResolution::Res640x480x30,
        DepthResolution::Res628x468x90,
        DepthResolution::Res628x468x60,
        DepthResolution::Res628x468x30,
        DepthResolution::Res480x360x90,
        DepthResolution::Res480x360x60,
        DepthResolution::Res480x360x30,
        DepthResolution::Res320x240x90,
        DepthResolution::Res320x240x60,
        DepthResolution::Res320x240x30,
    ];

    pub fn value(self) -> StreamResolution {
        let (w, h, fps) = match self {
            DepthResolution::Res640x480x60 => (640, 480, 60.0),
            DepthResolution::Res640x480x30 => (640, 480, 30.0),
            DepthResolution::Res628x468x90 => (628, 468, 90.0),
            DepthResolution::Res628x468x60 => (628, 468, 60.0),
            DepthResolution::Res628x468x30 => (628, 468, 30.0),
            DepthResolution::Res480x360x90 => (480, 360, 90.0),
            DepthResolution::Res480x360x60 => (480, 360, 60.0),
            DepthResolution::Res480x360x30 => (480, 360, 30.0),
            DepthResolution::Res320x240x90 => (320, 240, 90.0),
            DepthResolution::Res320x240x60 => (320, 240, 60.0),
            DepthResolution::Res320x240x30 => (320, 240, 30.0),
        };
        StreamResolution::new(w, h, fps, PixelFormat::Depth16)
    }

    pub fn label(self) -> &'static str {
        match self {
            DepthResolution::Res640x480x60 => "640 x 480 x 60 (F200)",
            DepthResolution::Res640x480x30 => "640 x 480 x 30 (F200)",
            DepthResolution::Res628x468x90 => "628 x 468 x 90 (R200)",
            DepthResolution::Res628x468x60 => "628 x 468 x 60 (R200)",
            DepthResolution::Res628x468x30 => "628 x 468 x 30 (R200)",
            DepthResolution::Res480x360x90 => "480 x 360 x 90 (R200)",
            DepthResolution::Res480x360x60 => "480 x 360 x 60 (R200)",
            DepthResolution::Res480x360x30 => "480 x 360 x 30 (R200)",
            DepthResolution::Res320x240x90 => "320 x 240 x 90 (R200)",
            DepthResolution::Res320x240x60 => "320 x 240 x 60 (R200)",
            DepthResolution::Res320x240x30 => "320 x 240 x 30 (R200)",
        }
    }

    /// Camera model that serves this mode.
    pub fn model(self) -> CameraModel {
        match self {
            DepthResolution::Res640x480x60 | DepthResolution::Res640x480x30 => CameraModel::F200,
            _ => CameraModel::R200,
        }
    }

    /// Parse `WIDTHxHEIGHTxFPS`, e.g. `640x480x30`.
    pub fn parse(s: &str) -> Option<DepthResolution> {
        let key = normalize_resolution(s);
        Self::ALL.into_iter().find(|r| {
            let v = r.value();
            format!("{}x{}x{}", v.width, v.height, v.fps) == key
        })
    }
}

impl fmt::Display for DepthResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Paired color/depth modes used by the user segmentation middleware.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentationResolution {
    Color640x360,
    Color960x540,
    Color1280x720,
    Color320x240,
    Color640x480,
}

impl SegmentationResolution {
    /// Returns `(color, depth)`; depth is always 640 x 480.
    pub fn value(self) -> (StreamResolution, StreamResolution) {
        let (w, h) = match self {
            SegmentationResolution::Color640x360 => (640, 360),
            SegmentationResolution::Color960x540 => (960, 540),
            SegmentationResolution::Color1280x720 => (1280, 720),
            SegmentationResolution::Color320x240 => (320, 240),
            SegmentationResolution::Color640x480 => (640, 480),
        };
        (
            StreamResolution::new(w, h, 30.0, PixelFormat::Rgb24),
            StreamResolution::new(640, 480, 30.0, PixelFormat::Depth16),
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            SegmentationResolution::Color640x360 => "color:  640 x 360, depth: 640 x 480",
            SegmentationResolution::Color960x540 => "color:  960 x 540, depth: 640 x 480",
            SegmentationResolution::Color1280x720 => "color: 1280 x 720, depth: 640 x 480",
            SegmentationResolution::Color320x240 => "color:  320 x 240, depth: 640 x 480",
            SegmentationResolution::Color640x480 => "color:  640 x 480, depth: 640 x 480",
        }
    }
}

fn normalize_resolution(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Supported camera models.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraModel {
    /// No camera attached.
    None,
    /// Front-facing.
    F200,
    /// Short-range.
    SR300,
    /// World-facing.
    R200,
    Other,
}

impl CameraModel {
    pub fn is_supported(self) -> bool {
        matches!(self, CameraModel::F200 | CameraModel::SR300 | CameraModel::R200)
    }

    pub fn label(self) -> &'static str {
        match self {
            CameraModel::None => " ",
            CameraModel::F200 => "Front-Facing (F200)",
            CameraModel::SR300 => "Short-Range (SR300)",
            CameraModel::R200 => "World-Facing (R200)",
            CameraModel::Other => "Unknown Camera Model",
        }
    }
}

/// Which camera stream a query refers to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Color,
    Depth,
}

/// Device identification reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub model: CameraModel,
    pub firmware: [u16; 4],
    /// Color field of view in degrees (horizontal, vertical).
    pub color_fov: (f32, f32),
    /// Depth field of view in degrees (horizontal, vertical).
    pub depth_fov: (f32, f32),
}

impl DeviceDescriptor {
    pub fn firmware_string(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.firmware[0], self.firmware[1], self.firmware[2], self.firmware[3]
        )
    }
}

/// 3D scanning target.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Object resting on a detected planar surface.
    Object,
    Face,
}

/// Mesh formats the scanning middleware can reconstruct to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFileFormat {
    Obj,
}

/// Scanning middleware configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfiguration {
    pub mode: ScanMode,
    pub solidify: bool,
    pub texture: bool,
    pub start_scan: bool,
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        Self {
            mode: ScanMode::Object,
            solidify: false,
            texture: false,
            start_scan: false,
        }
    }
}

/// Volume the scanning middleware accumulates into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanVolume {
    /// Width, height and depth of the bounding box in metres.
    pub bounding_box: [f32; 3],
    /// Voxel resolution along each axis.
    pub resolution: u32,
}

/// Side of the body a hand cursor belongs to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodySide {
    Unknown,
    Left,
    Right,
}

/// Hand slots in a frame's cursor table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left = 0,
    Right = 1,
}

impl Hand {
    pub fn from_side(side: BodySide) -> Option<Hand> {
        match side {
            BodySide::Left => Some(Hand::Left),
            BodySide::Right => Some(Hand::Right),
            BodySide::Unknown => None,
        }
    }
}

/// Gestures reported by the hand cursor middleware.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Click = 0,
    ClockwiseCircle = 1,
    CounterClockwiseCircle = 2,
    HandOpening = 3,
    HandClosing = 4,
}

impl GestureKind {
    pub const COUNT: usize = 5;
}

/// Alerts raised by the hand cursor middleware.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    CursorDetected = 1,
    CursorNotDetected = 2,
    CursorInsideBorders = 3,
    CursorOutOfBorders = 4,
    CursorTooClose = 5,
    CursorTooFar = 6,
    CursorOutOfLeftBorder = 7,
    CursorOutOfRightBorder = 8,
    CursorOutOfTopBorder = 9,
    CursorOutOfBottomBorder = 10,
    CursorEngaged = 11,
    CursorDisengaged = 12,
}
