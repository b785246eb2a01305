use serde::{Deserialize, Serialize};

/// Grid overlay spacing baked into the capture, in image pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSpec {
    pub minor: u32,
    pub major: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self { minor: 10, major: 100 }
    }
}

/// Geometry of one capture: image size, offset of the captured region within
/// the virtual desktop, and the grid/scale the planner was shown. Snapshot is
/// taken once per orchestration cycle and discarded with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub width: u32,
    pub height: u32,
    pub origin_left: i32,
    pub origin_top: i32,
    pub capture_mode: String,
    pub grid: GridSpec,
    pub scale: f64,
}

/// Maps image-local coordinates to device coordinates. Scripts address the
/// screenshot; input injection addresses the virtual desktop, and the two only
/// coincide when the capture started at (0, 0). Reconfigured exactly once per
/// cycle, before any action resolves its click point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenOrigin {
    left: i32,
    top: i32,
}

impl ScreenOrigin {
    pub fn set(&mut self, left: i32, top: i32) {
        self.left = left;
        self.top = top;
    }

    pub fn to_device(&self, x: f64, y: f64) -> (i32, i32) {
        (x.round() as i32 + self.left, y.round() as i32 + self.top)
    }
}
