pub const MIN_SCALE: f32 = 1.0;
pub const MAX_SCALE: f32 = 4.0;
pub const ZOOM_STEP: f32 = 0.5;
/// Zooming out to this scale or below recenters the image.
pub const RECENTER_THRESHOLD: f32 = 1.5;
const WHEEL_SENSITIVITY: f32 = 0.01;
const WHEEL_DAMPING: f32 = 0.5;
const PINCH_SENSITIVITY: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Self) -> Self::Output {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Zoom and pan applied to the displayed image. `translate` is in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    pub translate: Point,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: MIN_SCALE,
            translate: Point::ZERO,
        }
    }
}

impl ViewTransform {
    pub fn is_zoomed(&self) -> bool {
        self.scale > MIN_SCALE
    }

    /// Render step: `scale(s)` outer, then `translate(tx / s, ty / s)` in pre-scale units.
    pub fn render(&self) -> RenderTransform {
        RenderTransform {
            scale: self.scale,
            translate_x: self.translate.x / self.scale,
            translate_y: self.translate.y / self.scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTransform {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl RenderTransform {
    /// Screen-space offset of the image center once the scale is applied.
    pub fn screen_offset(&self) -> Point {
        Point::new(self.translate_x * self.scale, self.translate_y * self.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragState {
    origin: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PinchState {
    last_distance: f32,
}

/// Converts wheel, drag and pinch input into a bounded [`ViewTransform`].
#[derive(Debug, Clone, Default)]
pub struct GestureEngine {
    transform: ViewTransform,
    image_id: Option<String>,
    drag: Option<DragState>,
    pinch: Option<PinchState>,
}

impl GestureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_image(image_id: &str) -> Self {
        let mut engine = Self::new();
        engine.image_id = Some(image_id.to_string());
        engine
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn can_zoom_in(&self) -> bool {
        self.transform.scale < MAX_SCALE
    }

    pub fn can_zoom_out(&self) -> bool {
        self.transform.scale > MIN_SCALE
    }

    pub fn zoom_in(&mut self) {
        self.transform.scale = (self.transform.scale + ZOOM_STEP).min(MAX_SCALE);
    }

    pub fn zoom_out(&mut self) {
        self.transform.scale = (self.transform.scale - ZOOM_STEP).max(MIN_SCALE);
        if self.transform.scale <= RECENTER_THRESHOLD {
            self.transform.translate = Point::ZERO;
        }
    }

    pub fn on_wheel(&mut self, delta_y: f32) {
        let delta = -delta_y * WHEEL_SENSITIVITY * WHEEL_DAMPING;
        self.set_scale_clamped(self.transform.scale + delta);
    }

    pub fn on_drag_start(&mut self, pointer: Point) {
        if !self.transform.is_zoomed() {
            return;
        }
        self.drag = Some(DragState {
            origin: pointer - self.transform.translate,
        });
    }

    pub fn on_drag_move(&mut self, pointer: Point) {
        let Some(drag) = self.drag else {
            return;
        };
        if !self.transform.is_zoomed() {
            return;
        }
        self.transform.translate = pointer - drag.origin;
    }

    pub fn on_drag_end(&mut self) {
        self.drag = None;
    }

    pub fn on_pinch_update(&mut self, distance: f32) {
        if let Some(pinch) = self.pinch {
            let delta = (distance - pinch.last_distance) * PINCH_SENSITIVITY;
            self.set_scale_clamped(self.transform.scale + delta);
        }
        self.pinch = Some(PinchState {
            last_distance: distance,
        });
    }

    pub fn on_touch_end(&mut self, remaining_touches: usize) {
        if remaining_touches < 2 {
            self.pinch = None;
        }
        if remaining_touches == 0 {
            self.drag = None;
        }
        if self.transform.scale <= MIN_SCALE {
            self.recenter();
        }
    }

    /// Resets zoom, pan and transient gesture state when the displayed image changes.
    /// Returns `true` if a reset happened.
    pub fn reset_for_new_image(&mut self, image_id: &str) -> bool {
        if self.image_id.as_deref() == Some(image_id) {
            return false;
        }
        self.image_id = Some(image_id.to_string());
        self.reset();
        true
    }

    pub fn reset(&mut self) {
        self.transform = ViewTransform::default();
        self.drag = None;
        self.pinch = None;
    }

    fn set_scale_clamped(&mut self, scale: f32) {
        if scale.is_nan() {
            return;
        }
        self.transform.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        if self.transform.scale <= MIN_SCALE {
            self.recenter();
        }
    }

    fn recenter(&mut self) {
        self.transform.translate = Point::ZERO;
        self.drag = None;
    }
}
