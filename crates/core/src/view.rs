/// Visible window over the loaded file and the time/pixel mapping.
///
/// All inputs are clamped: the range always satisfies
/// `0 <= start <= end <= length` and never shows less than `1 / max zoom`
/// of the file.
#[derive(Debug, Clone)]
pub struct ViewModel {
    length: f64,
    start: f64,
    end: f64,
    width: f32,
    max_zoom_percent: f64,
    follow: bool,
    /// Transport state as of the last refresh.
    position: f64,
    playing: bool,
}

impl ViewModel {
    pub fn new(max_zoom_percent: u32, follow: bool) -> Self {
        Self {
            length: 0.0,
            start: 0.0,
            end: 0.0,
            width: 0.0,
            max_zoom_percent: max_zoom_percent.max(100) as f64,
            follow,
            position: 0.0,
            playing: false,
        }
    }

    /// Show the whole of a newly loaded file.
    pub fn reset(&mut self, length: f64) {
        self.length = length.max(0.0);
        self.start = 0.0;
        self.end = self.length;
        self.position = 0.0;
        self.playing = false;
    }

    pub fn clear(&mut self) {
        self.reset(0.0);
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn range(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    pub fn visible_length(&self) -> f64 {
        self.end - self.start
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = width.max(0.0);
    }

    fn min_zoom(&self) -> f64 {
        100.0 / self.max_zoom_percent
    }

    /// Fraction of the file currently visible.
    pub fn zoom(&self) -> f64 {
        if self.length <= 0.0 {
            return 1.0;
        }
        self.visible_length() / self.length
    }

    pub fn zoom_percent(&self) -> f64 {
        100.0 / self.zoom()
    }

    /// Show `fraction` of the file. `anchor` (seconds, usually the transport
    /// position) keeps its place on screen when visible and is centred
    /// otherwise; without one the current midpoint is kept.
    pub fn set_zoom(&mut self, fraction: f64, anchor: Option<f64>) {
        if self.length <= 0.0 || fraction.is_nan() {
            return;
        }
        let visible = self.length * fraction.clamp(self.min_zoom(), 1.0);
        let current = self.visible_length();
        let anchor = anchor
            .filter(|a| a.is_finite())
            .unwrap_or(self.start + current / 2.0)
            .clamp(0.0, self.length);

        let relative = if current > 0.0 && anchor >= self.start && anchor <= self.end {
            (anchor - self.start) / current
        } else {
            0.5
        };
        self.place(anchor - relative * visible, visible);
    }

    /// Zoom as a percentage of the full length: 100 shows everything.
    pub fn set_zoom_percent(&mut self, percent: f64, anchor: Option<f64>) {
        if percent.is_nan() {
            return;
        }
        self.set_zoom(100.0 / percent.max(100.0), anchor);
    }

    /// Pinch gesture: scales the zoom percentage by `scale²`.
    pub fn magnify(&mut self, scale: f64, anchor: Option<f64>) {
        let percent = self.zoom_percent() * scale * scale;
        self.set_zoom_percent(percent.min(self.max_zoom_percent), anchor);
    }

    pub fn set_range(&mut self, start: f64, end: f64) {
        if self.length <= 0.0 || !start.is_finite() || !end.is_finite() {
            return;
        }
        let visible = (end - start).clamp(self.length * self.min_zoom(), self.length);
        self.place(start, visible);
    }

    /// Wheel gesture: pans by a tenth of the visible length per unit of
    /// `delta`. Positive deltas move toward the start of the file.
    pub fn scroll(&mut self, delta: f64) {
        if self.length <= 0.0 || !delta.is_finite() || !self.can_move_transport() {
            return;
        }
        let visible = self.visible_length();
        self.place(self.start - delta * visible / 10.0, visible);
    }

    /// Per-tick update from the transport. While following a playing
    /// transport the window is centred on the position.
    pub fn refresh(&mut self, position: f64, playing: bool) {
        self.position = position;
        self.playing = playing;
        if !self.can_move_transport() {
            let visible = self.visible_length();
            self.place(position - visible / 2.0, visible);
        }
    }

    pub fn set_follow_transport(&mut self, follow: bool) {
        self.follow = follow;
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    /// False while the view is locked to a playing transport.
    pub fn can_move_transport(&self) -> bool {
        !(self.follow && self.playing)
    }

    fn place(&mut self, start: f64, visible: f64) {
        let start = start.clamp(0.0, (self.length - visible).max(0.0));
        self.start = start;
        self.end = (start + visible).min(self.length);
    }

    pub fn time_to_x(&self, time: f64) -> f32 {
        let visible = self.visible_length();
        if visible <= 0.0 {
            return 0.0;
        }
        (self.width as f64 * (time - self.start) / visible) as f32
    }

    pub fn x_to_time(&self, x: f32) -> f64 {
        if self.width <= 0.0 {
            return self.start;
        }
        (x as f64 / self.width as f64) * self.visible_length() + self.start
    }

    /// Cursor pixel for the position of the last refresh.
    pub fn cursor_x(&self) -> f32 {
        self.time_to_x(self.position)
    }

    pub fn position(&self) -> f64 {
        self.position
    }
}
