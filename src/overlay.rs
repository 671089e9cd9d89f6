//! Rendering of the annotated camera view.

use crate::{
    image::{draw, Color, Image},
    landmark::LandmarkSet,
    timer::Timer,
};

const CONNECTOR_COLOR: Color = Color::GREEN;
const CONNECTOR_WIDTH: u32 = 3;
const MARKER_COLOR: Color = Color::RED;

/// Draws the detected hand skeleton onto camera frames.
pub struct OverlayRenderer {
    mirror: bool,
    show_label: bool,
    t_render: Timer,
}

impl OverlayRenderer {
    /// Creates a renderer.
    ///
    /// If `mirror` is set, rendered frames are flipped horizontally, which makes a front-facing
    /// camera behave like a mirror.
    pub fn new(mirror: bool) -> Self {
        Self {
            mirror,
            show_label: true,
            t_render: Timer::new("overlay"),
        }
    }

    /// Sets whether the current label is drawn onto the frame.
    pub fn show_label(&mut self, show: bool) {
        self.show_label = show;
    }

    pub fn timer(&self) -> &Timer {
        &self.t_render
    }

    /// Renders `frame` with the landmarks of `hand` on top of it.
    ///
    /// Connector lines are only drawn if a `topology` is known. Landmark coordinates are
    /// normalized, so the overlay always has the frame's size.
    pub fn render(
        &self,
        frame: &Image,
        hand: Option<&LandmarkSet>,
        topology: Option<&[(usize, usize)]>,
        label: Option<&str>,
    ) -> Image {
        let _guard = self.t_render.start();
        let mut target = frame.clone();
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let to_px = |x: f32, y: f32| ((x * w).round() as i32, (y * h).round() as i32);

        if let Some(hand) = hand {
            for &(a, b) in topology.unwrap_or(&[]) {
                let (Some(a), Some(b)) = (hand.get(a), hand.get(b)) else {
                    continue;
                };
                let (ax, ay) = to_px(a.x(), a.y());
                let (bx, by) = to_px(b.x(), b.y());
                draw::line(&mut target, ax, ay, bx, by)
                    .color(CONNECTOR_COLOR)
                    .stroke_width(CONNECTOR_WIDTH);
            }
            for lm in hand.iter() {
                let (x, y) = to_px(lm.x(), lm.y());
                draw::marker(&mut target, x, y).color(MARKER_COLOR);
            }
        }

        if self.mirror {
            target.flip_horizontal_in_place();
        }

        // Text goes on last so it stays readable in mirrored frames.
        if let (true, Some(label)) = (self.show_label, label) {
            let x = target.width() as i32 / 2;
            draw::text(&mut target, x, 8, label).align_top();
        }

        target
    }
}
