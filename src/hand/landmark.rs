//! Hand landmark prediction with MediaPipe's hand landmark network.
//!
//! The network expects a cropped hand. Without a palm detector in front of it, the whole camera
//! frame is stretched to the network's input size, which works well enough when the hand fills a
//! good portion of the frame.

use anyhow::bail;

use crate::{
    image::{Color, Image, Resolution},
    landmark::{LandmarkDetector, LandmarkSet, NUM_LANDMARKS},
    nn::{NeuralNetwork, SessionOptions, Tensor},
    timer::Timer,
};

use super::CONNECTIVITY;

/// Default presence threshold below which a hand is considered absent.
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.5;

/// Describes in what order a network expects its input image data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputShape {
    /// Shape is `[1, 3, H, W]`.
    Nchw,
    /// Shape is `[1, H, W, 3]`.
    Nhwc,
}

impl InputShape {
    fn detect(shape: &[usize]) -> anyhow::Result<(Self, Resolution)> {
        let (layout, w, h) = match *shape {
            [1, 3, h, w] => (Self::Nchw, w, h),
            [1, h, w, 3] => (Self::Nhwc, w, h),
            _ => bail!("invalid hand landmark model input shape {:?}", shape),
        };
        Ok((layout, Resolution::new(w.try_into()?, h.try_into()?)))
    }
}

/// Maps an sRGB color to the `0.0..=1.0` range the network expects.
fn map_color(color: Color) -> [f32; 3] {
    [color.r(), color.g(), color.b()].map(|c| c as f32 / 255.0)
}

/// A [`LandmarkDetector`] running the MediaPipe hand landmark network via tract.
pub struct OnnxHandLandmarker {
    nn: NeuralNetwork,
    layout: InputShape,
    input_res: Resolution,
    presence_threshold: f32,
    t_infer: Timer,
}

impl OnnxHandLandmarker {
    /// Loads the hand landmark network from in-memory ONNX data.
    pub fn from_onnx(data: &[u8], options: SessionOptions) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_onnx(data).with_options(options).load()?;
        Self::new(nn)
    }

    fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            bail!(
                "hand landmark network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }
        if nn.num_outputs() < 2 {
            bail!(
                "hand landmark network has to have at least 2 outputs, this one has {}",
                nn.num_outputs(),
            );
        }
        let shape = match nn.input_shape(0) {
            Some(shape) => shape,
            None => bail!("hand landmark network input shape is not concrete"),
        };
        let (layout, input_res) = InputShape::detect(shape)?;
        log::debug!("hand landmark network: {layout:?} input at {input_res}");

        Ok(Self {
            nn,
            layout,
            input_res,
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            t_infer: Timer::new("hand landmarks"),
        })
    }

    /// Sets the minimum presence score required to report a hand.
    pub fn set_presence_threshold(&mut self, threshold: f32) {
        self.presence_threshold = threshold;
    }

    fn input_tensor(&self, frame: &Image) -> Tensor {
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let sample = |x: usize, y: usize| {
            let sx = (x * frame.width() as usize / w) as u32;
            let sy = (y * frame.height() as usize / h) as u32;
            map_color(frame.get(sx, sy))
        };

        match self.layout {
            InputShape::Nchw => Tensor::from_iter(
                &[1, 3, h, w],
                (0..3).flat_map(|c| {
                    (0..h).flat_map(move |y| (0..w).map(move |x| sample(x, y)[c]))
                }),
            ),
            InputShape::Nhwc => Tensor::from_iter(
                &[1, h, w, 3],
                (0..h).flat_map(|y| (0..w).flat_map(move |x| sample(x, y))),
            ),
        }
    }
}

/// Turns the raw network outputs into a normalized landmark set.
///
/// `screen` holds `x, y, z` triples in input pixel coordinates. X and Y are divided by the input
/// width and height, Z by the input width.
fn extract(
    screen: &[f32],
    presence: f32,
    threshold: f32,
    input_res: Resolution,
) -> anyhow::Result<Option<LandmarkSet>> {
    if screen.len() != NUM_LANDMARKS * 3 {
        bail!(
            "expected {} landmark coordinates, got {}",
            NUM_LANDMARKS * 3,
            screen.len()
        );
    }
    if presence < threshold {
        return Ok(None);
    }

    let (w, h) = (input_res.width() as f32, input_res.height() as f32);
    Ok(Some(LandmarkSet::from_positions(
        screen.chunks_exact(3).map(|c| [c[0] / w, c[1] / h, c[2] / w]),
    )))
}

impl LandmarkDetector for OnnxHandLandmarker {
    fn detect(&mut self, frame: &Image) -> anyhow::Result<Vec<LandmarkSet>> {
        if !frame.resolution().is_usable() {
            return Ok(Vec::new());
        }

        let input = self.input_tensor(frame);
        let outputs = self.t_infer.time(|| self.nn.estimate(&[input]))?;

        let screen = match outputs[0].as_floats() {
            Some(screen) => screen,
            None => bail!("unexpected landmark output {:?}", outputs[0]),
        };
        let presence = match outputs[1].as_floats() {
            Some([presence]) => *presence,
            _ => bail!("unexpected presence output {:?}", outputs[1]),
        };

        let hand = extract(screen, presence, self.presence_threshold, self.input_res)?;
        Ok(hand.into_iter().collect())
    }

    fn topology(&self) -> Option<&[(usize, usize)]> {
        Some(CONNECTIVITY)
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_infer]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn input_shape() {
        assert_eq!(
            InputShape::detect(&[1, 3, 224, 224]).unwrap(),
            (InputShape::Nchw, Resolution::new(224, 224))
        );
        assert_eq!(
            InputShape::detect(&[1, 256, 192, 3]).unwrap(),
            (InputShape::Nhwc, Resolution::new(192, 256))
        );
        assert!(InputShape::detect(&[1, 63]).is_err());
    }

    #[test]
    fn color_range() {
        assert_eq!(map_color(Color::BLACK), [0.0, 0.0, 0.0]);
        assert_eq!(map_color(Color::WHITE), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn normalizes_coordinates() {
        let res = Resolution::new(224, 224);
        let screen = (0..NUM_LANDMARKS)
            .flat_map(|i| [i as f32 * 10.0, 112.0, 22.4])
            .collect::<Vec<_>>();
        let set = extract(&screen, 0.9, 0.5, res).unwrap().unwrap();
        assert_eq!(set.len(), NUM_LANDMARKS);
        let lm = set.get(2).unwrap();
        assert_relative_eq!(lm.x(), 20.0 / 224.0);
        assert_relative_eq!(lm.y(), 0.5);
        assert_relative_eq!(lm.z(), 0.1);
    }

    #[test]
    fn low_presence_means_no_hand() {
        let screen = vec![0.0; NUM_LANDMARKS * 3];
        let res = Resolution::new(224, 224);
        assert_eq!(extract(&screen, 0.2, 0.5, res).unwrap(), None);
        assert!(extract(&screen[..60], 0.9, 0.5, res).is_err());
    }
}
