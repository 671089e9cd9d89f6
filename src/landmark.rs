//! Hand landmarks and the feature vectors derived from them.

use std::fmt;

use crate::{image::Image, timer::Timer};

/// Number of landmarks in a complete [`LandmarkSet`].
pub const NUM_LANDMARKS: usize = 21;

/// Number of elements in a [`FeatureVector`] (3 coordinates per landmark).
pub const FEATURE_LEN: usize = NUM_LANDMARKS * 3;

/// A landmark in 3D space.
///
/// X and Y are normalized to the input frame (roughly in range 0.0 to 1.0), Z is the relative depth.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Landmark {
    pos: [f32; 3],
}

impl Landmark {
    pub fn new(position: [f32; 3]) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }
}

/// The landmarks of a single detected hand, in detector-provided index order.
///
/// A well-behaved detector always produces [`NUM_LANDMARKS`] landmarks per hand. Sets with a
/// different number of landmarks are still accepted here, but produce no [`FeatureVector`].
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    landmarks: Box<[Landmark]>,
}

impl LandmarkSet {
    pub fn new<I: IntoIterator<Item = Landmark>>(landmarks: I) -> Self {
        Self {
            landmarks: landmarks.into_iter().collect(),
        }
    }

    /// Creates a landmark set from raw `[x, y, z]` positions.
    pub fn from_positions<I: IntoIterator<Item = [f32; 3]>>(positions: I) -> Self {
        Self::new(positions.into_iter().map(Landmark::new))
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.landmarks.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.landmarks.iter().copied()
    }

    /// Flattens the landmarks into a list of coordinates.
    ///
    /// Landmarks are visited in index order, emitting X, then Y, then Z for each. No transform is
    /// applied to the coordinates.
    pub fn flatten(&self) -> Vec<f32> {
        self.iter().flat_map(|lm| lm.position()).collect()
    }

    /// Converts this landmark set into a model input.
    ///
    /// Returns an error if the set does not contain exactly [`NUM_LANDMARKS`] landmarks.
    pub fn to_features(&self) -> Result<FeatureVector, FeatureLenError> {
        FeatureVector::try_from(self.flatten())
    }
}

/// Fixed-length input to the gesture classifier.
#[derive(Clone, PartialEq)]
pub struct FeatureVector {
    values: Box<[f32; FEATURE_LEN]>,
}

impl FeatureVector {
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..]
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = FeatureLenError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        let len = values.len();
        let values: Box<[f32; FEATURE_LEN]> = values
            .into_boxed_slice()
            .try_into()
            .map_err(|_| FeatureLenError { len })?;
        Ok(Self { values })
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FeatureVector")
            .field(&&self.values[..3])
            .field(&format_args!("..."))
            .finish()
    }
}

/// Error returned when a list of coordinates does not have [`FEATURE_LEN`] elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("feature vector must have 63 elements, got {len}")]
pub struct FeatureLenError {
    len: usize,
}

/// A hand landmark detector.
///
/// Implementations receive one camera frame per call and report the hands they found in it.
pub trait LandmarkDetector: Send {
    /// Detects hands in `frame`.
    ///
    /// Returns an empty list if no hand is visible. Only the first entry is used by the detector.
    fn detect(&mut self, frame: &Image) -> anyhow::Result<Vec<LandmarkSet>>;

    /// Returns the pairs of landmark indices that should be connected when drawing a hand.
    fn topology(&self) -> Option<&[(usize, usize)]> {
        None
    }

    /// Returns profiling timers for the detection steps.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, frame: &Image) -> anyhow::Result<Vec<LandmarkSet>> {
        (**self).detect(frame)
    }

    fn topology(&self) -> Option<&[(usize, usize)]> {
        (**self).topology()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_set(len: usize) -> LandmarkSet {
        LandmarkSet::from_positions(
            (0..len).map(|_| [fastrand::f32(), fastrand::f32(), fastrand::f32() - 0.5]),
        )
    }

    #[test]
    fn flatten_order() {
        let set = random_set(NUM_LANDMARKS);
        let features = set.to_features().unwrap();
        assert_eq!(features.as_slice().len(), FEATURE_LEN);
        for (i, lm) in set.iter().enumerate() {
            assert_eq!(features.as_slice()[i * 3], lm.x());
            assert_eq!(features.as_slice()[i * 3 + 1], lm.y());
            assert_eq!(features.as_slice()[i * 3 + 2], lm.z());
        }
    }

    #[test]
    fn incomplete_set_is_rejected() {
        assert_eq!(
            random_set(20).to_features(),
            Err(FeatureLenError { len: 60 })
        );
        assert!(random_set(22).to_features().is_err());
        assert!(LandmarkSet::new(Vec::new()).to_features().is_err());
    }

    #[test]
    fn feature_vector_from_vec() {
        let values = (0..FEATURE_LEN).map(|i| i as f32).collect::<Vec<_>>();
        let features = FeatureVector::try_from(values.clone()).unwrap();
        assert_eq!(features.as_slice(), &values[..]);
        assert!(FeatureVector::try_from(vec![0.0; 62]).is_err());
    }
}
