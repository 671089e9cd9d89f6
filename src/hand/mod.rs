//! Hand topology and landmark estimation.

pub mod landmark;

/// Names for the hand pose landmarks, in the order hand landmark detectors report them.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Pairs of landmark indices forming the hand skeleton.
pub const CONNECTIVITY: &[(usize, usize)] = {
    use LandmarkIdx::*;
    &[
        // Thumb:
        (Wrist as usize, ThumbCmc as usize),
        (ThumbCmc as usize, ThumbMcp as usize),
        (ThumbMcp as usize, ThumbIp as usize),
        (ThumbIp as usize, ThumbTip as usize),
        // Index:
        (Wrist as usize, IndexFingerMcp as usize),
        (IndexFingerMcp as usize, IndexFingerPip as usize),
        (IndexFingerPip as usize, IndexFingerDip as usize),
        (IndexFingerDip as usize, IndexFingerTip as usize),
        // Middle:
        (IndexFingerMcp as usize, MiddleFingerMcp as usize),
        (MiddleFingerMcp as usize, MiddleFingerPip as usize),
        (MiddleFingerPip as usize, MiddleFingerDip as usize),
        (MiddleFingerDip as usize, MiddleFingerTip as usize),
        // Ring:
        (MiddleFingerMcp as usize, RingFingerMcp as usize),
        (RingFingerMcp as usize, RingFingerPip as usize),
        (RingFingerPip as usize, RingFingerDip as usize),
        (RingFingerDip as usize, RingFingerTip as usize),
        // Pinky:
        (RingFingerMcp as usize, PinkyMcp as usize),
        (Wrist as usize, PinkyMcp as usize),
        (PinkyMcp as usize, PinkyPip as usize),
        (PinkyPip as usize, PinkyDip as usize),
        (PinkyDip as usize, PinkyTip as usize),
    ]
};

#[cfg(test)]
mod tests {
    use crate::landmark::NUM_LANDMARKS;

    use super::*;

    #[test]
    fn connectivity_in_range() {
        assert_eq!(LandmarkIdx::PinkyTip as usize, NUM_LANDMARKS - 1);
        for &(a, b) in CONNECTIVITY {
            assert!(a < NUM_LANDMARKS && b < NUM_LANDMARKS);
            assert_ne!(a, b);
        }
        assert_eq!(CONNECTIVITY.len(), 21);
    }
}
