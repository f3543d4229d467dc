use crate::candidate::Candidate;
use crate::track_point::TrackPoint;
use nalgebra as na;

/// Recognition result of one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub num: usize,
    pub candidates: Vec<Candidate>,
}

impl Frame {
    pub fn new(num: usize, candidates: Vec<Candidate>) -> Self {
        Self { num, candidates }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn track_points(&self, border: f64) -> Vec<TrackPoint> {
        let offset = na::Vector2::new(border, border);
        self.iter().map(|c| c.to_track_point(offset)).collect()
    }
}
