use serde_derive::{Deserialize, Serialize};
use tracing::info;

/// `count` frames were lost right before video frame `num`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingFrame {
    pub num: usize,
    pub count: usize,
}

/// Frames that never made it into the video, sorted by `num` without
/// duplicates. Maps video frame numbers onto nominal (wall clock) ones.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingFrames {
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    frames: Vec<MissingFrame>,
}

impl MissingFrames {
    pub fn new(frames: Vec<MissingFrame>) -> Self {
        let mut mf = Self::default();
        mf.set_missing_frames(frames);
        mf.executed = true;
        mf
    }

    pub fn reset(&mut self) {
        self.executed = false;
        self.frames.clear();
    }

    #[inline]
    pub fn frames(&self) -> &[MissingFrame] {
        &self.frames
    }

    /// Replaces the list. Entries with the same `num` are summed up.
    pub fn set_missing_frames(&mut self, mut frames: Vec<MissingFrame>) {
        frames.sort();
        frames.retain(|f| f.count > 0);

        let mut merged: Vec<MissingFrame> = Vec::with_capacity(frames.len());
        for f in frames {
            match merged.last_mut() {
                Some(last) if last.num == f.num => last.count += f.count,
                _ => merged.push(f),
            }
        }

        self.frames = merged;
    }

    pub fn insert(&mut self, frame: MissingFrame) {
        if frame.count == 0 {
            return;
        }

        match self.frames.binary_search_by_key(&frame.num, |f| f.num) {
            Ok(i) => self.frames[i].count += frame.count,
            Err(i) => self.frames.insert(i, frame),
        }
    }

    pub fn total_missing(&self) -> usize {
        self.frames.iter().map(|f| f.count).sum()
    }

    /// Nominal frame number of video frame `frame`.
    pub fn nominal_frame(&self, frame: usize) -> usize {
        frame
            + self
                .frames
                .iter()
                .take_while(|f| f.num <= frame)
                .map(|f| f.count)
                .sum::<usize>()
    }

    /// Finds gaps in per-frame timestamps (seconds) of a `fps` video.
    pub fn detect(timestamps: &[f64], fps: f64) -> Self {
        let mut frames = Vec::new();

        if fps > 0.0 {
            for (i, w) in timestamps.windows(2).enumerate() {
                let steps = ((w[1] - w[0]) * fps).round();
                if steps > 1.0 {
                    frames.push(MissingFrame {
                        num: i + 1,
                        count: steps as usize - 1,
                    });
                }
            }
        }

        let mf = Self::new(frames);
        info!(
            "missing frames: {} gaps, {} frames in total",
            mf.frames.len(),
            mf.total_missing()
        );

        mf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_merged() {
        let mf = MissingFrames::new(vec![
            MissingFrame { num: 30, count: 1 },
            MissingFrame { num: 10, count: 2 },
            MissingFrame { num: 30, count: 3 },
            MissingFrame { num: 20, count: 0 },
        ]);

        assert_eq!(
            mf.frames(),
            &[MissingFrame { num: 10, count: 2 }, MissingFrame { num: 30, count: 4 }]
        );
    }

    #[test]
    fn nominal_numbers() {
        let mut mf = MissingFrames::default();
        mf.insert(MissingFrame { num: 10, count: 2 });
        mf.insert(MissingFrame { num: 5, count: 1 });

        assert_eq!(mf.nominal_frame(4), 4);
        assert_eq!(mf.nominal_frame(5), 6);
        assert_eq!(mf.nominal_frame(9), 10);
        assert_eq!(mf.nominal_frame(10), 13);
        assert_eq!(mf.total_missing(), 3);
    }

    #[test]
    fn detect_from_timestamps() {
        let ts = [0.0, 0.04, 0.08, 0.20, 0.24];
        let mf = MissingFrames::detect(&ts, 25.0);

        assert!(mf.executed);
        assert_eq!(mf.frames(), &[MissingFrame { num: 3, count: 2 }]);
    }
}
