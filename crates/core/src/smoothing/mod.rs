use crate::config::WindowCapacity;
use crate::emotion::FrameScore;
use crate::util::RingBuffer;

/// Rolling mean over the most recent frame scores of a live session.
#[derive(Clone, Debug)]
pub struct ScoreSmoother {
    window: RingBuffer<FrameScore>,
}

impl ScoreSmoother {
    pub fn new(capacity: WindowCapacity) -> Self {
        Self {
            window: RingBuffer::new(capacity.get()),
        }
    }

    pub fn push(&mut self, score: FrameScore) {
        self.window.push(score);
    }

    /// `round(mean(window))`, or `None` before the first push.
    pub fn current_smoothed(&self) -> Option<FrameScore> {
        if self.window.is_empty() {
            return None;
        }
        let sum: u32 = self.window.iter().map(|s| u32::from(s.get())).sum();
        let mean = f64::from(sum) / self.window.len() as f64;
        Some(FrameScore::new(mean.round() as u8))
    }

    pub fn window(&self) -> impl Iterator<Item = FrameScore> + '_ {
        self.window.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

impl Default for ScoreSmoother {
    fn default() -> Self {
        Self::new(WindowCapacity::default())
    }
}
