/// Brightness values for a stepped transition.
///
/// Step `i` of `n` targets `start + (target - start) * i / n`, so the last
/// step always lands exactly on `target`. Every value is clamped to
/// `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampPlan {
    start: u8,
    target: u8,
    steps: u32,
    min: u8,
    max: u8,
}

impl RampPlan {
    pub fn new(start: u8, target: u8, steps: u32, min: u8, max: u8) -> Self {
        Self {
            start,
            target,
            steps: steps.max(1),
            min,
            max,
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
        let start = i64::from(self.start);
        let delta = i64::from(self.target) - start;
        let steps = i64::from(self.steps);
        (1..=steps).map(move |i| {
            let value = start + delta * i / steps;
            // Clamped into u8 bounds, so the cast cannot truncate
            value.clamp(i64::from(self.min), i64::from(self.max)) as u8
        })
    }
}
