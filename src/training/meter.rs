/// Running sum and count of a scalar (loss, hit rate, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AverageMeter {
    sum: f64,
    count: u64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of all recorded values, `None` before the first update.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Display-only transform of an average loss into (0, 1].
///
/// Not a calibrated probability; never feed it into training decisions.
pub fn hit_rate_proxy(avg_loss: f64) -> f64 {
    (-avg_loss).exp()
}
