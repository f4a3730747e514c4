/// Collects propagation delays of peer updates and releases them exactly once.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    capacity: usize,
    samples: Vec<i64>,
    reported: bool,
}

impl LatencyProbe {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
            reported: false,
        }
    }

    /// Record one delay. Returns the full sample set the moment the buffer
    /// reaches capacity; every later call is a no-op returning `None`.
    pub fn observe(&mut self, sent_at: i64, received_at: i64) -> Option<Vec<i64>> {
        if self.samples.len() >= self.capacity {
            return None;
        }
        self.samples.push(received_at - sent_at);

        if self.samples.len() == self.capacity && !self.reported {
            self.reported = true;
            return Some(self.samples.clone());
        }
        None
    }

    pub fn samples(&self) -> &[i64] {
        &self.samples
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }
}
