use crate::Energy;

/// Whether smaller or larger values of the monitored metric are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Improved,
    Waiting { remaining: usize },
    Stop,
}

/// Stops once the monitored value has failed to improve by more than
/// `min_delta` for `patience` consecutive checks.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: Energy,
    mode: Mode,
    best: Energy,
    best_epoch: usize,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: Energy) -> Self {
        Self {
            patience,
            min_delta,
            mode: Mode::Min,
            best: Energy::INFINITY,
            best_epoch: 0,
            stale: 0,
        }
    }
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self.best = match mode {
            Mode::Min => Energy::INFINITY,
            Mode::Max => Energy::NEG_INFINITY,
        };
        self
    }
    pub fn best(&self) -> Energy {
        self.best
    }
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn check(&mut self, value: Energy, epoch: usize) -> Decision {
        let improved = match self.mode {
            Mode::Min => self.best - value > self.min_delta,
            Mode::Max => value - self.best > self.min_delta,
        };
        if improved {
            self.best = value;
            self.best_epoch = epoch;
            self.stale = 0;
            Decision::Improved
        } else {
            self.stale += 1;
            match self.patience.saturating_sub(self.stale) {
                0 => Decision::Stop,
                remaining => Decision::Waiting { remaining },
            }
        }
    }
}
