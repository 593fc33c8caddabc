//! Training-loop control: the accuracy-keyed learning-rate table and the
//! best-ever loss tracker, kept separate from the loops that consume them
//! so each can be exercised on its own.

/// One rung of an accuracy-keyed learning-rate table.
#[derive(Debug, Clone, Copy)]
pub struct LrStep {
    /// The rung applies when validation accuracy exceeds this threshold.
    pub min_accuracy: f32,
    /// Update multiplier for the rung; negative for descent.
    pub rate: f32,
}

/// Outcome of consulting the schedule after a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Training is done: accuracy cleared the stop threshold.
    Stop,
    /// Keep going, applying updates with this multiplier.
    Rate(f32),
}

/// An ordered step table keyed on live validation accuracy, scanned from
/// the highest threshold down. Coarse and discontinuous on purpose: it is
/// a heuristic annealing policy, re-evaluated every batch.
pub struct LrSchedule {
    stop_above: f32,
    steps: Vec<LrStep>,
    floor: f32,
}

impl LrSchedule {
    /// # Panics
    /// If the rung thresholds do not descend strictly from `stop_above`.
    pub fn new(stop_above: f32, steps: Vec<LrStep>, floor: f32) -> Self {
        let mut prev = stop_above;
        for step in &steps {
            assert!(
                step.min_accuracy < prev,
                "schedule thresholds must descend strictly"
            );
            prev = step.min_accuracy;
        }

        Self { stop_above, steps, floor }
    }

    /// Picks the decision for the current validation accuracy: stop above
    /// the top threshold, otherwise the first rung the accuracy clears,
    /// otherwise the floor rate.
    pub fn pick(&self, accuracy: f32) -> Decision {
        if accuracy > self.stop_above {
            return Decision::Stop;
        }
        for step in &self.steps {
            if accuracy > step.min_accuracy {
                return Decision::Rate(step.rate);
            }
        }
        Decision::Rate(self.floor)
    }
}

/// Monotonic best-ever loss tracker.
///
/// Stops on the historical minimum rather than the current loss, which is
/// intentionally loose: a single good batch is enough to end training.
#[derive(Debug, Clone, Copy)]
pub struct BestLoss {
    best: f32,
}

impl BestLoss {
    pub fn new() -> Self {
        Self { best: f32::INFINITY }
    }

    /// Folds a new observation in, returning the running minimum.
    pub fn observe(&mut self, loss: f32) -> f32 {
        if loss < self.best {
            self.best = loss;
        }
        self.best
    }

    pub fn best(&self) -> f32 {
        self.best
    }

    /// Whether the running minimum has reached `target`.
    pub fn reached(&self, target: f32) -> bool {
        self.best <= target
    }
}

impl Default for BestLoss {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_loss_tracks_the_minimum() {
        let mut best = BestLoss::new();
        assert!(!best.reached(1.0));

        best.observe(3.0);
        best.observe(0.8);
        best.observe(2.0);

        assert_eq!(best.best(), 0.8);
        assert!(best.reached(1.0));
        assert!(!best.reached(0.5));
    }

    #[test]
    fn schedule_scans_from_the_top() {
        let schedule = LrSchedule::new(
            0.9,
            vec![
                LrStep { min_accuracy: 0.7, rate: -0.01 },
                LrStep { min_accuracy: 0.3, rate: -0.1 },
            ],
            -0.5,
        );

        assert_eq!(schedule.pick(0.95), Decision::Stop);
        assert_eq!(schedule.pick(0.8), Decision::Rate(-0.01));
        assert_eq!(schedule.pick(0.5), Decision::Rate(-0.1));
        assert_eq!(schedule.pick(0.1), Decision::Rate(-0.5));
    }

    #[test]
    #[should_panic(expected = "descend strictly")]
    fn schedule_rejects_unsorted_rungs() {
        let _ = LrSchedule::new(
            0.9,
            vec![
                LrStep { min_accuracy: 0.3, rate: -0.1 },
                LrStep { min_accuracy: 0.7, rate: -0.01 },
            ],
            -0.5,
        );
    }
}
