/// Collective operations across the replicas of one training job.
///
/// Every replica must make the same sequence of calls, otherwise the group
/// deadlocks or aborts.
pub trait Reduce {
    fn rank(&self) -> usize;
    fn world(&self) -> usize;
    /// Weighted mean of `values` across replicas, and the total weight.
    fn reduce(&self, values: Vec<f32>, weight: f64) -> anyhow::Result<(Vec<f32>, f64)>;

    /// Rank 0's values, everywhere.
    fn broadcast(&self, values: Vec<f32>) -> anyhow::Result<Vec<f32>> {
        let weight = if self.rank() == 0 { 1. } else { 0. };
        self.reduce(values, weight).map(|(values, _)| values)
    }
    /// True on every replica if it is true on any replica.
    fn any(&self, flag: bool) -> anyhow::Result<bool> {
        let (values, _) = self.reduce(vec![flag as u8 as f32], 1.)?;
        Ok(values.first().is_some_and(|v| *v > 0.))
    }
    fn is_leader(&self) -> bool {
        self.rank() == 0
    }
}

/// The trivial group of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Solo;

impl Reduce for Solo {
    fn rank(&self) -> usize {
        0
    }
    fn world(&self) -> usize {
        1
    }
    fn reduce(&self, values: Vec<f32>, weight: f64) -> anyhow::Result<(Vec<f32>, f64)> {
        Ok((values, weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo() {
        assert!(Solo.is_leader());
        assert_eq!(Solo.broadcast(vec![1., 2.]).unwrap(), vec![1., 2.]);
        assert_eq!(Solo.reduce(vec![3.], 7.).unwrap(), (vec![3.], 7.));
        assert!(Solo.any(true).unwrap());
        assert!(!Solo.any(false).unwrap());
    }
}
