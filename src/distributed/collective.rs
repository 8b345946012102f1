use crate::training::Reduce;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// Raised on every replica still waiting when another one gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica group aborted")
    }
}

impl std::error::Error for Aborted {}

#[derive(Debug, Default)]
struct Round {
    generation: u64,
    arrived: usize,
    weighted: Vec<f64>,
    plain: Vec<f64>,
    weight: f64,
    result: (Vec<f32>, f64),
    aborted: bool,
}

/// In-process all-reduce shared by the replicas of one job.
///
/// Each call blocks until all `world` members have contributed to the
/// current round. A round with zero total weight falls back to the
/// unweighted mean.
#[derive(Debug)]
pub struct Collective {
    world: usize,
    round: Mutex<Round>,
    turn: Condvar,
}

impl Collective {
    pub fn new(world: usize) -> Arc<Self> {
        Arc::new(Self {
            world: world.max(1),
            round: Mutex::new(Round::default()),
            turn: Condvar::new(),
        })
    }
    pub fn world(&self) -> usize {
        self.world
    }
    pub fn member(self: &Arc<Self>, rank: usize) -> Member {
        assert!(rank < self.world, "rank {} outside world of {}", rank, self.world);
        Member {
            rank,
            group: self.clone(),
        }
    }

    /// Release every waiting member with [`Aborted`]; later calls fail too.
    pub fn abort(&self) {
        self.lock().aborted = true;
        self.turn.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Round> {
        self.round.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reduce(&self, values: Vec<f32>, weight: f64) -> anyhow::Result<(Vec<f32>, f64)> {
        let mut round = self.lock();
        if round.aborted {
            return Err(Aborted.into());
        }
        if round.arrived == 0 {
            round.weighted = vec![0.; values.len()];
            round.plain = vec![0.; values.len()];
            round.weight = 0.;
        }
        if round.weighted.len() != values.len() {
            let expected = round.weighted.len();
            round.aborted = true;
            drop(round);
            self.turn.notify_all();
            anyhow::bail!("reduction of {} values, group expects {}", values.len(), expected);
        }
        let Round {
            weighted, plain, ..
        } = &mut *round;
        for ((w, p), v) in weighted.iter_mut().zip(plain.iter_mut()).zip(values) {
            *w += weight * v as f64;
            *p += v as f64;
        }
        round.weight += weight;
        round.arrived += 1;
        let generation = round.generation;
        if round.arrived == self.world {
            let total = round.weight;
            let mean = if total > 0. {
                round.weighted.iter().map(|w| (w / total) as f32).collect()
            } else {
                round.plain.iter().map(|p| (p / self.world as f64) as f32).collect()
            };
            round.result = (mean, total);
            round.arrived = 0;
            round.generation += 1;
            self.turn.notify_all();
            return Ok(round.result.clone());
        }
        while round.generation == generation && !round.aborted {
            round = self
                .turn
                .wait(round)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if round.generation == generation {
            return Err(Aborted.into());
        }
        Ok(round.result.clone())
    }
}

/// One rank's handle on a [`Collective`].
#[derive(Debug, Clone)]
pub struct Member {
    rank: usize,
    group: Arc<Collective>,
}

impl Member {
    pub fn abort(&self) {
        self.group.abort();
    }
}

impl Reduce for Member {
    fn rank(&self) -> usize {
        self.rank
    }
    fn world(&self) -> usize {
        self.group.world
    }
    fn reduce(&self, values: Vec<f32>, weight: f64) -> anyhow::Result<(Vec<f32>, f64)> {
        self.group.reduce(values, weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parallel<T: Send>(world: usize, f: impl Fn(Member) -> T + Sync) -> Vec<T> {
        let group = Collective::new(world);
        std::thread::scope(|s| {
            let handles = (0..world)
                .map(|rank| {
                    let member = group.member(rank);
                    let f = &f;
                    s.spawn(move || f(member))
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn weighted_mean() {
        let results = parallel(3, |m| {
            let rank = m.rank() as f32;
            m.reduce(vec![rank, 10. * rank], (m.rank() + 1) as f64).unwrap()
        });
        // weights 1, 2, 3
        let expected = (vec![8. / 6., 80. / 6.], 6.);
        for (values, weight) in results {
            assert_eq!(weight, expected.1);
            assert!((values[0] - expected.0[0]).abs() < 1e-6);
            assert!((values[1] - expected.0[1]).abs() < 1e-5);
        }
    }

    #[test]
    fn broadcasts_leader() {
        let results = parallel(4, |m| m.broadcast(vec![m.rank() as f32 + 1.]).unwrap());
        assert!(results.iter().all(|v| v == &vec![1.]));
    }

    #[test]
    fn unweighted_fallback() {
        let results = parallel(2, |m| m.reduce(vec![m.rank() as f32], 0.).unwrap());
        assert!(results.iter().all(|(v, w)| v == &vec![0.5] && *w == 0.));
    }

    #[test]
    fn many_rounds() {
        let results = parallel(3, |m| {
            (0..50)
                .map(|i| m.reduce(vec![i as f32], 1.).unwrap().0[0])
                .collect::<Vec<_>>()
        });
        let expected = (0..50).map(|i| i as f32).collect::<Vec<_>>();
        assert!(results.iter().all(|r| r == &expected));
    }

    #[test]
    fn any_flag() {
        let results = parallel(3, |m| m.any(m.rank() == 2).unwrap());
        assert_eq!(results, vec![true, true, true]);
    }

    #[test]
    fn aborts_waiters() {
        let results = parallel(2, |m| {
            if m.rank() == 0 {
                std::thread::sleep(std::time::Duration::from_millis(20));
                m.abort();
                None
            } else {
                Some(m.reduce(vec![1.], 1.))
            }
        });
        let err = results[1].as_ref().unwrap().as_ref().unwrap_err();
        assert!(err.is::<Aborted>());
    }

    #[test]
    fn mismatched_lengths() {
        let results = parallel(2, |m| m.reduce(vec![0.; m.rank() + 1], 1.));
        assert!(results.iter().all(|r| r.is_err()));
    }
}
