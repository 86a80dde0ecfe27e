use rand::Rng;
use std::ops::Range;
#[cfg(test)] use std::sync::Mutex;



#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

#[cfg_attr(test, mockall::automock)]
pub trait Random {
    fn gen_usize_range(range: Range<usize>) -> usize;
}
pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_usize_range(range: Range<usize>) -> usize {
        rand::thread_rng().gen_range(range)
    }
}

/// Picks up to `max` distinct elements uniformly at random. If there are no more than `max`
///  candidates, all of them are returned in their original order without consulting the random
///  source.
pub fn pick_random<R: Random, T>(mut candidates: Vec<T>, max: usize) -> Vec<T> {
    if candidates.len() <= max {
        return candidates;
    }

    let mut result = Vec::with_capacity(max);
    for _ in 0..max {
        let idx = R::gen_usize_range(0..candidates.len());
        result.push(candidates.remove(idx));
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pick_random_few_candidates() {
        let _lock = MOCK_RANDOM_MUTEX.lock();
        let ctx = MockRandom::gen_usize_range_context();
        ctx.expect().never();

        assert_eq!(pick_random::<MockRandom, _>(vec![1, 2, 3], 3), vec![1, 2, 3]);
        assert_eq!(pick_random::<MockRandom, _>(Vec::<u32>::new(), 3), Vec::<u32>::new());
    }

    #[test]
    fn test_pick_random_samples_without_replacement() {
        let _lock = MOCK_RANDOM_MUTEX.lock();
        let ctx = MockRandom::gen_usize_range_context();
        // always pick the last remaining candidate
        ctx.expect().returning(|range| range.end - 1);

        assert_eq!(pick_random::<MockRandom, _>(vec![1, 2, 3, 4, 5], 3), vec![5, 4, 3]);
    }

    #[test]
    fn test_pick_random_rng() {
        for _ in 0..20 {
            let mut picked = pick_random::<RngRandom, _>((0..10).collect(), 3);
            assert_eq!(picked.len(), 3);
            picked.sort();
            picked.dedup();
            assert_eq!(picked.len(), 3);
        }
    }
}
