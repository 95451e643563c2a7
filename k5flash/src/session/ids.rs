//! Flash write session identifiers.

use rand::Rng;

/// Supplies the sequence id stamped on every chunk of one flash write.
pub trait SequenceIdSource {
    /// Next identifier; must be non-zero.
    fn next_id(&mut self) -> u32;
}

/// Uniform random ids in `1..i32::MAX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl SequenceIdSource for RandomIds {
    fn next_id(&mut self) -> u32 {
        rand::thread_rng().gen_range(1..i32::MAX.unsigned_abs())
    }
}

impl<F> SequenceIdSource for F
where
    F: FnMut() -> u32,
{
    fn next_id(&mut self) -> u32 {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_in_range() {
        let mut ids = RandomIds;
        for _ in 0..1000 {
            let id = ids.next_id();
            assert!(id >= 1 && id < 0x7fff_ffff);
        }
    }

    #[test]
    fn test_closure_source() {
        let mut next = 10;
        let mut ids = move || {
            next += 1;
            next
        };
        assert_eq!(SequenceIdSource::next_id(&mut ids), 11);
        assert_eq!(SequenceIdSource::next_id(&mut ids), 12);
    }
}
