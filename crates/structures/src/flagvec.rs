/// A vector of single-bit flags.
///
/// Used for slot occupancy in descriptor pages and for per-slot dirty bits,
/// where a `Vec<bool>` would waste 7 bits per flag and most queries are "find
/// the first free slot" or "walk the set slots".
///
/// The vector grows as indices are set, but never shrinks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagVec {
    words: Vec<u64>,
    length: usize,
}

impl FlagVec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            length: 0,
        }
    }

    /// Creates a vector that can hold `bits` flags without growing. All flags
    /// start cleared.
    #[must_use]
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
            length: 0,
        }
    }

    /// Returns the index of the highest set bit + 1. This value is 'sticky' and
    /// will never decrease, even if that bit is later cleared. `clear_all`
    /// resets it.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if no flag has ever been set since the last `clear_all`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Sets the flag at the given index to the given value, and returns the old
    /// value.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        let (word, bit) = (index / 64, index % 64);

        if word >= self.words.len() {
            if !value {
                return false;
            }
            self.words.resize(word + 1, 0);
        }

        if value {
            self.length = self.length.max(index + 1);
        }

        let old = self.words[word] & (1 << bit) != 0;
        self.words[word] = (self.words[word] & !(1 << bit)) | u64::from(value) << bit;
        old
    }

    /// Returns the value of the flag at the given index, or false if the index
    /// is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        self.words.get(word).map_or(false, |w| w & (1 << bit) != 0)
    }

    /// Returns true if any flag is set.
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the lowest cleared index below `limit`, if there is one.
    #[must_use]
    pub fn first_clear(&self, limit: usize) -> Option<usize> {
        for (i, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let index = i * 64 + (!word).trailing_zeros() as usize;
                return (index < limit).then_some(index);
            }
        }

        let index = self.words.len() * 64;
        (index < limit).then_some(index)
    }

    /// Iterates over the indices of all set flags in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            let mut bits = *word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    None
                } else {
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(i * 64 + bit)
                }
            })
        })
    }

    /// Clears every flag and resets the length.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity() {
        let mut vec = FlagVec::new();

        assert_eq!(vec.len(), 0);
        assert!(!vec.get(0));
        assert!(!vec.get(1_000_000));

        vec.set(0, true);
        assert_eq!(vec.len(), 1);

        vec.set(100_000, true);
        assert_eq!(vec.len(), 100_001);
        assert_eq!(vec.words.len(), 100_000 / 64 + 1);

        vec.set(100_000, false);
        assert!(!vec.get(100_000));
        assert_eq!(vec.len(), 100_001);

        // clearing an out-of-range flag must not allocate
        let mut empty = FlagVec::new();
        empty.set(500, false);
        assert!(empty.words.is_empty());
    }

    #[test]
    fn first_clear_respects_limit() {
        let mut vec = FlagVec::with_capacity(4);
        assert_eq!(vec.first_clear(4), Some(0));

        for i in 0..4 {
            vec.set(i, true);
        }
        assert_eq!(vec.first_clear(4), None);
        assert_eq!(vec.first_clear(5), Some(4));

        vec.set(2, false);
        assert_eq!(vec.first_clear(4), Some(2));

        let mut full_word = FlagVec::new();
        for i in 0..64 {
            full_word.set(i, true);
        }
        assert_eq!(full_word.first_clear(128), Some(64));
        assert_eq!(full_word.first_clear(64), None);
    }

    #[test]
    fn iter_ones_in_order() {
        let mut vec = FlagVec::new();
        for i in [3, 64, 65, 200] {
            vec.set(i, true);
        }

        assert_eq!(vec.iter_ones().collect::<Vec<_>>(), vec![3, 64, 65, 200]);
        assert_eq!(vec.count_ones(), 4);
        assert!(vec.any());

        vec.clear_all();
        assert!(!vec.any());
        assert!(vec.is_empty());
    }
}
