use crate::sequence::SequenceNumber;

/// A fixed-capacity buffer of entries indexed by sequence number modulo the capacity.
///
/// Each slot is tagged with the sequence number it currently represents, so a stale slot is
///  never mistaken for a different sequence number that maps to the same index.
///
/// The valid key range is determined by the high water mark (i.e. the sequence number *after*
///  the newest inserted entry): `(high_water_mark - capacity) ..< high_water_mark`, with
///  wrap-around semantics. Inserting a sequence number past the high water mark slides the
///  window forward, evicting all entries that fall out of it.
pub struct WindowedBuffer<V> {
    high_water_mark: SequenceNumber,
    slots: Box<[Option<(SequenceNumber, V)>]>,
}

impl<V> WindowedBuffer<V> {
    pub fn new(capacity: usize) -> WindowedBuffer<V> {
        assert!(capacity > 0 && capacity <= u16::MAX as usize + 1, "window capacity must be in 1..=65536");

        WindowedBuffer {
            high_water_mark: SequenceNumber::ZERO,
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// the sequence number after the newest entry ever inserted
    pub fn high_water_mark(&self) -> SequenceNumber {
        self.high_water_mark
    }

    pub fn clear(&mut self) {
        self.high_water_mark = SequenceNumber::ZERO;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// the oldest sequence number the window can still hold
    fn lower_bound(&self) -> SequenceNumber {
        // capacity may be 65536, which truncates to 0 and makes the whole number space valid
        self.high_water_mark - (self.slots.len() as u32) as u16
    }

    /// true iff `sequence` is too old to be inserted
    pub fn is_outdated(&self, sequence: SequenceNumber) -> bool {
        self.slots.len() <= u16::MAX as usize && sequence.is_older_than(self.lower_bound())
    }

    /// Inserts an entry, sliding the window forward if necessary. Returns `None` without changing
    ///  anything if `sequence` is older than the window's lower bound.
    pub fn insert(&mut self, sequence: SequenceNumber, value: V) -> Option<&mut V> {
        if self.is_outdated(sequence) {
            return None;
        }

        if sequence.next().is_newer_than(self.high_water_mark) {
            self.evict_up_to(sequence);
            self.high_water_mark = sequence.next();
        }

        let index = self.index(sequence);
        self.slots[index] = Some((sequence, value));
        self.slots[index].as_mut().map(|(_, v)| v)
    }

    /// clear all slots from the old high water mark up to and including `sequence`: those slots
    ///  hold entries that are now outside the window
    fn evict_up_to(&mut self, sequence: SequenceNumber) {
        let num_evicted = sequence.distance_from(self.high_water_mark) as usize + 1;
        if num_evicted >= self.slots.len() {
            for slot in self.slots.iter_mut() {
                *slot = None;
            }
        }
        else {
            for s in self.high_water_mark.to(sequence.next()) {
                let index = self.index(s);
                self.slots[index] = None;
            }
        }
    }

    pub fn exists(&self, sequence: SequenceNumber) -> bool {
        matches!(&self.slots[self.index(sequence)], Some((s, _)) if *s == sequence)
    }

    /// true iff the slot that `sequence` maps to is not occupied by any entry
    pub fn available(&self, sequence: SequenceNumber) -> bool {
        self.slots[self.index(sequence)].is_none()
    }

    pub fn get(&self, sequence: SequenceNumber) -> Option<&V> {
        match &self.slots[self.index(sequence)] {
            Some((s, v)) if *s == sequence => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, sequence: SequenceNumber) -> Option<&mut V> {
        let index = self.index(sequence);
        match &mut self.slots[index] {
            Some((s, v)) if *s == sequence => Some(v),
            _ => None,
        }
    }

    pub fn remove(&mut self, sequence: SequenceNumber) -> Option<V> {
        if !self.exists(sequence) {
            return None;
        }
        let index = self.index(sequence);
        self.slots[index].take().map(|(_, v)| v)
    }

    fn index(&self, sequence: SequenceNumber) -> usize {
        sequence.to_raw() as usize % self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn seq(raw: u16) -> SequenceNumber {
        SequenceNumber::from_raw(raw)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut buffer = WindowedBuffer::new(8);
        assert!(buffer.available(seq(3)));
        assert_eq!(buffer.insert(seq(3), "a").copied(), Some("a"));

        assert!(buffer.exists(seq(3)));
        assert!(!buffer.exists(seq(11)), "same slot, different sequence number");
        assert!(!buffer.available(seq(11)));
        assert_eq!(buffer.get(seq(3)), Some(&"a"));
        assert_eq!(buffer.get(seq(11)), None);
        assert_eq!(buffer.high_water_mark(), seq(4));

        *buffer.get_mut(seq(3)).unwrap() = "b";
        assert_eq!(buffer.remove(seq(11)), None);
        assert_eq!(buffer.remove(seq(3)), Some("b"));
        assert!(!buffer.exists(seq(3)));
        assert!(buffer.available(seq(3)));
    }

    #[test]
    fn test_slide_evicts_stale_entries() {
        let mut buffer = WindowedBuffer::new(4);
        for s in 0..4 {
            buffer.insert(seq(s), s);
        }
        buffer.insert(seq(5), 5);

        // 4 was never inserted, 0 and 1 share slots with 4 and 5
        assert!(!buffer.exists(seq(0)));
        assert!(!buffer.exists(seq(1)));
        assert!(buffer.exists(seq(2)));
        assert!(buffer.exists(seq(3)));
        assert!(!buffer.exists(seq(4)));
        assert!(buffer.available(seq(4)));
        assert!(buffer.exists(seq(5)));
    }

    #[test]
    fn test_big_jump_clears_everything() {
        let mut buffer = WindowedBuffer::new(4);
        for s in 0..4 {
            buffer.insert(seq(s), s);
        }
        buffer.insert(seq(100), 100);
        for s in 0..4 {
            assert!(!buffer.exists(seq(s)));
        }
        assert!(buffer.exists(seq(100)));
    }

    #[rstest]
    #[case::in_window(10, 8, true)]
    #[case::lower_bound(10, 3, true)]
    #[case::below_lower_bound(10, 2, false)]
    #[case::newer(10, 20, true)]
    fn test_insert_outdated(#[case] newest: u16, #[case] sequence: u16, #[case] expected_inserted: bool) {
        let mut buffer = WindowedBuffer::new(8);
        buffer.insert(seq(newest), ());
        assert_eq!(buffer.insert(seq(sequence), ()).is_some(), expected_inserted);
        assert_eq!(buffer.exists(seq(sequence)), expected_inserted);
    }

    #[test]
    fn test_wrap_around() {
        let mut buffer = WindowedBuffer::new(16);
        for s in 65530..=65535 {
            buffer.insert(seq(s), s);
        }
        for s in 0..5 {
            buffer.insert(seq(s), s);
        }
        assert_eq!(buffer.high_water_mark(), seq(5));
        for s in (65530..=65535).chain(0..5) {
            assert_eq!(buffer.get(seq(s)), Some(&s));
        }
        assert!(buffer.is_outdated(seq(65524)));
        assert!(!buffer.is_outdated(seq(65525)));
    }

    #[test]
    fn test_full_sequence_space() {
        let mut buffer = WindowedBuffer::new(65536);
        buffer.insert(seq(40000), ());
        assert!(!buffer.is_outdated(seq(40001)));
        assert!(buffer.insert(seq(0), ()).is_some());
        assert!(buffer.exists(seq(40000)));
    }

    #[test]
    fn test_clear() {
        let mut buffer = WindowedBuffer::new(4);
        buffer.insert(seq(7), 7);
        buffer.clear();
        assert!(!buffer.exists(seq(7)));
        assert_eq!(buffer.high_water_mark(), SequenceNumber::ZERO);
    }
}
