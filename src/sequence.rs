use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

/// A 16 bit wrap-around sequence number, used both for packet sequence numbers and for
///  message ids.
///
/// NB: There is no total order on sequence numbers. `a` is considered newer than `b` if the
///      forward distance from `b` to `a` is shorter than the backward distance, so `0` is newer
///      than `65535`. For two numbers exactly half the number space apart, the numerically
///      greater one is considered newer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct SequenceNumber(u16);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    const HALF_RANGE: u16 = 32768;

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1))
    }

    pub fn is_newer_than(&self, other: SequenceNumber) -> bool {
        let (s1, s2) = (self.0, other.0);
        ((s1 > s2) && (s1 - s2 <= Self::HALF_RANGE)) || ((s1 < s2) && (s2 - s1 > Self::HALF_RANGE))
    }

    pub fn is_older_than(&self, other: SequenceNumber) -> bool {
        other.is_newer_than(*self)
    }

    /// forward distance from `other` to `self`, i.e. the number of increments it takes to get
    ///  from `other` to `self`
    pub fn distance_from(&self, other: SequenceNumber) -> u16 {
        self.0.wrapping_sub(other.0)
    }

    /// iterates over all sequence numbers from `self` (inclusive) to `end` (exclusive), with
    ///  wrap-around semantics
    pub fn to(&self, end: SequenceNumber) -> impl Iterator<Item = SequenceNumber> {
        let start = *self;
        (0..end.distance_from(start))
            .map(move |offs| start + offs)
    }
}

impl Add<u16> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: u16) -> Self::Output {
        SequenceNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SequenceNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SequenceNumber {
    type Output = SequenceNumber;

    fn sub(self, rhs: u16) -> Self::Output {
        SequenceNumber(self.0.wrapping_sub(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(1, 0, true)]
    #[case::equal(5, 5, false)]
    #[case::older(4, 5, false)]
    #[case::wrap_around(0, 65535, true)]
    #[case::wrap_around_far(10, 65000, true)]
    #[case::wrap_around_older(65535, 0, false)]
    #[case::half_range_numerically_greater(32768, 0, true)]
    #[case::half_range_numerically_smaller(0, 32768, false)]
    #[case::beyond_half_range(32769, 0, false)]
    fn test_is_newer_than(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        let a = SequenceNumber::from_raw(a);
        let b = SequenceNumber::from_raw(b);
        assert_eq!(a.is_newer_than(b), expected);
        if a != b {
            assert_eq!(b.is_older_than(a), expected);
        }
    }

    #[rstest]
    #[case::zero(5, 5, 0)]
    #[case::simple(7, 5, 2)]
    #[case::wrap_around(1, 65535, 2)]
    #[case::backwards(5, 7, 65534)]
    fn test_distance_from(#[case] a: u16, #[case] b: u16, #[case] expected: u16) {
        assert_eq!(SequenceNumber::from_raw(a).distance_from(SequenceNumber::from_raw(b)), expected);
    }

    #[rstest]
    #[case::empty(3, 3, vec![])]
    #[case::simple(3, 6, vec![3, 4, 5])]
    #[case::wrap_around(65534, 1, vec![65534, 65535, 0])]
    fn test_to(#[case] start: u16, #[case] end: u16, #[case] expected: Vec<u16>) {
        let actual = SequenceNumber::from_raw(start)
            .to(SequenceNumber::from_raw(end))
            .map(|s| s.to_raw())
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(SequenceNumber::from_raw(65535).next(), SequenceNumber::ZERO);
        assert_eq!(SequenceNumber::from_raw(65530) + 10, SequenceNumber::from_raw(4));
        assert_eq!(SequenceNumber::from_raw(3) - 5, SequenceNumber::from_raw(65534));

        let mut s = SequenceNumber::from_raw(65535);
        s += 2;
        assert_eq!(s, SequenceNumber::from_raw(1));
    }
}
