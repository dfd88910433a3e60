use crate::{Error, Result};
use core::{cmp::Ordering, fmt};

/// Symbols a suffix is drawn from, in ascending order.
pub const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Number of distinct symbols per position.
pub const RADIX: u128 = 36;

/// Widest suffix the engine will grow to.
///
/// `36^24` still fits a `u128`, which keeps [`Suffix::advanced_by`] exact.
pub const MAX_WIDTH: usize = 24;

/// Outcome of a single [`Suffix::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The suffix advanced within its current width.
    Advanced,
    /// Every symbol was `Z`; the suffix became `1` followed by zeros and is now
    /// `width` symbols wide.
    Grew {
        /// The new width.
        width: usize,
    },
}

/// The mutable, alphanumeric tail of an identifier.
///
/// A suffix is an odometer over [`ALPHABET`], most significant symbol first.
/// Suffixes order by width first and then symbol by symbol, so the smallest
/// suffix of width `W + 1` sorts after the largest suffix of width `W`.
///
/// # Example
///
/// ```
/// use alnumid::{Step, Suffix};
///
/// let mut suffix = Suffix::parse("ZZ").unwrap();
/// assert_eq!(suffix.step(), Step::Grew { width: 3 });
/// assert_eq!(suffix.as_str(), "100");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Suffix {
    chars: Vec<u8>,
}

impl Suffix {
    /// Returns the all-zero suffix of the given width, e.g. `"000000"`.
    pub fn zero(width: usize) -> Result<Self> {
        check_width(width, "")?;
        Ok(Self {
            chars: vec![b'0'; width],
        })
    }

    /// Parses a suffix, accepting upper-case symbols from [`ALPHABET`] only.
    pub fn parse(value: &str) -> Result<Self> {
        check_width(value.len(), value)?;
        if !value.bytes().all(is_symbol) {
            return Err(Error::InvalidSuffix {
                value: value.to_owned(),
                reason: "symbols must be 0-9 or A-Z",
            });
        }
        Ok(Self {
            chars: value.as_bytes().to_vec(),
        })
    }

    /// Number of symbols in this suffix.
    pub fn width(&self) -> usize {
        self.chars.len()
    }

    pub fn as_str(&self) -> &str {
        // Every byte is drawn from ALPHABET, which is ASCII.
        core::str::from_utf8(&self.chars).unwrap_or_default()
    }

    /// Returns `true` when every symbol is `Z`, i.e. the next step grows.
    pub fn is_max(&self) -> bool {
        self.chars.iter().all(|&c| c == b'Z')
    }

    /// Left-pads with `'0'` up to `width`. Never truncates.
    pub fn pad_to(&self, width: usize) -> Self {
        if self.chars.len() >= width {
            return self.clone();
        }
        let mut chars = vec![b'0'; width - self.chars.len()];
        chars.extend_from_slice(&self.chars);
        Self { chars }
    }

    /// Advances the suffix by one in place.
    ///
    /// Working from the least significant symbol:
    ///
    /// - `0`-`8` and `A`-`Y` move to the next symbol, done.
    /// - `9` becomes `A`, done. This is not a carry.
    /// - `Z` becomes `0` and carries into the next more significant symbol.
    ///
    /// A carry out of the most significant symbol prepends `1`, producing
    /// `1` followed by `W` zeros. Persisting the new width is the caller's
    /// job; see [`crate::WidthSink`].
    pub fn step(&mut self) -> Step {
        for pos in (0..self.chars.len()).rev() {
            match self.chars[pos] {
                b'9' => {
                    self.chars[pos] = b'A';
                    return Step::Advanced;
                }
                b'Z' => self.chars[pos] = b'0',
                c => {
                    self.chars[pos] = c + 1;
                    return Step::Advanced;
                }
            }
        }
        self.chars.insert(0, b'1');
        Step::Grew {
            width: self.chars.len(),
        }
    }

    /// Returns the next suffix without mutating `self`.
    pub fn successor(&self) -> (Self, Step) {
        let mut next = self.clone();
        let step = next.step();
        (next, step)
    }

    /// Returns the suffix `n` steps ahead of `self`.
    ///
    /// Equivalent to calling [`Self::step`] `n` times, computed in constant
    /// time. The result is never narrower than `self`.
    pub fn advanced_by(&self, n: u64) -> Result<Self> {
        let value = self
            .value()
            .checked_add(u128::from(n))
            .ok_or(Error::WidthExhausted {
                max_width: MAX_WIDTH,
            })?;
        Self::from_value(value, self.width())
    }

    fn value(&self) -> u128 {
        self.chars
            .iter()
            .fold(0_u128, |acc, &c| acc * RADIX + u128::from(symbol_value(c)))
    }

    fn from_value(mut value: u128, min_width: usize) -> Result<Self> {
        let mut chars = Vec::with_capacity(min_width);
        while value > 0 {
            chars.push(ALPHABET[(value % RADIX) as usize]);
            value /= RADIX;
        }
        while chars.len() < min_width {
            chars.push(b'0');
        }
        if chars.len() > MAX_WIDTH {
            return Err(Error::WidthExhausted {
                max_width: MAX_WIDTH,
            });
        }
        chars.reverse();
        Ok(Self { chars })
    }
}

const fn is_symbol(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_uppercase()
}

const fn symbol_value(c: u8) -> u8 {
    if c.is_ascii_digit() {
        c - b'0'
    } else {
        c - b'A' + 10
    }
}

fn check_width(width: usize, value: &str) -> Result<()> {
    if width == 0 {
        return Err(Error::InvalidSuffix {
            value: value.to_owned(),
            reason: "width must be at least 1",
        });
    }
    if width > MAX_WIDTH {
        return Err(Error::InvalidSuffix {
            value: value.to_owned(),
            reason: "width exceeds the supported maximum",
        });
    }
    Ok(())
}

impl Ord for Suffix {
    fn cmp(&self, other: &Self) -> Ordering {
        // ASCII already orders digits before letters.
        self.chars
            .len()
            .cmp(&other.chars.len())
            .then_with(|| self.chars.cmp(&other.chars))
    }
}

impl PartialOrd for Suffix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Suffix({})", self.as_str())
    }
}

impl core::str::FromStr for Suffix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn step(s: &str) -> (String, Step) {
        let (next, step) = Suffix::parse(s).unwrap().successor();
        (next.as_str().to_owned(), step)
    }

    #[test]
    fn all_z_grows_to_one_followed_by_zeros() {
        assert_eq!(step("ZZ"), ("100".to_owned(), Step::Grew { width: 3 }));
        assert_eq!(step("Z"), ("10".to_owned(), Step::Grew { width: 2 }));
    }

    #[test]
    fn nine_turns_into_a_without_carry() {
        assert_eq!(step("9"), ("A".to_owned(), Step::Advanced));
        assert_eq!(step("0009"), ("000A".to_owned(), Step::Advanced));
    }

    #[test]
    fn z_wraps_and_carries_left() {
        assert_eq!(step("AZZ"), ("B00".to_owned(), Step::Advanced));
        assert_eq!(step("09Z"), ("0A0".to_owned(), Step::Advanced));
        assert_eq!(step("00000Z"), ("000010".to_owned(), Step::Advanced));
    }

    #[test]
    fn plain_increments() {
        assert_eq!(step("000000"), ("000001".to_owned(), Step::Advanced));
        assert_eq!(step("00001A"), ("00001B".to_owned(), Step::Advanced));
        assert_eq!(step("Y"), ("Z".to_owned(), Step::Advanced));
    }

    #[test]
    fn enumerates_full_width_two_space_in_order() {
        let mut suffix = Suffix::zero(2).unwrap();
        let mut seen = HashSet::new();
        let mut prev = suffix.clone();
        assert!(seen.insert(suffix.clone()));

        for _ in 1..36 * 36 {
            assert_eq!(suffix.step(), Step::Advanced);
            assert!(suffix > prev, "{suffix:?} <= {prev:?}");
            assert!(seen.insert(suffix.clone()));
            prev = suffix.clone();
        }

        assert_eq!(seen.len(), 36 * 36);
        assert_eq!(suffix.as_str(), "ZZ");
        assert!(suffix.is_max());
        assert_eq!(suffix.step(), Step::Grew { width: 3 });
        assert!(suffix > prev);
    }

    #[test]
    fn ordering_is_width_then_symbols() {
        let zz = Suffix::parse("ZZ").unwrap();
        let one = Suffix::parse("100").unwrap();
        let nine = Suffix::parse("09").unwrap();
        let a = Suffix::parse("0A").unwrap();
        assert!(one > zz);
        assert!(a > nine);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Suffix::parse("").is_err());
        assert!(Suffix::parse("00a0").is_err());
        assert!(Suffix::parse("00-0").is_err());
        assert!(Suffix::zero(0).is_err());
        assert!(Suffix::zero(MAX_WIDTH + 1).is_err());
    }

    #[test]
    fn pad_to_never_truncates() {
        let s = Suffix::parse("1A").unwrap();
        assert_eq!(s.pad_to(6).as_str(), "00001A");
        assert_eq!(s.pad_to(1).as_str(), "1A");
    }

    #[test]
    fn advanced_by_crosses_width_boundary() {
        let s = Suffix::parse("ZY").unwrap();
        assert_eq!(s.advanced_by(0).unwrap().as_str(), "ZY");
        assert_eq!(s.advanced_by(1).unwrap().as_str(), "ZZ");
        assert_eq!(s.advanced_by(2).unwrap().as_str(), "100");
        assert_eq!(s.advanced_by(3).unwrap().as_str(), "101");
    }

    #[test]
    fn advanced_by_reports_exhaustion() {
        let max = Suffix::parse(&"Z".repeat(MAX_WIDTH)).unwrap();
        assert!(matches!(
            max.advanced_by(1),
            Err(Error::WidthExhausted { .. })
        ));
    }

    proptest! {
        #[test]
        fn successor_is_strictly_greater(s in "[0-9A-Z]{1,8}") {
            let suffix = Suffix::parse(&s).unwrap();
            let (next, step) = suffix.successor();
            prop_assert!(next > suffix);
            match step {
                Step::Advanced => prop_assert_eq!(next.width(), suffix.width()),
                Step::Grew { width } => {
                    prop_assert!(suffix.is_max());
                    prop_assert_eq!(width, suffix.width() + 1);
                }
            }
        }

        #[test]
        fn advanced_by_matches_repeated_steps(s in "[0-9A-Z]{1,4}", n in 0_u64..2_000) {
            let start = Suffix::parse(&s).unwrap();
            let mut stepped = start.clone();
            for _ in 0..n {
                stepped.step();
            }
            prop_assert_eq!(start.advanced_by(n).unwrap(), stepped);
        }
    }
}
