//! Fractional-index positions for ordering list children.
//!
//! A [`Pos`] is a non-empty sequence of bytes from the printable ASCII range
//! `[32, 126]`. Positions are ordered digit by digit, with a missing digit
//! treated as the minimum (`32`). Between any two distinct positions there is
//! always another one, so concurrent inserts never require renumbering.
//!
//! Positions are normalised on construction: trailing `32` bytes are removed
//! because they compare equal to absence. With that normalisation the derived
//! byte-lexicographic ordering of the underlying string is exactly the padded
//! digit comparison, which lets positions be used directly as ordered map keys.
//!
//! Generation is deterministic: every replica computing a position from the
//! same neighbours obtains the same bytes.
//!
//! # Examples
//!
//! ```
//! use trellis::crdt::position::{make_position, Pos};
//!
//! let first = make_position(None, None).unwrap();
//! let second = make_position(Some(&first), None).unwrap();
//! let middle = make_position(Some(&first), Some(&second)).unwrap();
//!
//! assert!(first < middle && middle < second);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::errors::CRDTError;
use crate::constants::{POSITION_MAX as MAX, POSITION_MIN as MIN};

/// An ordering key for a child of a list node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pos(String);

impl Pos {
    /// Parses and normalises a position received from the wire or from storage.
    ///
    /// Trailing minimum bytes are stripped. Fails if any byte is outside the
    /// alphabet or if nothing remains after normalisation.
    pub fn parse(s: &str) -> Result<Self, CRDTError> {
        if let Some(bad) = s.bytes().find(|b| !(MIN..=MAX).contains(b)) {
            return Err(CRDTError::InvalidPosition {
                position: s.to_string(),
                reason: format!("byte {bad} is outside the position alphabet"),
            });
        }
        let trimmed = s.trim_end_matches(MIN as char);
        if trimmed.is_empty() {
            return Err(CRDTError::InvalidPosition {
                position: s.to_string(),
                reason: "position is empty".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the position as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn from_digits(digits: Vec<u8>) -> Self {
        // Digits produced by the generators are always inside the alphabet.
        Self(digits.into_iter().map(char::from).collect())
    }
}

impl TryFrom<String> for Pos {
    type Error = CRDTError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Pos::parse(&s)
    }
}

impl TryFrom<&str> for Pos {
    type Error = CRDTError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Pos::parse(s)
    }
}

impl From<Pos> for String {
    fn from(pos: Pos) -> Self {
        pos.0
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns a position strictly between `before` and `after`.
///
/// If only `before` is given the result sorts after it; if only `after` is
/// given the result sorts before it; with neither the initial position
/// (`min + 1`) is returned.
///
/// # Errors
///
/// [`CRDTError::PositionOutOfOrder`] if `before` does not sort strictly before
/// `after`.
pub fn make_position(before: Option<&Pos>, after: Option<&Pos>) -> Result<Pos, CRDTError> {
    match (before, after) {
        (None, None) => Ok(Pos::from_digits(vec![MIN + 1])),
        (Some(before), None) => Ok(Pos::from_digits(next_digits(before.as_bytes()))),
        (None, Some(after)) => Ok(Pos::from_digits(previous_digits(after.as_bytes()))),
        (Some(before), Some(after)) => {
            if before >= after {
                return Err(CRDTError::PositionOutOfOrder {
                    before: before.to_string(),
                    after: after.to_string(),
                });
            }
            Ok(Pos::from_digits(digits_between(
                before.as_bytes(),
                after.as_bytes(),
            )))
        }
    }
}

/// Compares two sibling positions.
///
/// # Errors
///
/// [`CRDTError::PositionsEqual`] if the positions are equal: two children of
/// the same list must never share a position.
pub fn compare_position(a: &Pos, b: &Pos) -> Result<Ordering, CRDTError> {
    match a.cmp(b) {
        Ordering::Equal => Err(CRDTError::PositionsEqual {
            position: a.to_string(),
        }),
        ordering => Ok(ordering),
    }
}

/// Digits strictly between `before` and `after`; callers guarantee `before < after`.
fn digits_between(before: &[u8], after: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut index = 0;
    loop {
        let low = before.get(index).copied().unwrap_or(MIN);
        let high = after.get(index).copied().unwrap_or(MAX);
        if low == high {
            result.push(low);
            index += 1;
            continue;
        }
        if high - low == 1 {
            // No room at this digit: keep the lower one and extend precision.
            result.push(low);
            let rest = before.get(index + 1..).unwrap_or(&[]);
            result.extend(digits_between(rest, &[]));
        } else {
            result.push(low + (high - low) / 2);
        }
        return result;
    }
}

fn next_digits(before: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(before.len() + 1);
    for (i, &digit) in before.iter().enumerate() {
        if digit == MAX {
            result.push(digit);
            if i == before.len() - 1 {
                result.push(MIN + 1);
            }
        } else {
            result.push(digit + 1);
            break;
        }
    }
    result
}

fn previous_digits(after: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(after.len() + 1);
    for (i, &digit) in after.iter().enumerate() {
        if digit <= MIN + 1 {
            result.push(MIN);
            if i == after.len() - 1 {
                result.push(MAX);
            }
        } else {
            result.push(digit - 1);
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(s: &str) -> Pos {
        Pos::parse(s).unwrap()
    }

    #[test]
    fn test_initial_position() {
        assert_eq!(make_position(None, None).unwrap(), pos("!"));
    }

    #[test]
    fn test_midpoint_of_distant_digits() {
        assert_eq!(make_position(Some(&pos("!")), Some(&pos("#"))).unwrap(), pos("\""));
        assert_eq!(make_position(Some(&pos("A")), Some(&pos("a"))).unwrap(), pos("Q"));
    }

    #[test]
    fn test_consecutive_digits_extend_precision() {
        let between = make_position(Some(&pos("A")), Some(&pos("B"))).unwrap();
        assert_eq!(between, pos("AO"));
        assert!(pos("A") < between && between < pos("B"));
    }

    #[test]
    fn test_after_and_before() {
        assert_eq!(make_position(Some(&pos("A")), None).unwrap(), pos("B"));
        assert_eq!(make_position(Some(&pos("~")), None).unwrap(), pos("~!"));
        assert_eq!(make_position(None, Some(&pos("B"))).unwrap(), pos("A"));
        assert_eq!(make_position(None, Some(&pos("!"))).unwrap(), pos(" ~"));
    }

    #[test]
    fn test_out_of_order_bounds() {
        let err = make_position(Some(&pos("B")), Some(&pos("A"))).unwrap_err();
        assert!(matches!(err, CRDTError::PositionOutOfOrder { .. }));
        assert!(make_position(Some(&pos("A")), Some(&pos("A"))).is_err());
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(pos("A  "), pos("A"));
        assert!(Pos::parse("   ").is_err());
        assert!(Pos::parse("").is_err());
        assert!(Pos::parse("A\u{7f}").is_err());
    }

    #[test]
    fn test_compare_position() {
        assert_eq!(compare_position(&pos("A"), &pos("B")).unwrap(), Ordering::Less);
        assert_eq!(compare_position(&pos("A!"), &pos("A")).unwrap(), Ordering::Greater);
        assert!(compare_position(&pos("A"), &pos("A ")).is_err());
    }

    #[test]
    fn test_repeated_insert_at_front_stays_ordered() {
        let mut front = make_position(None, None).unwrap();
        for _ in 0..200 {
            let next = make_position(None, Some(&front)).unwrap();
            assert!(next < front);
            front = next;
        }
    }

    #[test]
    fn test_repeated_bisection_stays_ordered() {
        let low = pos("A");
        let mut high = pos("B");
        for _ in 0..200 {
            let mid = make_position(Some(&low), Some(&high)).unwrap();
            assert!(low < mid && mid < high);
            high = mid;
        }
    }
}
