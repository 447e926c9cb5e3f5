//! Compact sets of integers, used for VLAN membership.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub from: i64,
    pub to: i64,
}

impl Range {
    pub fn single(v: i64) -> Self {
        Self { from: v, to: v }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("value {value} must be greater than previous value {last}")]
    NotIncreasing { value: i64, last: i64 },
    #[error("invalid range text {text:?}")]
    Syntax { text: String },
}

/// Ordered, non-overlapping, non-adjacent ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ranges {
    ranges: Vec<Range>,
}

impl Ranges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ranges as reported by a device, without compaction.
    pub fn from_ranges(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    /// Read a `[{from, to}, ...]` JSON value.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            let from = crate::value_as_i64(item.get("from")?)?;
            let to = crate::value_as_i64(item.get("to")?)?;
            ranges.push(Range { from, to });
        }
        Some(Self { ranges })
    }

    /// Build from sorted values; duplicates are an error.
    pub fn from_values<I: IntoIterator<Item = i64>>(values: I) -> Result<Self, RangeError> {
        let mut out = Self::new();
        for v in values {
            out.add(v)?;
        }
        Ok(out)
    }

    /// Append `value`, which must be greater than every value already held.
    pub fn add(&mut self, value: i64) -> Result<&mut Self, RangeError> {
        match self.ranges.last_mut() {
            Some(last) if value <= last.to => {
                return Err(RangeError::NotIncreasing {
                    value,
                    last: last.to,
                })
            }
            Some(last) if value == last.to + 1 => last.to = value,
            _ => self.ranges.push(Range::single(value)),
        }
        Ok(self)
    }

    /// Remove `value`, splitting the range that holds it if needed.
    pub fn remove(&mut self, value: i64) -> &mut Self {
        let Some(idx) = self
            .ranges
            .iter()
            .position(|r| r.from <= value && value <= r.to)
        else {
            return self;
        };
        let r = self.ranges[idx];
        if r.from == r.to {
            self.ranges.remove(idx);
        } else if value == r.from {
            self.ranges[idx].from += 1;
        } else if value == r.to {
            self.ranges[idx].to -= 1;
        } else {
            self.ranges[idx] = Range {
                from: r.from,
                to: value - 1,
            };
            self.ranges.insert(
                idx + 1,
                Range {
                    from: value + 1,
                    to: r.to,
                },
            );
        }
        self
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, value: i64) -> bool {
        self.ranges.iter().any(|r| r.from <= value && value <= r.to)
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.ranges
                .iter()
                .map(|r| json!({ "from": r.from, "to": r.to }))
                .collect(),
        )
    }

    /// `1-3<sep>5<sep>7-8`
    pub fn to_string_with(&self, separator: &str) -> String {
        self.ranges
            .iter()
            .map(|r| {
                if r.from == r.to {
                    r.from.to_string()
                } else {
                    format!("{}-{}", r.from, r.to)
                }
            })
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(","))
    }
}

impl FromStr for Ranges {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Ranges::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let syntax = || RangeError::Syntax {
                text: part.to_string(),
            };
            let (from, to) = match part.split_once('-') {
                Some((a, b)) => (
                    a.trim().parse::<i64>().map_err(|_| syntax())?,
                    b.trim().parse::<i64>().map_err(|_| syntax())?,
                ),
                None => {
                    let v = part.parse::<i64>().map_err(|_| syntax())?;
                    (v, v)
                }
            };
            if to < from {
                return Err(syntax());
            }
            out.add(from)?;
            if let Some(last) = out.ranges.last_mut() {
                last.to = to;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_compacts_adjacent_values() {
        let r = Ranges::from_values([1, 2, 3, 5, 7, 8]).unwrap();
        assert_eq!(
            r.ranges(),
            &[
                Range { from: 1, to: 3 },
                Range { from: 5, to: 5 },
                Range { from: 7, to: 8 }
            ]
        );
    }

    #[test]
    fn add_rejects_non_increasing() {
        let mut r = Ranges::from_values([4]).unwrap();
        assert_eq!(
            r.add(4).unwrap_err(),
            RangeError::NotIncreasing { value: 4, last: 4 }
        );
        assert!(r.add(2).is_err());
    }

    #[test]
    fn remove_splits_inner_value() {
        let mut r = Ranges::from_values([1, 2, 3, 5, 7, 8]).unwrap();
        r.remove(2);
        assert_eq!(
            r.ranges(),
            &[
                Range { from: 1, to: 1 },
                Range { from: 3, to: 3 },
                Range { from: 5, to: 5 },
                Range { from: 7, to: 8 }
            ]
        );
        r.remove(5).remove(8).remove(100);
        assert_eq!(r.to_string(), "1,3,7");
    }

    #[test]
    fn remove_edges() {
        let mut r: Ranges = "1-4094".parse().unwrap();
        r.remove(1);
        assert_eq!(r.to_string_with(", "), "2-4094");
        r.remove(4094);
        assert_eq!(r.to_string(), "2-4093");
    }

    #[test]
    fn text_form_reads_back() {
        let r = Ranges::from_values([1, 2, 3, 5, 7, 8]).unwrap();
        let text = r.to_string();
        assert_eq!(text, "1-3,5,7-8");
        assert_eq!(text.parse::<Ranges>().unwrap(), r);
        assert!("3-1".parse::<Ranges>().is_err());
        assert!("a".parse::<Ranges>().is_err());
    }

    #[test]
    fn json_value_form() {
        let r = Ranges::from_values([10, 11, 30]).unwrap();
        let v = r.to_value();
        assert_eq!(Ranges::from_value(&v), Some(r));
    }
}
