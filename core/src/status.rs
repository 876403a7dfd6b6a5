//! Acceptable response status codes.

/// A set of inclusive status code ranges.
///
/// An empty set accepts every code. Ranges may overlap, and a range whose
/// `from` exceeds its `to` matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptableStatusSet {
    ranges: Vec<(i64, i64)>,
}

impl AcceptableStatusSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, from: i64, to: i64) {
        self.ranges.push((from, to));
    }

    pub fn is_acceptable(&self, code: i64) -> bool {
        self.is_empty()
            || self
                .ranges
                .iter()
                .any(|&(from, to)| from <= code && code <= to)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
