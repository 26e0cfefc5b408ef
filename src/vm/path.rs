use std::convert::Infallible;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// A dotted lookup path such as `a.b.c`.
///
/// Resolved segment by segment against the global table by
/// [`Vm::get`](crate::Vm::get). An empty path is invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StringPath {
    segments: Vec<String>,
}

impl StringPath {
    pub fn new() -> Self {
        StringPath::default()
    }

    pub fn push(&mut self, segment: impl Into<String>) -> &mut Self {
        self.segments.push(segment.into());
        self
    }

    /// Drop the last `count` segments.
    pub fn remove_back(&mut self, count: usize) {
        let keep = self.segments.len().saturating_sub(count);
        self.segments.truncate(keep);
    }

    /// Drop the first `count` segments.
    pub fn remove_front(&mut self, count: usize) {
        let count = count.min(self.segments.len());
        self.segments.drain(..count);
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.segments.iter()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl FromStr for StringPath {
    type Err = Infallible;

    /// Split on `.`; empty segments are skipped, so `""` is the empty path.
    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(StringPath {
            segments: s
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

impl From<&str> for StringPath {
    fn from(s: &str) -> Self {
        let Ok(path) = s.parse();
        path
    }
}

impl<S: Into<String>> FromIterator<S> for StringPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        StringPath {
            segments: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a StringPath {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Add<&str> for StringPath {
    type Output = StringPath;

    fn add(mut self, segment: &str) -> StringPath {
        self.push(segment);
        self
    }
}

impl Add<&StringPath> for StringPath {
    type Output = StringPath;

    fn add(mut self, other: &StringPath) -> StringPath {
        self += other;
        self
    }
}

impl AddAssign<&str> for StringPath {
    fn add_assign(&mut self, segment: &str) {
        self.push(segment);
    }
}

impl AddAssign<&StringPath> for StringPath {
    fn add_assign(&mut self, other: &StringPath) {
        self.segments.extend(other.segments.iter().cloned());
    }
}

impl fmt::Display for StringPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let path: StringPath = "a.b.c".parse().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), Some("a"));
        assert_eq!(path.last(), Some("c"));
        assert!(path.is_valid());
        assert_eq!(path.to_string(), "a.b.c");
    }

    #[test]
    fn test_empty_is_invalid() {
        assert!(!StringPath::new().is_valid());
        assert!(!StringPath::from("").is_valid());
        assert!(!StringPath::from("..").is_valid());
    }

    #[test]
    fn test_concatenation() {
        let mut path = StringPath::from("a") + "b";
        path += "c";
        path += &StringPath::from("d.e");
        assert_eq!(path.to_string(), "a.b.c.d.e");
        let joined = StringPath::from("x") + &path;
        assert_eq!(joined.len(), 6);
    }

    #[test]
    fn test_remove() {
        let mut path = StringPath::from("a.b.c.d");
        path.remove_back(1);
        assert_eq!(path.to_string(), "a.b.c");
        path.remove_front(2);
        assert_eq!(path.to_string(), "c");
        path.remove_front(5);
        assert!(path.is_empty());
        path.push("z").push("y");
        path.remove_back(10);
        assert!(!path.is_valid());
    }

    #[test]
    fn test_iter_and_clear() {
        let mut path: StringPath = ["x", "y"].into_iter().collect();
        let joined: Vec<&str> = path.iter().map(String::as_str).collect();
        assert_eq!(joined, ["x", "y"]);
        path.clear();
        assert_eq!(path.len(), 0);
    }
}
