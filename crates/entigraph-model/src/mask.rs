//! Traversal masks ("state graphs")
//!
//! A [`TraversalMask`] restricts which properties a traversal enters. Each
//! level lists the property names to follow, in order, with a nested mask
//! for the subtree below each one. Text form:
//!
//! ```text
//! customer,items(product(vendor),notes)
//! ```

use crate::error::ModelError;
use indexmap::IndexMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Tree of property names to traverse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalMask {
    entries: IndexMap<String, TraversalMask>,
}

impl TraversalMask {
    /// Mask that enters nothing
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `name` with nothing below it
    #[must_use]
    pub fn include(self, name: impl Into<String>) -> Self {
        self.with(name, Self::new())
    }

    /// Enter `name` with the given subtree mask
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, child: Self) -> Self {
        self.entries.insert(name.into(), child);
        self
    }

    /// Mask position for `name`, if it is entered
    #[inline]
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.entries.get(name)
    }

    /// Whether `name` is entered at this level
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entered names in mask order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Nothing entered at this level
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical text form, usable as an identity anchor
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }
}

impl Display for TraversalMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (name, child)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}")?;
            if !child.is_empty() {
                write!(f, "({child})")?;
            }
        }
        Ok(())
    }
}

impl FromStr for TraversalMask {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        let mut pos = 0;
        let mask = parse_level(&chars, &mut pos, 0)?;
        if pos < chars.len() {
            return Err(ModelError::InvalidMask {
                position: pos,
                reason: format!("unexpected '{}'", chars[pos]),
            });
        }
        Ok(mask)
    }
}

fn parse_level(chars: &[char], pos: &mut usize, depth: usize) -> Result<TraversalMask, ModelError> {
    let mut mask = TraversalMask::new();
    loop {
        skip_ws(chars, pos);
        let start = *pos;
        while *pos < chars.len() && (chars[*pos].is_alphanumeric() || chars[*pos] == '_') {
            *pos += 1;
        }
        if start == *pos {
            if chars.is_empty() && depth == 0 {
                return Ok(mask);
            }
            return Err(ModelError::InvalidMask {
                position: *pos,
                reason: "expected property name".into(),
            });
        }
        let name: String = chars[start..*pos].iter().collect();
        skip_ws(chars, pos);

        let mut child = TraversalMask::new();
        if chars.get(*pos) == Some(&'(') {
            *pos += 1;
            child = parse_level(chars, pos, depth + 1)?;
            if chars.get(*pos) != Some(&')') {
                return Err(ModelError::InvalidMask {
                    position: *pos,
                    reason: "expected ')'".into(),
                });
            }
            *pos += 1;
            skip_ws(chars, pos);
        }
        mask.entries.insert(name, child);

        match chars.get(*pos) {
            Some(',') => *pos += 1,
            Some(')') if depth > 0 => return Ok(mask),
            None => return Ok(mask),
            Some(c) => {
                return Err(ModelError::InvalidMask {
                    position: *pos,
                    reason: format!("unexpected '{c}'"),
                })
            }
        }
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}
