//! Path expressions for addressing within an object graph
//!
//! Provides [`PathExpr`], the parsed form of the compact path language:
//!
//! ```text
//! path      := ".." | "/" | ["/"] step ("/" step)*
//! step      := ".."
//!            | name
//!            | name "." index0 ["+"]
//!            | name "." "<<"
//!            | name "[" index1 ["+"] "]"
//!            | name "[" "<<" "]"
//!            | name "[" attr "=" literal "]"
//!            | name "[" key "]"
//! ```
//!
//! `name.N` counts from zero, `name[N]` from one. A trailing `+` turns the
//! position into an insertion point, `<<` addresses the end of the list.

use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Position inside a list-valued property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Index {
    /// Zero-based position
    pub position: usize,
    /// Insert before `position` on write
    pub insert: bool,
    /// Written with the one-based bracket form
    pub one_based: bool,
}

impl Index {
    /// Position as written in the source text
    #[inline]
    #[must_use]
    pub fn written(&self) -> usize {
        if self.one_based {
            self.position + 1
        } else {
            self.position
        }
    }
}

/// Element selector applied to a step's property
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Positional access
    Index(Index),
    /// End of list: last element on read, append on write
    Append,
    /// First element whose scalar attribute equals the literal
    Filter {
        /// Attribute name
        attr: String,
        /// Literal with quotes stripped
        literal: String,
    },
    /// Map key (non-numeric bracket content)
    Key(String),
}

/// One path component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Parent via containment
    Container,
    /// Property, optionally narrowed to one element
    Property {
        /// Property name or alias
        name: String,
        /// Element selector
        selector: Option<Selector>,
    },
}

impl Step {
    /// Plain property step
    #[inline]
    #[must_use]
    pub fn property(name: impl Into<String>) -> Self {
        Self::Property {
            name: name.into(),
            selector: None,
        }
    }
}

/// Parsed path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpr {
    absolute: bool,
    steps: SmallVec<[Step; 4]>,
}

impl PathExpr {
    /// Path from explicit steps
    #[must_use]
    pub fn new(absolute: bool, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            absolute,
            steps: steps.into_iter().collect(),
        }
    }

    /// Single property step
    #[inline]
    #[must_use]
    pub fn property(name: impl Into<String>) -> Self {
        Self::new(false, [Step::property(name)])
    }

    /// `/` on its own
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self::new(true, [])
    }

    /// Starts at the top of the containment chain
    #[inline]
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Path components, left to right
    #[inline]
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// First step and the relative remainder
    #[must_use]
    pub fn split_first(&self) -> Option<(&Step, Self)> {
        self.steps.split_first().map(|(first, rest)| {
            (
                first,
                Self {
                    absolute: false,
                    steps: rest.iter().cloned().collect(),
                },
            )
        })
    }

    /// Last step and the path leading to it
    #[must_use]
    pub fn split_last(&self) -> Option<(&Step, Self)> {
        self.steps.split_last().map(|(last, rest)| {
            (
                last,
                Self {
                    absolute: self.absolute,
                    steps: rest.iter().cloned().collect(),
                },
            )
        })
    }

    /// Number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// No steps (only valid for `/`)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, ".."),
            Self::Property { name, selector } => {
                write!(f, "{name}")?;
                match selector {
                    None => Ok(()),
                    Some(Selector::Index(idx)) => {
                        let plus = if idx.insert { "+" } else { "" };
                        if idx.one_based {
                            write!(f, "[{}{plus}]", idx.written())
                        } else {
                            write!(f, ".{}{plus}", idx.written())
                        }
                    }
                    Some(Selector::Append) => write!(f, "[<<]"),
                    Some(Selector::Filter { attr, literal }) => write!(f, "[{attr}='{literal}']"),
                    Some(Selector::Key(key)) => write!(f, "[{key}]"),
                }
            }
        }
    }
}

impl Display for PathExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

impl FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s == "/" {
            return Ok(Self::root());
        }

        let (absolute, body) = match s.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let steps = split_steps(body)?
            .into_iter()
            .map(parse_step)
            .collect::<Result<SmallVec<[Step; 4]>, _>>()?;

        Ok(Self { absolute, steps })
    }
}

/// Split on `/` outside brackets
fn split_steps(body: &str) -> Result<Vec<&str>, PathError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth > 0 || quote.is_some() {
        return Err(PathError::UnterminatedBracket(body.to_string()));
    }
    parts.push(&body[start..]);
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PathError::EmptySegment);
    }
    Ok(parts)
}

fn parse_step(text: &str) -> Result<Step, PathError> {
    if text == ".." {
        return Ok(Step::Container);
    }

    if let Some(open) = text.find('[') {
        let name = &text[..open];
        validate_name(name, text)?;
        let inner = text[open + 1..]
            .strip_suffix(']')
            .ok_or_else(|| PathError::TrailingCharacters(text.to_string()))?;
        let selector = parse_bracket(inner, text)?;
        return Ok(Step::Property {
            name: name.to_string(),
            selector: Some(selector),
        });
    }

    if let Some((name, index)) = text.split_once('.') {
        validate_name(name, text)?;
        let selector = if index == "<<" {
            Selector::Append
        } else {
            let (digits, insert) = strip_insert(index);
            let position = digits
                .parse::<usize>()
                .map_err(|_| PathError::InvalidIndex(text.to_string()))?;
            Selector::Index(Index {
                position,
                insert,
                one_based: false,
            })
        };
        return Ok(Step::Property {
            name: name.to_string(),
            selector: Some(selector),
        });
    }

    validate_name(text, text)?;
    Ok(Step::property(text))
}

fn parse_bracket(inner: &str, step: &str) -> Result<Selector, PathError> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(PathError::InvalidIndex(step.to_string()));
    }
    if inner == "<<" {
        return Ok(Selector::Append);
    }
    if let Some((attr, literal)) = inner.split_once('=') {
        let attr = attr.trim();
        validate_name(attr, step)?;
        return Ok(Selector::Filter {
            attr: attr.to_string(),
            literal: crate::value::strip_quotes(literal).to_string(),
        });
    }

    let (digits, insert) = strip_insert(inner);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        let written = digits
            .parse::<usize>()
            .map_err(|_| PathError::InvalidIndex(step.to_string()))?;
        if written == 0 {
            return Err(PathError::ZeroIndex(step.to_string()));
        }
        return Ok(Selector::Index(Index {
            position: written - 1,
            insert,
            one_based: true,
        }));
    }

    Ok(Selector::Key(crate::value::strip_quotes(inner).to_string()))
}

fn strip_insert(text: &str) -> (&str, bool) {
    match text.strip_suffix('+') {
        Some(rest) => (rest, true),
        None => (text, false),
    }
}

fn validate_name(name: &str, step: &str) -> Result<(), PathError> {
    if name.is_empty() {
        return Err(PathError::EmptySegment);
    }
    if name.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '$' && c != '-') {
        return Err(PathError::InvalidSegment(step.to_string()));
    }
    Ok(())
}

/// Errors related to path expressions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty or blank path
    #[error("path is empty")]
    Empty,

    /// Empty segment in path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid segment characters
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    /// Index is not a non-negative integer
    #[error("invalid index in step: {0}")]
    InvalidIndex(String),

    /// One-based index of zero
    #[error("bracket index is 1-based, got 0 in: {0}")]
    ZeroIndex(String),

    /// `[` without matching `]` or unbalanced quotes
    #[error("unterminated bracket in: {0}")]
    UnterminatedBracket(String),

    /// Characters after a closing bracket
    #[error("unexpected characters after selector in: {0}")]
    TrailingCharacters(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> PathExpr {
        s.parse().unwrap()
    }

    fn selector(s: &str) -> Option<Selector> {
        match &parse(s).steps()[0] {
            Step::Property { selector, .. } => selector.clone(),
            Step::Container => None,
        }
    }

    #[test]
    fn single_name() {
        let path = parse("name");
        assert_eq!(path.steps(), &[Step::property("name")]);
        assert!(!path.is_absolute());
    }

    #[test]
    fn container_and_root() {
        assert_eq!(parse("..").steps(), &[Step::Container]);
        let root = parse("/");
        assert!(root.is_absolute());
        assert!(root.is_empty());
    }

    #[test]
    fn zero_based_dot_index() {
        assert_eq!(
            selector("items.0"),
            Some(Selector::Index(Index {
                position: 0,
                insert: false,
                one_based: false
            }))
        );
        assert_eq!(
            selector("items.3+"),
            Some(Selector::Index(Index {
                position: 3,
                insert: true,
                one_based: false
            }))
        );
    }

    #[test]
    fn one_based_bracket_index() {
        assert_eq!(
            selector("items[1]"),
            Some(Selector::Index(Index {
                position: 0,
                insert: false,
                one_based: true
            }))
        );
        assert!(matches!(
            "items[0]".parse::<PathExpr>(),
            Err(PathError::ZeroIndex(_))
        ));
    }

    #[test]
    fn append_forms() {
        assert_eq!(selector("items.<<"), Some(Selector::Append));
        assert_eq!(selector("items[<<]"), Some(Selector::Append));
    }

    #[test]
    fn filter_strips_quotes() {
        assert_eq!(
            selector("items[sku='A-1']"),
            Some(Selector::Filter {
                attr: "sku".into(),
                literal: "A-1".into()
            })
        );
        assert_eq!(
            selector("items[id=7]"),
            Some(Selector::Filter {
                attr: "id".into(),
                literal: "7".into()
            })
        );
    }

    #[test]
    fn map_key() {
        assert_eq!(selector("attrs[color]"), Some(Selector::Key("color".into())));
    }

    #[test]
    fn multi_step_with_slash_in_literal() {
        let path = parse("/customer/orders[ref='a/b']/lines.1");
        assert!(path.is_absolute());
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "/customer/orders[ref='a/b']/lines.1");
    }

    #[test]
    fn split_first_is_relative() {
        let path = parse("/a/b/c");
        let (first, rest) = path.split_first().unwrap();
        assert_eq!(first, &Step::property("a"));
        assert!(!rest.is_absolute());
        assert_eq!(rest.to_string(), "b/c");
    }

    #[test]
    fn errors() {
        assert_eq!("".parse::<PathExpr>(), Err(PathError::Empty));
        assert_eq!("a//b".parse::<PathExpr>(), Err(PathError::EmptySegment));
        assert!(matches!("a[1".parse::<PathExpr>(), Err(PathError::UnterminatedBracket(_))));
        assert!(matches!("a.x".parse::<PathExpr>(), Err(PathError::InvalidIndex(_))));
        assert!(matches!("a b".parse::<PathExpr>(), Err(PathError::InvalidSegment(_))));
        assert!(matches!("a[1]x".parse::<PathExpr>(), Err(PathError::TrailingCharacters(_))));
    }
}
