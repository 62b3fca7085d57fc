//! Helpers for `node.attribute[index]` plug paths.
//!
//! Node names use `|` as the hierarchy separator, so the same node may show up as
//! `|group1|pCube1` in one statement and `pCube1` in the next. `node_matches` treats both as
//! the same node. That equivalence is not transitive when two branches hold nodes with the
//! same leaf name: lookups built on it resolve to the first match in document order.

use crate::parsers::{TextResult, TokenParseError};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res, opt},
    multi::many0,
    sequence::{delimited, preceded, separated_pair},
};
use std::fmt;

pub const HIERARCHY_SEPARATOR: char = '|';

/// Splits a plug at its last `.` into node and attribute.
pub fn split_plug(path: &str) -> Option<(&str, &str)> {
    let dot = path.rfind('.')?;
    Some((&path[..dot], &path[dot + 1..]))
}

/// The text before the last `.`, or the whole path if it has none.
pub fn extract_node_part(path: &str) -> &str {
    split_plug(path).map_or(path, |(node, _)| node)
}

/// The text after the last `.`, or `""` if the path has none.
pub fn extract_attr_part(path: &str) -> &str {
    split_plug(path).map_or("", |(_, attr)| attr)
}

/// Offset of the first `.` outside brackets. Node names never contain a dot, attribute paths
/// of compound and array children do (`shape.iog[0].og[1].gid`).
fn node_dot(path: &str) -> Option<usize> {
    let mut depth = 0_i32;
    for (i, c) in path.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            '.' if depth <= 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// The node a plug belongs to, for plugs whose attribute path has several levels.
pub fn node_name(path: &str) -> &str {
    node_dot(path).map_or(path, |dot| &path[..dot])
}

/// The full attribute path of a plug, `""` if the plug names only a node.
pub fn attribute_path(path: &str) -> &str {
    node_dot(path).map_or("", |dot| &path[dot + 1..])
}

/// The text after the last hierarchy separator.
pub fn leaf_name(path: &str) -> &str {
    path.rsplit(HIERARCHY_SEPARATOR).next().unwrap_or(path)
}

/// True when both names are equal or share the same leaf name.
pub fn node_matches(a: &str, b: &str) -> bool {
    a == b || leaf_name(a) == leaf_name(b)
}

/// True when both plugs address the same attribute of matching nodes.
pub fn plugs_match(a: &str, b: &str) -> bool {
    attribute_path(a) == attribute_path(b) && node_matches(node_name(a), node_name(b))
}

/// An index into a multi attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlugIndex {
    Single(u64),
    /// An inclusive range, `[0:5]`.
    Range(u64, u64),
    /// `[*]`
    All,
}

impl fmt::Display for PlugIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlugIndex::Single(i) => write!(f, "[{}]", i),
            PlugIndex::Range(a, b) => write!(f, "[{}:{}]", a, b),
            PlugIndex::All => f.write_str("[*]"),
        }
    }
}

/// One `.`-separated level of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugSegment {
    pub name: String,
    pub indices: Vec<PlugIndex>,
}

/// A parsed plug path. `node` is empty for plugs relative to the current node (`.t`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plug {
    pub node: String,
    pub segments: Vec<PlugSegment>,
}

impl Plug {
    /// Parses a whole plug path, `None` if any of it is malformed.
    pub fn parse(path: &str) -> Option<Plug> {
        match plug(path) {
            Ok(("", plug)) => Some(plug),
            _ => None,
        }
    }

    pub fn is_relative(&self) -> bool {
        self.node.is_empty()
    }

    /// The attribute part without the node, e.g. `iog[0].og[1]`.
    pub fn attribute(&self) -> String {
        self.segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Name of the outermost attribute, without indices.
    pub fn root_attribute(&self) -> Option<&str> {
        self.segments.first().map(|s| s.name.as_str())
    }
}

impl fmt::Display for PlugSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for index in &self.indices {
            write!(f, "{}", index)?;
        }
        Ok(())
    }
}

impl fmt::Display for Plug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node)?;
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

fn number(input: &str) -> TextResult<u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

fn plug_index(input: &str) -> TextResult<PlugIndex> {
    delimited(
        char('['),
        alt((
            map(tag("*"), |_| PlugIndex::All),
            map(separated_pair(number, char(':'), number), |(a, b)| {
                PlugIndex::Range(a, b)
            }),
            map(number, PlugIndex::Single),
        )),
        char(']'),
    )(input)
}

fn segment(input: &str) -> TextResult<PlugSegment> {
    let (input, name) = take_while1::<_, _, TokenParseError>(|c: char| {
        c.is_ascii_alphanumeric() || c == '_'
    })(input)?;
    let (input, indices) = many0(plug_index)(input)?;
    Ok((
        input,
        PlugSegment {
            name: name.to_owned(),
            indices,
        },
    ))
}

fn plug(input: &str) -> TextResult<Plug> {
    let (input, node) = take_while::<_, _, TokenParseError>(|c: char| {
        c != '.' && c != '[' && !c.is_whitespace()
    })(input)?;
    let (input, first) = opt(preceded(char('.'), segment))(input)?;
    let (input, mut rest) = many0(preceded(char('.'), segment))(input)?;

    let segments = match first {
        Some(first) => {
            rest.insert(0, first);
            rest
        }
        None if node.is_empty() => {
            return Err(nom::Err::Error(TokenParseError::NomError {
                kind: nom::error::ErrorKind::Verify,
                other: None,
            }))
        }
        None => rest,
    };

    Ok((
        input,
        Plug {
            node: node.to_owned(),
            segments,
        },
    ))
}
