//! The canonical scene model both dialects decode into.

use crate::config::ReaderOptions;
use crate::parsers::{binary, chunk::ChunkRecord, text, ParseError};
use crate::plug;
use linked_hash_map::LinkedHashMap;
use std::{fmt, io::Read, path::Path};

/// One whitespace separated value of an attribute, kept exactly as it appeared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

/// Punctuation a tokenizer may leave glued to a number.
fn trim_punctuation(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ',' | ';' | '[' | ']' | '(' | ')' | '{' | '}'))
}

impl Token {
    pub fn new<T: Into<String>>(text: T) -> Self {
        Token(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the token as a float regardless of locale, ignoring stray brackets and commas.
    pub fn to_f64(&self) -> Option<f64> {
        trim_punctuation(&self.0).parse().ok()
    }

    pub fn to_i64(&self) -> Option<i64> {
        let s = trim_punctuation(&self.0);
        s.parse()
            .ok()
            .or_else(|| s.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
    }

    /// `yes`/`no`, `on`/`off`, `true`/`false` and `1`/`0`.
    pub fn to_bool(&self) -> Option<bool> {
        match trim_punctuation(&self.0) {
            "yes" | "on" | "true" | "1" => Some(true),
            "no" | "off" | "false" | "0" => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_owned())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

/// A value (or value-less declaration) set on a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attribute {
    /// Attribute path relative to its node, e.g. `t`, `uvst[0].uvsp` or `fc[0:5]`.
    pub key: String,
    /// The `-type` the value was written with, if any.
    pub type_name: Option<String>,
    pub tokens: Vec<Token>,
    /// Flags the value was written with (`-k on`, `-s 4`, ...), in source order.
    pub flags: Vec<Token>,
}

impl Attribute {
    pub fn new<T: Into<String>>(key: T) -> Self {
        Attribute {
            key: key.into(),
            ..Attribute::default()
        }
    }

    pub fn with_type<T: Into<String>>(mut self, type_name: T) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_tokens<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// True for an attribute that was declared but never given a value.
    pub fn is_declared_only(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Every token as a float, `None` if any of them isn't numeric.
    pub fn floats(&self) -> Option<Vec<f64>> {
        self.tokens.iter().map(Token::to_f64).collect()
    }

    pub fn first_f64(&self) -> Option<f64> {
        self.tokens.first().and_then(Token::to_f64)
    }
}

/// A typed, named entity of the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    name: String,
    pub node_type: String,
    pub parent: Option<String>,
    /// Stable id written by `rename -uid`.
    pub uid: Option<String>,
    attributes: LinkedHashMap<String, Attribute>, //We use a LinkedHashMap here because we want to preserve insertion order
}

impl NodeRecord {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, node_type: T) -> Self {
        NodeRecord {
            name: name.into(),
            node_type: node_type.into(),
            parent: None,
            uid: None,
            attributes: LinkedHashMap::new(),
        }
    }

    pub fn with_parent<P: Into<String>>(mut self, parent: P) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name after the last hierarchy separator.
    pub fn leaf_name(&self) -> &str {
        plug::leaf_name(&self.name)
    }

    /// The stable id parsed as a UUID, when it is one.
    pub fn uuid(&self) -> Option<uuid::Uuid> {
        self.uid
            .as_deref()
            .and_then(|uid| uuid::Uuid::parse_str(uid).ok())
    }

    /// Sets an attribute. A key that was already declared keeps its position and takes the new
    /// value, the way replaying the source statements in order would.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        if let Some(existing) = self.attributes.get_mut(&attribute.key) {
            *existing = attribute;
        } else {
            self.attributes.insert(attribute.key.clone(), attribute);
        }
    }

    /// Adds an attribute only if the key is not declared yet. Returns whether it was added.
    pub fn add_attribute(&mut self, attribute: Attribute) -> bool {
        if self.attributes.contains_key(&attribute.key) {
            return false;
        }
        self.attributes.insert(attribute.key.clone(), attribute);
        true
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    /// The first of `keys` that is declared, e.g. a short name and its long form.
    pub fn attribute_any(&self, keys: &[&str]) -> Option<&Attribute> {
        keys.iter().find_map(|k| self.attributes.get(*k))
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

/// A directed edge from a source plug to a destination plug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub source: String,
    pub destination: String,
    pub force: bool,
    /// Written with `-na`: connect to the next free index of the destination array.
    pub next_available: bool,
}

impl ConnectionRecord {
    pub fn new<S: Into<String>, D: Into<String>>(source: S, destination: D) -> Self {
        ConnectionRecord {
            source: source.into(),
            destination: destination.into(),
            force: false,
            next_available: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn source_node(&self) -> &str {
        plug::node_name(&self.source)
    }

    pub fn source_attr(&self) -> &str {
        plug::attribute_path(&self.source)
    }

    pub fn destination_node(&self) -> &str {
        plug::node_name(&self.destination)
    }

    pub fn destination_attr(&self) -> &str {
        plug::attribute_path(&self.destination)
    }
}

/// Where a raw statement came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RawOrigin {
    /// 1-based line of a text document.
    Line(usize),
    /// Index into `SceneGraph::chunks`.
    Chunk(usize),
}

/// A statement or chunk the decoder did not model, kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub origin: RawOrigin,
    /// The command word (text) or chunk tag (binary).
    pub command: String,
    pub text: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dialect {
    Text,
    Binary,
}

/// A `requires` line: a product or plug-in and the version the scene was saved with.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub product: String,
    pub version: String,
    pub flags: Vec<Token>,
}

/// The `currentUnit` settings, as written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Units {
    pub linear: Option<String>,
    pub angle: Option<String>,
    pub time: Option<String>,
}

impl Units {
    /// Frames per second of the time unit. Clock units (`sec`, `millisec`, ...) give ticks per
    /// second.
    pub fn time_fps(&self) -> Option<f64> {
        let time = self.time.as_deref()?;
        let fps = match time {
            "game" => 15.0,
            "film" => 24.0,
            "pal" => 25.0,
            "ntsc" => 30.0,
            "show" => 48.0,
            "palf" => 50.0,
            "ntscf" => 60.0,
            "hour" => 1.0 / 3600.0,
            "min" => 1.0 / 60.0,
            "sec" => 1.0,
            "millisec" => 1000.0,
            other => other.strip_suffix("fps")?.parse().ok()?,
        };
        Some(fps)
    }

    /// Centimeters per linear unit. Unset or unknown units are centimeters.
    pub fn linear_to_cm(&self) -> f64 {
        match self.linear.as_deref() {
            Some("mm") | Some("millimeter") => 0.1,
            Some("m") | Some("meter") => 100.0,
            Some("km") | Some("kilometer") => 100_000.0,
            Some("in") | Some("inch") => 2.54,
            Some("ft") | Some("foot") => 30.48,
            Some("yd") | Some("yard") => 91.44,
            Some("mi") | Some("mile") => 160_934.4,
            _ => 1.0,
        }
    }

    /// Degrees per angular unit. Unset or unknown units are degrees.
    pub fn angle_to_degrees(&self) -> f64 {
        match self.angle.as_deref() {
            Some("rad") | Some("radian") => 180.0 / std::f64::consts::PI,
            Some("min") => 1.0 / 60.0,
            Some("sec") => 1.0 / 3600.0,
            _ => 1.0,
        }
    }
}

/// Everything a document says about itself rather than about its nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatInfo {
    pub dialect: Option<Dialect>,
    pub version: Option<String>,
    pub requires: Vec<Requirement>,
    pub units: Units,
    /// `fileInfo` pairs in source order.
    pub file_info: Vec<(String, String)>,
    /// Leading `//` comment lines of a text document.
    pub header_comments: Vec<String>,
}

impl FormatInfo {
    pub fn file_info(&self, key: &str) -> Option<&str> {
        self.file_info
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Nodes, connections and everything else a scene document holds.
///
/// A graph is built once by a reader. Afterwards it only grows through `apply`, which adds
/// records but never changes or removes the ones already there.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneGraph {
    nodes: LinkedHashMap<String, NodeRecord>,
    pub connections: Vec<ConnectionRecord>,
    pub raw_statements: Vec<RawStatement>,
    pub format: FormatInfo,
    /// Every chunk of a binary document, empty for text.
    pub chunks: Vec<ChunkRecord>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a text document.
    pub fn from_text(source: &str) -> Result<Self, ParseError> {
        text::parse_text(source, &ReaderOptions::default()).into_result()
    }

    /// Parses a binary document.
    pub fn from_binary(data: &[u8]) -> Result<Self, ParseError> {
        binary::parse_binary(data, &ReaderOptions::default()).into_result()
    }

    /// Reads a whole document, picking the dialect from its first bytes.
    pub fn from_data<T: Read>(mut data: T) -> Result<Self, SceneError> {
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)?;

        if binary::is_binary(&buffer) {
            Ok(Self::from_binary(&buffer)?)
        } else {
            Ok(Self::from_text(&text::decode_source(&buffer))?)
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SceneError> {
        let file = std::fs::File::open(path)?;
        Self::from_data(file)
    }

    /// Looks a node up by its exact name.
    pub fn node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    /// Looks a node up by exact name, then by the first node whose leaf name matches.
    pub fn find_node(&self, name: &str) -> Option<&NodeRecord> {
        self.node(name).or_else(|| {
            self.nodes
                .values()
                .find(|n| plug::node_matches(n.name(), name))
        })
    }

    pub(crate) fn node_mut(&mut self, name: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(name)
    }

    /// Name of the node `find_node` resolves to.
    pub(crate) fn resolve_name(&self, name: &str) -> Option<String> {
        self.find_node(name).map(|n| n.name().to_owned())
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Adds a node unless one with the same name exists. Returns whether it was added.
    pub fn add_node(&mut self, node: NodeRecord) -> bool {
        if self.nodes.contains_key(&node.name) {
            return false;
        }
        self.nodes.insert(node.name.clone(), node);
        true
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes whose parent resolves to `name`.
    pub fn children_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        self.nodes.values().filter(move |n| {
            n.parent
                .as_deref()
                .map_or(false, |p| plug::node_matches(p, name))
        })
    }

    /// Applies what a pass wants to add. Existing nodes, attributes and connections are left as
    /// they are; returns how many records were added.
    pub fn apply(&mut self, additions: SceneAdditions) -> usize {
        let mut added = 0;
        for node in additions.nodes {
            if self.add_node(node) {
                added += 1;
            }
        }
        for (node, attribute) in additions.attributes {
            if let Some(record) = self.nodes.get_mut(&node) {
                if record.add_attribute(attribute) {
                    added += 1;
                }
            }
        }
        added += additions.connections.len();
        self.connections.extend(additions.connections);
        added
    }

    /// Runs a pass and applies its additions.
    pub fn run_pass<P: ScenePass + ?Sized>(&mut self, pass: &P) -> usize {
        let additions = pass.additions(self);
        let added = self.apply(additions);
        tracing::debug!("pass '{}' added {} records", pass.name(), added);
        added
    }
}

/// Errors of the reader entry points that open files or streams.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Records a pass wants to add to a graph.
#[derive(Debug, Clone, Default)]
pub struct SceneAdditions {
    pub nodes: Vec<NodeRecord>,
    /// Attributes for existing nodes, keyed by node name.
    pub attributes: Vec<(String, Attribute)>,
    pub connections: Vec<ConnectionRecord>,
}

/// A post-processing step that derives new records from a built graph.
pub trait ScenePass {
    fn name(&self) -> &str;

    fn additions(&self, scene: &SceneGraph) -> SceneAdditions;
}

/// Adds an `"unknown"` record for every parent name no record defines, so hierarchy walks
/// don't stop at nodes that were filtered out of the document.
#[derive(Debug, Default)]
pub struct MissingParentPass;

impl ScenePass for MissingParentPass {
    fn name(&self) -> &str {
        "missing-parent"
    }

    fn additions(&self, scene: &SceneGraph) -> SceneAdditions {
        let mut additions = SceneAdditions::default();
        for node in scene.nodes() {
            if let Some(parent) = &node.parent {
                let known = scene.find_node(parent).is_some()
                    || additions.nodes.iter().any(|n| n.name() == parent);
                if !known {
                    additions.nodes.push(NodeRecord::new(parent.clone(), "unknown"));
                }
            }
        }
        additions
    }
}
