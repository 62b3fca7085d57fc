//! The text dialect: `;`-terminated command statements.
//!
//! Tokenizing is done with nom, one statement at a time, so that everything read before a
//! malformed statement is still in the graph when the error is reported. Statements the reader
//! doesn't model are kept verbatim as raw statements.

use super::primitive::text_from_bytes;
use super::{ParseError, ParseErrorKind, ParseOutcome, Position, TextResult, TokenParseError};
use crate::config::ReaderOptions;
use crate::plug;
use crate::scene::{
    Attribute, ConnectionRecord, Dialect, NodeRecord, RawOrigin, RawStatement, Requirement,
    SceneGraph, Token,
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace1},
    combinator::map,
    sequence::preceded,
};
use std::borrow::Cow;

/// One token of a statement.
#[derive(Debug, Clone, PartialEq)]
struct Word {
    text: String,
    quoted: bool,
}

impl Word {
    /// `-n`, `-type`; not `-1.5` and not anything quoted.
    fn is_flag(&self) -> bool {
        let mut chars = self.text.chars();
        !self.quoted
            && chars.next() == Some('-')
            && chars.next().map_or(false, |c| c.is_ascii_alphabetic())
    }
}

#[derive(Debug)]
struct Statement<'a> {
    /// Byte offset of the first word.
    offset: usize,
    /// Source text from the first word up to, not including, the `;`.
    text: &'a str,
    words: Vec<Word>,
}

enum Trivia<'a> {
    Space,
    LineComment(&'a str),
    BlockComment,
}

fn block_comment(input: &str) -> TextResult<&str> {
    let (body, _) = tag::<_, _, TokenParseError>("/*")(input)?;
    let (rest, comment) = take_until("*/")(body).map_err(|_: nom::Err<TokenParseError>| {
        nom::Err::Failure(TokenParseError::UnterminatedComment)
    })?;
    Ok((&rest[2..], comment))
}

fn trivia(input: &str) -> TextResult<Trivia> {
    alt((
        map(multispace1, |_| Trivia::Space),
        map(
            preceded(tag("//"), take_while(|c: char| c != '\n')),
            Trivia::LineComment,
        ),
        map(block_comment, |_| Trivia::BlockComment),
    ))(input)
}

/// A double quoted string with `\"`, `\\`, `\n`, `\t` and `\r` escapes. Other escaped
/// characters stand for themselves.
fn quoted(input: &str) -> TextResult<String> {
    let (body, _) = char::<_, TokenParseError>('"')(input)?;
    let mut text = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[i + 1..], text)),
            '\\' => match chars.next() {
                Some((_, 'n')) => text.push('\n'),
                Some((_, 't')) => text.push('\t'),
                Some((_, 'r')) => text.push('\r'),
                Some((_, other)) => text.push(other),
                None => break,
            },
            c => text.push(c),
        }
    }
    Err(nom::Err::Failure(TokenParseError::UnterminatedString))
}

fn word(input: &str) -> TextResult<Word> {
    alt((
        map(quoted, |text| Word { text, quoted: true }),
        map(
            take_while1(|c: char| !c.is_whitespace() && c != ';' && c != '"'),
            |text: &str| Word {
                text: text.to_owned(),
                quoted: false,
            },
        ),
    ))(input)
}

fn error_kind(e: TokenParseError) -> ParseErrorKind {
    match e {
        TokenParseError::UnterminatedString => ParseErrorKind::UnterminatedString,
        TokenParseError::UnterminatedComment => ParseErrorKind::UnterminatedComment,
        TokenParseError::NomError { .. } => ParseErrorKind::UnterminatedStatement,
    }
}

/// Input where a failure starts, and why.
type Failure<'a> = (&'a str, ParseErrorKind);

fn skip_trivia<'a>(
    mut input: &'a str,
    comments: &mut Vec<&'a str>,
) -> Result<&'a str, Failure<'a>> {
    loop {
        match trivia(input) {
            Ok((rest, Trivia::LineComment(text))) => {
                comments.push(text.trim_end_matches('\r'));
                input = rest;
            }
            Ok((rest, _)) => input = rest,
            Err(nom::Err::Failure(e)) => return Err((input, error_kind(e))),
            Err(_) => return Ok(input),
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            source,
            rest: source,
        }
    }

    fn offset(&self, at: &str) -> usize {
        self.source.len() - at.len()
    }

    /// The next statement, `None` at the end of the document. Line comments in front of it are
    /// pushed to `comments`.
    fn next_statement(
        &mut self,
        comments: &mut Vec<&'a str>,
    ) -> Result<Option<Statement<'a>>, Failure<'a>> {
        let start = skip_trivia(self.rest, comments)?;
        self.rest = start;
        if start.is_empty() {
            return Ok(None);
        }

        let mut input = start;
        let mut words = Vec::new();
        loop {
            input = skip_trivia(input, &mut Vec::new())?;
            if input.is_empty() {
                return Err((start, ParseErrorKind::UnterminatedStatement));
            }
            if input.starts_with(';') {
                let text = start[..start.len() - input.len()].trim_end();
                self.rest = &input[1..];
                return Ok(Some(Statement {
                    offset: self.offset(start),
                    text,
                    words,
                }));
            }
            match word(input) {
                Ok((rest, w)) => {
                    words.push(w);
                    input = rest;
                }
                Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                    return Err((input, error_kind(e)))
                }
                Err(nom::Err::Incomplete(_)) => {
                    return Err((input, ParseErrorKind::UnterminatedStatement))
                }
            }
        }
    }
}

/// Byte offset to 1-based line and column.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        LineIndex { starts }
    }

    fn line(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    fn position(&self, source: &str, offset: usize) -> Position {
        let line = self.line(offset);
        let column = source[self.starts[line]..offset].chars().count() + 1;
        Position::Text {
            line: line + 1,
            column,
        }
    }
}

/// Flags and positional arguments of a statement, command word excluded.
struct Args<'w> {
    flags: Vec<(&'w str, Option<&'w str>)>,
    positional: Vec<&'w str>,
}

impl<'w> Args<'w> {
    /// A flag for which `takes_value` is true consumes the next word, unless that word is a
    /// flag itself.
    fn parse<F: Fn(&str) -> bool>(words: &'w [Word], takes_value: F) -> Self {
        let mut args = Args {
            flags: Vec::new(),
            positional: Vec::new(),
        };
        let mut words = words.iter().peekable();
        while let Some(w) = words.next() {
            if !w.is_flag() {
                args.positional.push(w.text.as_str());
                continue;
            }
            let value = if takes_value(&w.text) && words.peek().map_or(false, |n| !n.is_flag()) {
                words.next().map(|n| n.text.as_str())
            } else {
                None
            };
            args.flags.push((w.text.as_str(), value));
        }
        args
    }

    fn value(&self, names: &[&str]) -> Option<&'w str> {
        self.flags
            .iter()
            .find(|(flag, _)| names.contains(flag))
            .and_then(|(_, value)| *value)
    }

    fn has(&self, names: &[&str]) -> bool {
        self.flags.iter().any(|(flag, _)| names.contains(flag))
    }

    /// True when every flag is one of `known`.
    fn only(&self, known: &[&str]) -> bool {
        self.flags.iter().all(|(flag, _)| known.contains(flag))
    }

    /// Flags and their values in source order, leaving out the flags in `skip`.
    fn flag_tokens(&self, skip: &[&str]) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (flag, value) in self.flags.iter().filter(|(flag, _)| !skip.contains(flag)) {
            tokens.push(Token::from(*flag));
            if let Some(value) = value {
                tokens.push(Token::from(*value));
            }
        }
        tokens
    }
}

/// Names in the document may carry the root namespace, `:time1`.
fn strip_root_namespace(name: &str) -> &str {
    name.strip_prefix(':').unwrap_or(name)
}

const SET_ATTR_VALUED: &[&str] = &[
    "-k", "-keyable", "-l", "-lock", "-s", "-size", "-cb", "-channelBox", "-ca", "-caching",
    "-type",
];
const ADD_ATTR_VALUELESS: &[&str] = &["-m", "-multi", "-uac", "-usedAsColor"];
const CREATE_NODE_VALUED: &[&str] = &["-n", "-name", "-p", "-parent"];

/// Builds the scene one statement at a time.
struct TextReader<'o> {
    options: &'o ReaderOptions,
    scene: SceneGraph,
    /// Node targeted by relative plugs, set by `createNode` and `select`.
    current: Option<String>,
}

impl<'o> TextReader<'o> {
    fn new(options: &'o ReaderOptions) -> Self {
        let mut scene = SceneGraph::new();
        scene.format.dialect = Some(Dialect::Text);
        TextReader {
            options,
            scene,
            current: None,
        }
    }

    fn statement(&mut self, line: usize, statement: &Statement) {
        let (command, rest) = match statement.words.split_first() {
            Some((command, rest)) => (command.text.as_str(), rest),
            None => return,
        };

        let interpreted = match command {
            "requires" => self.requires(rest),
            "currentUnit" => self.current_unit(rest),
            "fileInfo" => self.file_info(rest),
            "createNode" => self.create_node(rest),
            "rename" => self.rename(rest),
            "select" => self.select(rest),
            "setAttr" => self.set_attr(rest),
            "addAttr" => self.add_attr(rest),
            "connectAttr" => self.connect_attr(rest),
            _ => false,
        };

        if !interpreted {
            self.scene.raw_statements.push(RawStatement {
                origin: RawOrigin::Line(line),
                command: command.to_owned(),
                text: statement.text.to_owned(),
            });
        }
    }

    fn requires(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |_| true);
        let (product, version) = match args.positional.as_slice() {
            [product, version] => (*product, *version),
            _ => return false,
        };
        if product == "maya" {
            self.scene.format.version = Some(version.to_owned());
        }
        self.scene.format.requires.push(Requirement {
            product: product.to_owned(),
            version: version.to_owned(),
            flags: args.flag_tokens(&[]),
        });
        true
    }

    fn current_unit(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |_| true);
        let units = &mut self.scene.format.units;
        if let Some(linear) = args.value(&["-l", "-linear"]) {
            units.linear = Some(linear.to_owned());
        }
        if let Some(angle) = args.value(&["-a", "-angle"]) {
            units.angle = Some(angle.to_owned());
        }
        if let Some(time) = args.value(&["-t", "-time"]) {
            units.time = Some(time.to_owned());
        }
        args.positional.is_empty()
            && args.only(&["-l", "-linear", "-a", "-angle", "-t", "-time"])
    }

    fn file_info(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |_| false);
        match args.positional.as_slice() {
            [key, value] if args.flags.is_empty() => {
                self.scene
                    .format
                    .file_info
                    .push(((*key).to_owned(), (*value).to_owned()));
                true
            }
            _ => false,
        }
    }

    fn create_node(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |flag| CREATE_NODE_VALUED.contains(&flag));
        let (node_type, name) = match (args.positional.first(), args.value(&["-n", "-name"])) {
            (Some(node_type), Some(name)) => (*node_type, strip_root_namespace(name)),
            _ => return false,
        };
        let parent = args.value(&["-p", "-parent"]).map(|p| {
            let p = strip_root_namespace(p);
            self.scene.resolve_name(p).unwrap_or_else(|| p.to_owned())
        });

        // The same leaf name under another parent is a different node.
        let key = match (self.scene.node(name), &parent) {
            (Some(existing), Some(parent)) if existing.parent.as_ref() != Some(parent) => {
                if parent.starts_with(plug::HIERARCHY_SEPARATOR) {
                    format!("{}|{}", parent, name)
                } else {
                    format!("|{}|{}", parent, name)
                }
            }
            _ => name.to_owned(),
        };

        if self.scene.contains_node(&key) {
            self.current = Some(key);
            return false;
        }

        let mut node = NodeRecord::new(key.clone(), node_type);
        node.parent = parent;
        self.scene.add_node(node);
        self.current = Some(key);

        args.positional.len() == 1
            && args.only(&["-n", "-name", "-p", "-parent", "-ss", "-skipSelect"])
    }

    fn rename(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |_| true);
        let uid = match args.value(&["-uid", "-uuid"]) {
            Some(uid) if args.positional.is_empty() && args.flags.len() == 1 => uid,
            _ => return false,
        };
        let scene = &mut self.scene;
        match self.current.as_deref().and_then(|c| scene.node_mut(c)) {
            Some(node) => {
                node.uid = Some(uid.to_owned());
                true
            }
            None => false,
        }
    }

    fn select(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |_| false);
        let name = match args.positional.as_slice() {
            [name] if args.has(&["-ne", "-noExpand"]) && args.flags.len() == 1 => {
                strip_root_namespace(name)
            }
            _ => return false,
        };

        match self.scene.resolve_name(name) {
            Some(resolved) => self.current = Some(resolved),
            None if self.options.create_selected_nodes => {
                self.scene.add_node(NodeRecord::new(name, "unknown"));
                self.current = Some(name.to_owned());
            }
            None => {
                self.current = None;
                return false;
            }
        }
        true
    }

    /// Node a plug of a `setAttr`/`addAttr` belongs to and the attribute path, `None` when the
    /// node is unknown.
    fn target(&self, plug_text: &str) -> Option<(String, String)> {
        if let Some(attribute) = plug_text.strip_prefix('.') {
            let current = self.current.clone()?;
            return Some((current, attribute.to_owned()));
        }
        let plug_text = strip_root_namespace(plug_text);
        let node = self.scene.resolve_name(plug::node_name(plug_text))?;
        Some((node, plug::attribute_path(plug_text).to_owned()))
    }

    fn set_attr(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |flag| SET_ATTR_VALUED.contains(&flag));
        let (plug_text, values) = match args.positional.split_first() {
            Some((plug_text, values)) => (*plug_text, values),
            None => return false,
        };
        let (node, key) = match self.target(plug_text) {
            Some((node, key)) if !key.is_empty() => (node, key),
            _ => return false,
        };

        let mut attribute = Attribute::new(key).with_tokens(values.iter().copied());
        attribute.type_name = args.value(&["-type"]).map(str::to_owned);
        attribute.flags = args.flag_tokens(&["-type"]);

        match self.scene.node_mut(&node) {
            Some(record) => {
                record.set_attribute(attribute);
                true
            }
            None => false,
        }
    }

    fn add_attr(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |flag| !ADD_ATTR_VALUELESS.contains(&flag));
        let key = match args
            .value(&["-ln", "-longName"])
            .or_else(|| args.value(&["-sn", "-shortName"]))
        {
            Some(key) => key,
            None => return false,
        };
        let node = match args.positional.as_slice() {
            [] => self.current.clone(),
            [node] => self.scene.resolve_name(strip_root_namespace(node)),
            _ => None,
        };
        let node = match node {
            Some(node) => node,
            None => return false,
        };

        let mut attribute = Attribute::new(key);
        attribute.type_name = args
            .value(&["-at", "-attributeType"])
            .or_else(|| args.value(&["-dt", "-dataType"]))
            .map(str::to_owned);
        attribute.flags = args.flag_tokens(&[]);

        if let Some(record) = self.scene.node_mut(&node) {
            record.add_attribute(attribute);
            true
        } else {
            false
        }
    }

    fn connect_attr(&mut self, words: &[Word]) -> bool {
        let args = Args::parse(words, |flag| flag == "-l" || flag == "-lock");
        let (source, destination) = match args.positional.as_slice() {
            [source, destination] => (
                strip_root_namespace(source),
                strip_root_namespace(destination),
            ),
            _ => return false,
        };
        let mut connection = ConnectionRecord::new(source, destination);
        connection.force = args.has(&["-f", "-force"]);
        connection.next_available = args.has(&["-na", "-nextAvailable"]);
        self.scene.connections.push(connection);

        args.only(&["-f", "-force", "-na", "-nextAvailable"])
    }
}

/// The text of a document. Data that isn't valid UTF-8 is read as Latin-1, one character per
/// byte, so every byte survives as a character instead of being replaced.
pub fn decode_source(data: &[u8]) -> Cow<'_, str> {
    let source = text_from_bytes(data);
    if let Cow::Owned(_) = source {
        tracing::debug!("text scene is not UTF-8, reading it as Latin-1");
    }
    source
}

/// Parses a text document. On a malformed statement the outcome holds everything read up to
/// it, unless `ReaderOptions::keep_partial` is off.
pub fn parse_text(source: &str, options: &ReaderOptions) -> ParseOutcome {
    let lines = LineIndex::new(source);
    let mut lexer = Lexer::new(source);
    let mut reader = TextReader::new(options);
    let mut in_header = true;

    let error = loop {
        let mut comments = Vec::new();
        let next = lexer.next_statement(&mut comments);
        if in_header {
            reader
                .scene
                .format
                .header_comments
                .extend(comments.into_iter().map(str::to_owned));
        }

        match next {
            Ok(Some(statement)) => {
                in_header = false;
                let line = lines.line(statement.offset) + 1;
                reader.statement(line, &statement);
            }
            Ok(None) => break None,
            Err((at, reason)) => {
                let position = lines.position(source, lexer.offset(at));
                break Some(ParseError::new(position, reason));
            }
        }
    };

    let scene = reader.scene;
    tracing::debug!(
        "parsed text scene: {} nodes, {} connections, {} raw statements",
        scene.node_count(),
        scene.connections.len(),
        scene.raw_statements.len()
    );
    if let Some(e) = &error {
        tracing::debug!("text scene is incomplete: {}", e);
    }

    ParseOutcome::finish(scene, error, options)
}
