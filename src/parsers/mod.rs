pub mod binary;
pub mod chunk;
pub mod primitive;
pub mod text;

use crate::config::ReaderOptions;
use crate::scene::SceneGraph;
use nom::error::{ErrorKind, ParseError as NomParseError};
use std::fmt;

pub use primitive::{ByteReader, ByteWriter};

/// Byte order of multi-byte values in a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// The primitive a `ByteReader` was reading when it failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bytes,
    Varint,
    String,
    CString,
}

impl ReadKind {
    /// Width in bytes of fixed-size primitives, `None` for variable-length reads.
    pub fn width(self) -> Option<usize> {
        match self {
            ReadKind::U8 | ReadKind::I8 => Some(1),
            ReadKind::U16 | ReadKind::I16 => Some(2),
            ReadKind::U32 | ReadKind::I32 | ReadKind::F32 => Some(4),
            ReadKind::U64 | ReadKind::I64 | ReadKind::F64 => Some(8),
            ReadKind::Bytes | ReadKind::Varint | ReadKind::String | ReadKind::CString => None,
        }
    }
}

/// Errors raised while decoding raw bytes. Every variant carries the offset where decoding
/// stopped so a caller can report it and discard the document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// A read asked for more bytes than the buffer still holds.
    #[error("unexpected end of data reading {kind:?} at offset {offset}: requested {requested} bytes, {available} available")]
    UnexpectedEof {
        kind: ReadKind,
        offset: usize,
        requested: usize,
        available: usize,
    },
    /// A variable-length integer kept its continuation bit set past 5 groups (35 bits).
    #[error("variable-length integer at offset {offset} exceeds 5 groups")]
    VarintTooLong { offset: usize },
    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    /// A chunk declared a payload larger than what is left in its parent.
    #[error("chunk '{tag}' at offset {offset} declares {size} bytes but only {available} are available")]
    ChunkOverrun {
        tag: String,
        offset: usize,
        size: u64,
        available: usize,
    },
    /// Container chunks nested deeper than the configured limit.
    #[error("chunk at offset {offset} is nested {depth} levels deep")]
    TooDeep { offset: usize, depth: usize },
    /// The buffer does not start with a known root form.
    #[error("unknown root tag {found:?}")]
    BadMagic { found: String },
}

impl DecodeError {
    /// Offset of the byte that could not be decoded.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnexpectedEof { offset, .. }
            | DecodeError::VarintTooLong { offset }
            | DecodeError::InvalidUtf8 { offset }
            | DecodeError::ChunkOverrun { offset, .. }
            | DecodeError::TooDeep { offset, .. } => *offset,
            DecodeError::BadMagic { .. } => 0,
        }
    }
}

/// Where in a document a `ParseError` happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Position {
    /// 1-based line and column in a text document.
    Text { line: usize, column: usize },
    /// Byte offset in a binary document.
    Byte(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Text { line, column } => write!(f, "line {}, column {}", line, column),
            Position::Byte(offset) => write!(f, "byte {}", offset),
        }
    }
}

/// Why a document could not be parsed to the end.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unterminated string")]
    UnterminatedString,
    /// The document ended before the statement's `;`.
    #[error("unterminated statement")]
    UnterminatedStatement,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The binary root form is not a `Maya` form.
    #[error("missing root form, found '{0}'")]
    MissingRootForm(String),
}

/// A malformed or truncated document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason} at {position}")]
pub struct ParseError {
    pub position: Position,
    pub reason: ParseErrorKind,
}

impl ParseError {
    pub fn new(position: Position, reason: ParseErrorKind) -> Self {
        ParseError { position, reason }
    }
}

impl From<DecodeError> for ParseError {
    fn from(e: DecodeError) -> Self {
        ParseError {
            position: Position::Byte(e.offset()),
            reason: ParseErrorKind::Decode(e),
        }
    }
}

/// Error type threaded through the nom parsers of the text dialect and plug paths.
#[derive(Debug, PartialEq)]
pub(crate) enum TokenParseError {
    NomError {
        kind: ErrorKind,
        other: Option<Box<TokenParseError>>,
    },
    UnterminatedString,
    UnterminatedComment,
}

impl NomParseError<&str> for TokenParseError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        TokenParseError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        TokenParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

pub(crate) type TextResult<'a, T> = nom::IResult<&'a str, T, TokenParseError>;

/// What a reader produced: the graph built so far and, if the document could not be read to
/// the end, why.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub scene: SceneGraph,
    pub error: Option<ParseError>,
}

impl ParseOutcome {
    pub(crate) fn finish(
        scene: SceneGraph,
        error: Option<ParseError>,
        options: &ReaderOptions,
    ) -> Self {
        match error {
            Some(error) if !options.keep_partial => ParseOutcome {
                scene: SceneGraph::default(),
                error: Some(error),
            },
            error => ParseOutcome { scene, error },
        }
    }

    /// True when the whole document was read.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The graph, or the error if the document was malformed. The partial graph is dropped.
    pub fn into_result(self) -> Result<SceneGraph, ParseError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.scene),
        }
    }
}
