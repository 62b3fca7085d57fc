//! Walks the nested, tagged chunks of the binary dialect.
//!
//! A binary scene is an IFF-like tree: every chunk starts with a four byte tag and a big endian
//! size, container chunks (`FOR4`, `LIS4`, ...) additionally carry a four byte form type and hold
//! other chunks as their payload. The walk records *every* chunk it passes, whether or not any
//! later stage knows what to do with it.

use super::{ByteReader, ByteWriter, DecodeError, Endianness};
use crate::config::ReaderOptions;
use std::convert::TryFrom;

/// Size field width and payload alignment, fixed by the root tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkLayout {
    pub size_width: usize,
    pub alignment: usize,
}

impl ChunkLayout {
    /// `FOR4` family: 32-bit sizes, 4-byte alignment.
    pub const BITS32: ChunkLayout = ChunkLayout {
        size_width: 4,
        alignment: 4,
    };
    /// `FOR8` family: 64-bit sizes, 8-byte alignment.
    pub const BITS64: ChunkLayout = ChunkLayout {
        size_width: 8,
        alignment: 8,
    };
    /// Plain IFF-85 `FORM`: 32-bit sizes, 2-byte alignment.
    pub const CLASSIC: ChunkLayout = ChunkLayout {
        size_width: 4,
        alignment: 2,
    };

    /// Layout implied by a root tag, `None` if the tag can't start a document.
    pub fn from_root_tag(tag: &[u8]) -> Option<ChunkLayout> {
        match tag {
            b"FOR4" => Some(ChunkLayout::BITS32),
            b"FOR8" => Some(ChunkLayout::BITS64),
            b"FORM" => Some(ChunkLayout::CLASSIC),
            _ => None,
        }
    }

    fn header_len(self) -> usize {
        4 + self.size_width
    }
}

/// Tags whose payload starts with a form type followed by child chunks.
pub fn is_container_tag(tag: &[u8]) -> bool {
    matches!(
        tag,
        b"FORM" | b"FOR4" | b"FOR8" | b"LIST" | b"LIS4" | b"LIS8" | b"CAT " | b"CAT4" | b"CAT8"
            | b"PROP" | b"PRO4" | b"PRO8"
    )
}

/// A guess at what a printable string found in a chunk payload is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentHint {
    /// The string contains one of the configured keywords.
    Keyword(String),
    /// Looks like a `node.attribute` path.
    Plug(String),
    /// Looks like a file path.
    Path(String),
    /// Only digits and dots, like `2018` or `4.0.1`.
    Version(String),
}

/// One chunk of a binary document, in the order it appears in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// The four character tag, e.g. `CREA` or `FOR4`.
    pub id: String,
    /// For containers their own form type, for data chunks the form type of the enclosing
    /// container.
    pub form_type: Option<String>,
    /// Index of the enclosing container in the record list.
    pub parent: Option<usize>,
    pub depth: usize,
    pub is_container: bool,
    /// Offset of the tag.
    pub offset: usize,
    /// Offset of the first payload byte.
    pub data_offset: usize,
    /// Payload size as declared in the chunk header, or the bytes actually present when
    /// `truncated`.
    pub data_size: usize,
    /// The declared size ran past the end of the enclosing data.
    pub truncated: bool,
    /// Printable substrings of the payload (data chunks only).
    pub strings: Vec<String>,
    pub hints: Vec<ContentHint>,
}

impl ChunkRecord {
    /// The payload bytes of this chunk inside `data`. Empty if the record doesn't belong to
    /// `data`.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = if self.is_container {
            self.data_offset + 4
        } else {
            self.data_offset
        };
        data.get(start..self.data_offset + self.data_size)
            .unwrap_or(&[])
    }
}

/// Result of a chunk walk. Records captured before a failure are kept next to the error.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    pub layout: ChunkLayout,
    pub chunks: Vec<ChunkRecord>,
    pub error: Option<DecodeError>,
}

impl ChunkIndex {
    pub fn into_result(self) -> Result<Vec<ChunkRecord>, DecodeError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.chunks),
        }
    }

    /// Direct children of the record at `index`.
    pub fn children(&self, index: usize) -> impl Iterator<Item = (usize, &ChunkRecord)> {
        self.chunks
            .iter()
            .enumerate()
            .skip(index + 1)
            .filter(move |(_, c)| c.parent == Some(index))
    }
}

/// Walks every chunk of `data`. Fails immediately only if the root tag is unknown; later
/// failures are reported through `ChunkIndex::error`.
pub fn walk_chunks(data: &[u8], options: &ReaderOptions) -> Result<ChunkIndex, DecodeError> {
    let root_tag = data.get(..4).unwrap_or(data);
    let layout = ChunkLayout::from_root_tag(root_tag).ok_or_else(|| DecodeError::BadMagic {
        found: String::from_utf8_lossy(root_tag).into_owned(),
    })?;

    let mut walker = ChunkWalker {
        layout,
        options,
        chunks: Vec::new(),
    };
    let mut reader = ByteReader::new(data, Endianness::Big);
    let error = walker.walk_level(&mut reader, data.len(), 0, None, None).err();

    tracing::debug!(
        "walked {} chunks ({})",
        walker.chunks.len(),
        if error.is_some() { "incomplete" } else { "complete" }
    );

    Ok(ChunkIndex {
        layout,
        chunks: walker.chunks,
        error,
    })
}

struct ChunkWalker<'o> {
    layout: ChunkLayout,
    options: &'o ReaderOptions,
    chunks: Vec<ChunkRecord>,
}

impl<'o> ChunkWalker<'o> {
    fn walk_level(
        &mut self,
        reader: &mut ByteReader,
        end: usize,
        depth: usize,
        parent: Option<usize>,
        form_type: Option<&str>,
    ) -> Result<(), DecodeError> {
        while reader.position() < end {
            let offset = reader.position();

            // Zero bytes too short to hold a header are trailing padding.
            if end - offset < self.layout.header_len() {
                let rest = reader.read_bytes(end - offset)?;
                if rest.iter().all(|&b| b == 0) {
                    break;
                }
                reader.seek(offset)?;
            }

            let tag = reader.read_bytes(4)?;
            let size = match self.layout.size_width {
                8 => reader.read_u64()?,
                _ => u64::from(reader.read_u32()?),
            };
            let data_offset = reader.position();
            let available = end.saturating_sub(data_offset);
            let id = String::from_utf8_lossy(tag).into_owned();

            // An oversized container is still descended into so the chunks that are present
            // get recorded before the overrun is reported.
            let (size, overrun) = match usize::try_from(size) {
                Ok(declared) if declared <= available => (declared, None),
                _ => (
                    available,
                    Some(DecodeError::ChunkOverrun {
                        tag: id.clone(),
                        offset,
                        size,
                        available,
                    }),
                ),
            };

            tracing::trace!("chunk '{}' at {} ({} bytes, depth {})", id, offset, size, depth);

            if is_container_tag(tag) {
                if depth + 1 > self.options.max_chunk_depth {
                    return Err(DecodeError::TooDeep {
                        offset,
                        depth: depth + 1,
                    });
                }
                if size < 4 {
                    return Err(DecodeError::ChunkOverrun {
                        tag: id,
                        offset,
                        size: 4,
                        available: size,
                    });
                }
                let own_form = String::from_utf8_lossy(reader.read_bytes(4)?).into_owned();
                let index = self.chunks.len();
                self.chunks.push(ChunkRecord {
                    id,
                    form_type: Some(own_form.clone()),
                    parent,
                    depth,
                    is_container: true,
                    offset,
                    data_offset,
                    data_size: size,
                    truncated: overrun.is_some(),
                    strings: Vec::new(),
                    hints: Vec::new(),
                });
                self.walk_level(
                    reader,
                    data_offset + size,
                    depth + 1,
                    Some(index),
                    Some(&own_form),
                )?;
                if let Some(e) = overrun {
                    return Err(e);
                }
            } else {
                let payload = reader.read_bytes(size)?;
                let strings = printable_strings(
                    payload,
                    self.options.min_hint_len,
                    self.options.max_hint_strings,
                );
                let hints = content_hints(&strings, &self.options.hint_keywords);
                self.chunks.push(ChunkRecord {
                    id,
                    form_type: form_type.map(str::to_owned),
                    parent,
                    depth,
                    is_container: false,
                    offset,
                    data_offset,
                    data_size: size,
                    truncated: overrun.is_some(),
                    strings,
                    hints,
                });
                if let Some(e) = overrun {
                    return Err(e);
                }
            }

            reader.seek(data_offset + size)?;
            reader.align(self.layout.alignment);
        }

        Ok(())
    }
}

/// Runs of printable ASCII at least `min_len` long, at most `max_count` of them.
pub fn printable_strings(payload: &[u8], min_len: usize, max_count: usize) -> Vec<String> {
    payload
        .split(|b| !(0x20..=0x7e).contains(b))
        .filter(|run| !run.is_empty() && run.len() >= min_len)
        .take(max_count)
        .map(|run| String::from_utf8_lossy(run).into_owned())
        .collect()
}

/// Keyword and shape based hints for a chunk's printable strings. Purely heuristic.
pub fn content_hints(strings: &[String], keywords: &[String]) -> Vec<ContentHint> {
    let mut hints = Vec::new();
    for s in strings {
        let lower = s.to_ascii_lowercase();
        if let Some(k) = keywords
            .iter()
            .find(|k| !k.is_empty() && lower.contains(&k.to_ascii_lowercase()))
        {
            hints.push(ContentHint::Keyword(k.clone()));
        }

        if (s.contains('/') || s.contains('\\')) && s.rsplit('.').next().map_or(false, |ext| {
            !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }) {
            hints.push(ContentHint::Path(s.clone()));
        } else if s.chars().all(|c| c.is_ascii_digit() || c == '.')
            && s.chars().any(|c| c.is_ascii_digit())
        {
            hints.push(ContentHint::Version(s.clone()));
        } else if looks_like_plug(s) {
            hints.push(ContentHint::Plug(s.clone()));
        }
    }
    hints
}

fn looks_like_plug(s: &str) -> bool {
    match crate::plug::split_plug(s) {
        Some((node, attr)) => {
            let ident = |c: char| c.is_ascii_alphanumeric() || "_|:[]".contains(c);
            !node.is_empty()
                && !attr.is_empty()
                && node.chars().all(ident)
                && attr.chars().all(|c| ident(c) || c == '.')
                && !attr.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Authors chunked documents, mostly for fixtures. Sizes are back-filled when a container is
/// closed.
#[derive(Debug)]
pub struct ChunkWriter {
    out: ByteWriter,
    layout: ChunkLayout,
    open: Vec<usize>,
}

impl ChunkWriter {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            out: ByteWriter::new(Endianness::Big),
            layout,
            open: Vec::new(),
        }
    }

    fn write_size(&mut self, size: usize) {
        match self.layout.size_width {
            8 => self.out.write(size as u64),
            _ => self.out.write(size as u32),
        };
    }

    /// Opens a container chunk; every chunk written until the matching `end_form` is a child.
    pub fn begin_form(&mut self, tag: &[u8; 4], form_type: &[u8; 4]) -> &mut Self {
        self.out.write_bytes(tag);
        let size_at = self.out.len();
        self.write_size(0);
        self.out.write_bytes(form_type);
        self.open.push(size_at);
        self
    }

    pub fn end_form(&mut self) -> &mut Self {
        if let Some(size_at) = self.open.pop() {
            let size = self.out.len() - size_at - self.layout.size_width;
            match self.layout.size_width {
                8 => self.out.patch(size_at, size as u64),
                _ => self.out.patch(size_at, size as u32),
            };
        }
        self
    }

    /// Writes a data chunk followed by its alignment padding.
    pub fn chunk(&mut self, tag: &[u8; 4], payload: &[u8]) -> &mut Self {
        self.out.write_bytes(tag);
        self.write_size(payload.len());
        self.out.write_bytes(payload);
        self.out.pad_to(self.layout.alignment);
        self
    }

    /// Closes any container still open and returns the document.
    pub fn finish(mut self) -> Vec<u8> {
        while !self.open.is_empty() {
            self.end_form();
        }
        self.out.into_inner()
    }
}
