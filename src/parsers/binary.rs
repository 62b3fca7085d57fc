//! The binary dialect: big endian IFF chunks under a `FOR4`/`FOR8` root whose form type is
//! `Maya`.
//!
//! The chunk walk records every chunk first. Interpretation then goes over the records in
//! offset order: `HEAD` data feeds the format info, containers starting with a `CREA` chunk are
//! nodes, attribute chunks inside them become attributes and `CONN` chunks connections.
//! Anything else is kept as a raw statement pointing at its chunk.

use super::chunk::{walk_chunks, ChunkRecord};
use super::{ByteReader, Endianness, ParseError, ParseErrorKind, ParseOutcome, Position};
use crate::config::ReaderOptions;
use crate::scene::{
    Attribute, ConnectionRecord, Dialect, NodeRecord, RawOrigin, RawStatement, SceneGraph, Token,
};
use std::collections::{HashMap, HashSet};

/// Form type of the root container of a scene.
pub const ROOT_FORM: &str = "Maya";

/// True when `data` starts like a binary scene.
pub fn is_binary(data: &[u8]) -> bool {
    matches!(data.get(..4), Some(b"FOR4") | Some(b"FOR8"))
}

/// Node type for a node form type, `"unknown"` for codes without a mapping.
pub fn node_type_for(form_type: &str) -> &'static str {
    match form_type {
        "XFRM" => "transform",
        "JONT" => "joint",
        "DMSH" => "mesh",
        "TIME" => "time",
        "ACRV" => "animCurveTL",
        _ => "unknown",
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ValueKind {
    F64,
    F32,
    I32,
    Str,
}

/// How the values of an attribute chunk are laid out.
#[derive(Debug, Copy, Clone)]
struct ValueLayout {
    kind: ValueKind,
    /// Values per element; the payload may hold several elements.
    group: usize,
    type_name: Option<&'static str>,
}

fn value_layout(tag: &str) -> Option<ValueLayout> {
    let (kind, group, type_name) = match tag {
        "DBLE" => (ValueKind::F64, 1, None),
        "DBL2" => (ValueKind::F64, 2, Some("double2")),
        "DBL3" => (ValueKind::F64, 3, Some("double3")),
        "FLT2" => (ValueKind::F32, 2, Some("float2")),
        "FLT3" => (ValueKind::F32, 3, Some("float3")),
        "LNG2" => (ValueKind::I32, 2, Some("long2")),
        "LNG3" => (ValueKind::I32, 3, Some("long3")),
        "MATR" => (ValueKind::F64, 16, Some("matrix")),
        "STR " => (ValueKind::Str, 1, Some("string")),
        _ => return None,
    };
    Some(ValueLayout {
        kind,
        group,
        type_name,
    })
}

/// Decodes an attribute chunk: a null-terminated name, a flags byte and the values. `None`
/// when the payload is cut short or holds a partial element.
fn decode_attribute(layout: ValueLayout, payload: &[u8]) -> Option<Attribute> {
    let mut reader = ByteReader::new(payload, Endianness::Big);
    let name = reader.read_cstring().ok()?;
    let _flags = reader.read_u8().ok()?;

    let mut tokens = Vec::new();
    while !reader.is_empty() {
        let token = match layout.kind {
            ValueKind::F64 => reader.read_f64().ok()?.to_string(),
            ValueKind::F32 => reader.read_f32().ok()?.to_string(),
            ValueKind::I32 => reader.read_i32().ok()?.to_string(),
            ValueKind::Str => reader.read_cstring().ok()?,
        };
        tokens.push(Token::new(token));
    }

    if name.is_empty() || tokens.len() % layout.group != 0 {
        return None;
    }

    let mut attribute = Attribute::new(name);
    attribute.type_name = layout.type_name.map(str::to_owned);
    attribute.tokens = tokens;
    Some(attribute)
}

/// `CREA`: flags byte, name, optional parent.
fn decode_create(payload: &[u8]) -> Option<(String, Option<String>)> {
    let mut reader = ByteReader::new(payload, Endianness::Big);
    let _flags = reader.read_u8().ok()?;
    let name = reader.read_cstring().ok()?;
    let parent = if reader.is_empty() {
        None
    } else {
        Some(reader.read_cstring().ok()?).filter(|p| !p.is_empty())
    };
    if name.is_empty() {
        return None;
    }
    Some((name, parent))
}

/// `CONN`: flags byte (bit 0 force, bit 1 next available), source plug, destination plug.
fn decode_connection(payload: &[u8]) -> Option<ConnectionRecord> {
    let mut reader = ByteReader::new(payload, Endianness::Big);
    let flags = reader.read_u8().ok()?;
    let source = reader.read_cstring().ok()?;
    let destination = reader.read_cstring().ok()?;
    if source.is_empty() || destination.is_empty() {
        return None;
    }
    let mut connection = ConnectionRecord::new(source, destination);
    connection.force = flags & 0x01 != 0;
    connection.next_available = flags & 0x02 != 0;
    Some(connection)
}

/// Null-terminated strings filling a whole payload.
fn decode_strings(payload: &[u8]) -> Option<Vec<String>> {
    let mut reader = ByteReader::new(payload, Endianness::Big);
    let mut strings = Vec::new();
    while !reader.is_empty() {
        strings.push(reader.read_cstring().ok()?);
    }
    Some(strings)
}

struct BinaryReader<'d> {
    data: &'d [u8],
    scene: SceneGraph,
    /// Node created by each node container, by container index.
    nodes: HashMap<usize, String>,
    /// Containers whose first data child has been seen.
    started: HashSet<usize>,
}

impl<'d> BinaryReader<'d> {
    fn new(data: &'d [u8]) -> Self {
        let mut scene = SceneGraph::new();
        scene.format.dialect = Some(Dialect::Binary);
        BinaryReader {
            data,
            scene,
            nodes: HashMap::new(),
            started: HashSet::new(),
        }
    }

    fn chunk(&mut self, index: usize, chunks: &[ChunkRecord]) {
        let chunk = &chunks[index];
        if chunk.is_container {
            return;
        }
        let payload = chunk.payload(self.data);
        let container = chunk.parent.map(|p| (p, &chunks[p]));
        let first_in_container = match chunk.parent {
            Some(p) => self.started.insert(p),
            None => false,
        };

        let interpreted = match (chunk.id.as_str(), container) {
            // Cut short by the end of the data.
            _ if chunk.truncated => false,
            (_, Some((_, form))) if form.form_type.as_deref() == Some("HEAD") => {
                self.header(&chunk.id, payload)
            }
            ("CREA", Some((p, form))) if first_in_container => {
                let form_type = form.form_type.as_deref().unwrap_or("");
                self.create(p, form_type, payload)
            }
            ("CONN", _) => match decode_connection(payload) {
                Some(connection) => {
                    self.scene.connections.push(connection);
                    true
                }
                None => false,
            },
            (tag, Some((p, _))) => self.attribute(p, tag, payload),
            _ => false,
        };

        if !interpreted {
            tracing::warn!(
                "keeping chunk '{}' at offset {} uninterpreted",
                chunk.id,
                chunk.offset
            );
            self.scene.raw_statements.push(RawStatement {
                origin: RawOrigin::Chunk(index),
                command: chunk.id.clone(),
                text: chunk.strings.join(" "),
            });
        }
    }

    fn header(&mut self, tag: &str, payload: &[u8]) -> bool {
        let strings = match decode_strings(payload) {
            Some(strings) => strings,
            None => return false,
        };
        let format = &mut self.scene.format;
        match (tag, strings.as_slice()) {
            ("VERS", [version]) => format.version = Some(version.clone()),
            ("LUNI", [unit]) => format.units.linear = Some(unit.clone()),
            ("AUNI", [unit]) => format.units.angle = Some(unit.clone()),
            ("TUNI", [unit]) => format.units.time = Some(unit.clone()),
            ("FINF", [key, value]) => format.file_info.push((key.clone(), value.clone())),
            _ => return false,
        }
        true
    }

    fn create(&mut self, container: usize, form_type: &str, payload: &[u8]) -> bool {
        let (name, parent) = match decode_create(payload) {
            Some(decoded) => decoded,
            None => return false,
        };
        if self.scene.contains_node(&name) {
            // The first record is left alone; this form stays raw, attributes included.
            return false;
        }
        self.nodes.insert(container, name.clone());

        let mut node = NodeRecord::new(name, node_type_for(form_type));
        node.parent = parent;
        self.scene.add_node(node)
    }

    fn attribute(&mut self, container: usize, tag: &str, payload: &[u8]) -> bool {
        let (node, layout) = match (self.nodes.get(&container), value_layout(tag)) {
            (Some(node), Some(layout)) => (node, layout),
            _ => return false,
        };
        match (decode_attribute(layout, payload), self.scene.node_mut(node)) {
            (Some(attribute), Some(record)) => {
                record.set_attribute(attribute);
                true
            }
            _ => false,
        }
    }
}

/// Parses a binary document. Chunks recorded before a decode failure are interpreted and kept
/// unless `ReaderOptions::keep_partial` is off.
pub fn parse_binary(data: &[u8], options: &ReaderOptions) -> ParseOutcome {
    let mut reader = BinaryReader::new(data);

    let index = match walk_chunks(data, options) {
        Ok(index) => index,
        Err(e) => return ParseOutcome::finish(reader.scene, Some(e.into()), options),
    };

    let mut error = index.error.clone().map(ParseError::from);
    if let Some(root) = index.chunks.first() {
        let form = root.form_type.as_deref().unwrap_or("");
        if form != ROOT_FORM && error.is_none() {
            error = Some(ParseError::new(
                Position::Byte(root.data_offset),
                ParseErrorKind::MissingRootForm(form.to_owned()),
            ));
        }
    }

    for i in 0..index.chunks.len() {
        reader.chunk(i, &index.chunks);
    }

    let mut scene = reader.scene;
    scene.chunks = index.chunks;
    tracing::debug!(
        "parsed binary scene: {} chunks, {} nodes, {} connections, {} raw chunks",
        scene.chunks.len(),
        scene.node_count(),
        scene.connections.len(),
        scene.raw_statements.len()
    );

    ParseOutcome::finish(scene, error, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::chunk::{ChunkLayout, ChunkWriter};
    use crate::parsers::{ByteWriter, DecodeError};

    fn payload<F: FnOnce(&mut ByteWriter)>(f: F) -> Vec<u8> {
        let mut w = ByteWriter::new(Endianness::Big);
        f(&mut w);
        w.into_inner()
    }

    fn attr<F: FnOnce(&mut ByteWriter)>(name: &str, values: F) -> Vec<u8> {
        payload(|w| {
            w.write_cstring(name).write(0_u8);
            values(w);
        })
    }

    fn create(name: &str, parent: Option<&str>) -> Vec<u8> {
        payload(|w| {
            w.write(0_u8).write_cstring(name);
            if let Some(parent) = parent {
                w.write_cstring(parent);
            }
        })
    }

    fn write_scene(w: &mut ChunkWriter) {
        w.begin_form(b"FOR4", b"HEAD")
            .chunk(b"VERS", b"2018\0")
            .chunk(b"LUNI", b"cm\0")
            .chunk(b"AUNI", b"deg\0")
            .chunk(b"TUNI", b"film\0")
            .chunk(b"FINF", b"application\0maya\0")
            .end_form();
        w.begin_form(b"FOR4", b"XFRM")
            .chunk(b"CREA", &create("pCube1", None))
            .chunk(
                b"DBL3",
                &attr("t", |w| {
                    w.write(1.0_f64).write(2.5_f64).write(-3.0_f64);
                }),
            )
            .chunk(
                b"STR ",
                &attr("nts", |w| {
                    w.write_cstring("hello");
                }),
            )
            .chunk(b"ZZZZ", b"mystery data")
            .end_form();
        w.begin_form(b"FOR4", b"DMSH")
            .chunk(b"CREA", &create("pCubeShape1", Some("pCube1")))
            .chunk(
                b"LNG2",
                &attr("ed", |w| {
                    w.write(0_i32).write(1_i32).write(1_i32).write(2_i32);
                }),
            )
            .end_form();
        w.begin_form(b"FOR4", b"BLOB")
            .chunk(b"CREA", &create("blob1", None))
            .end_form();
        w.chunk(
            b"CONN",
            &payload(|w| {
                w.write(1_u8)
                    .write_cstring("pCube1.wm")
                    .write_cstring("pCubeShape1.pm");
            }),
        );
    }

    fn sample(layout: ChunkLayout, root: &[u8; 4]) -> Vec<u8> {
        let mut w = ChunkWriter::new(layout);
        w.begin_form(root, b"Maya");
        write_scene(&mut w);
        w.finish()
    }

    #[test]
    fn test_is_binary() {
        assert!(is_binary(&sample(ChunkLayout::BITS32, b"FOR4")));
        assert!(!is_binary(b"//Maya ASCII 2018 scene"));
        assert!(!is_binary(b"FO"));
    }

    #[test]
    fn test_parse_document() {
        let data = sample(ChunkLayout::BITS32, b"FOR4");
        let outcome = parse_binary(&data, &ReaderOptions::default());
        assert!(outcome.is_complete(), "{:?}", outcome.error);
        let scene = outcome.scene;

        assert_eq!(scene.format.dialect, Some(Dialect::Binary));
        assert_eq!(scene.format.version.as_deref(), Some("2018"));
        assert_eq!(scene.format.units.time_fps(), Some(24.0));
        assert_eq!(scene.format.file_info("application"), Some("maya"));

        let names: Vec<_> = scene.nodes().map(|n| (n.name(), n.node_type.as_str())).collect();
        assert_eq!(
            names,
            vec![
                ("pCube1", "transform"),
                ("pCubeShape1", "mesh"),
                ("blob1", "unknown"),
            ]
        );

        let cube = scene.node("pCube1").unwrap();
        let t = cube.attribute("t").unwrap();
        assert_eq!(t.type_name.as_deref(), Some("double3"));
        assert_eq!(t.floats(), Some(vec![1.0, 2.5, -3.0]));
        assert_eq!(cube.attribute("nts").unwrap().tokens[0].as_str(), "hello");

        let shape = scene.node("pCubeShape1").unwrap();
        assert_eq!(shape.parent.as_deref(), Some("pCube1"));
        assert_eq!(shape.attribute("ed").unwrap().tokens.len(), 4);

        assert_eq!(scene.connections.len(), 1);
        assert!(scene.connections[0].force);
        assert_eq!(scene.connections[0].destination, "pCubeShape1.pm");

        // Every chunk is recorded, the unknown one is also kept raw.
        assert_eq!(scene.chunks.len(), 18);
        assert_eq!(scene.raw_statements.len(), 1);
        let raw = &scene.raw_statements[0];
        assert_eq!(raw.command, "ZZZZ");
        assert_eq!(raw.text, "mystery data");
        match raw.origin {
            RawOrigin::Chunk(i) => assert_eq!(scene.chunks[i].id, "ZZZZ"),
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[test]
    fn test_64_bit_document() {
        let data = sample(ChunkLayout::BITS64, b"FOR8");
        let scene = parse_binary(&data, &ReaderOptions::default())
            .into_result()
            .unwrap();
        assert_eq!(scene.node_count(), 3);
        assert_eq!(scene.connections.len(), 1);
        assert_eq!(
            scene
                .node("pCube1")
                .unwrap()
                .attribute("t")
                .unwrap()
                .first_f64(),
            Some(1.0)
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let data = sample(ChunkLayout::BITS32, b"FOR4");
        let options = ReaderOptions::default();
        assert_eq!(parse_binary(&data, &options), parse_binary(&data, &options));
    }

    #[test]
    fn test_partial_element_stays_raw() {
        let mut w = ChunkWriter::new(ChunkLayout::BITS32);
        w.begin_form(b"FOR4", b"Maya")
            .begin_form(b"FOR4", b"XFRM")
            .chunk(b"CREA", &create("a", None))
            .chunk(
                b"DBL3",
                &attr("t", |w| {
                    w.write(1.0_f64).write(2.0_f64);
                }),
            )
            .chunk(b"DBLE", &attr("v", |w| {
                w.write_bytes(&[0, 1, 2]);
            }));
        let scene = parse_binary(&w.finish(), &ReaderOptions::default())
            .into_result()
            .unwrap();
        assert_eq!(scene.node("a").unwrap().attribute_count(), 0);
        assert_eq!(scene.raw_statements.len(), 2);
    }

    #[test]
    fn test_second_form_with_taken_name_stays_raw() {
        let mut w = ChunkWriter::new(ChunkLayout::BITS32);
        w.begin_form(b"FOR4", b"Maya");
        w.begin_form(b"FOR4", b"XFRM")
            .chunk(b"CREA", &create("a", None))
            .chunk(b"DBLE", &attr("t", |w| {
                w.write(1.0_f64);
            }))
            .end_form();
        w.begin_form(b"FOR4", b"DMSH")
            .chunk(b"CREA", &create("a", None))
            .chunk(b"DBLE", &attr("t", |w| {
                w.write(9.0_f64);
            }))
            .end_form();
        let scene = parse_binary(&w.finish(), &ReaderOptions::default())
            .into_result()
            .unwrap();

        assert_eq!(scene.node_count(), 1);
        let a = scene.node("a").unwrap();
        assert_eq!(a.node_type, "transform");
        assert_eq!(a.attribute("t").unwrap().first_f64(), Some(1.0));

        let raw: Vec<_> = scene.raw_statements.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(raw, vec!["CREA", "DBLE"]);
        for statement in &scene.raw_statements {
            match statement.origin {
                RawOrigin::Chunk(i) => {
                    let form = scene.chunks[i].parent.map(|p| &scene.chunks[p]);
                    assert_eq!(form.and_then(|f| f.form_type.as_deref()), Some("DMSH"));
                }
                other => panic!("unexpected origin {:?}", other),
            }
        }
    }

    #[test]
    fn test_crea_must_open_the_form() {
        let mut w = ChunkWriter::new(ChunkLayout::BITS32);
        w.begin_form(b"FOR4", b"Maya")
            .begin_form(b"FOR4", b"XFRM")
            .chunk(b"DBLE", &attr("v", |w| {
                w.write(1.0_f64);
            }))
            .chunk(b"CREA", &create("late", None));
        let scene = parse_binary(&w.finish(), &ReaderOptions::default())
            .into_result()
            .unwrap();
        assert_eq!(scene.node_count(), 0);
        assert_eq!(scene.raw_statements.len(), 2);
    }

    #[test]
    fn test_missing_root_form() {
        let mut w = ChunkWriter::new(ChunkLayout::BITS32);
        w.begin_form(b"FOR4", b"Nope");
        write_scene(&mut w);
        let outcome = parse_binary(&w.finish(), &ReaderOptions::default());
        match &outcome.error {
            Some(ParseError {
                position: Position::Byte(8),
                reason: ParseErrorKind::MissingRootForm(form),
            }) => assert_eq!(form, "Nope"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outcome.scene.node_count(), 3);
    }

    #[test]
    fn test_truncated_document_keeps_partial_scene() {
        let mut data = sample(ChunkLayout::BITS32, b"FOR4");
        data.truncate(data.len() - 10);
        let outcome = parse_binary(&data, &ReaderOptions::default());
        assert!(matches!(
            outcome.error.as_ref().map(|e| &e.reason),
            Some(ParseErrorKind::Decode(_))
        ));
        assert!(outcome.scene.contains_node("pCube1"));
        assert!(outcome.scene.connections.is_empty());

        // The connection chunk where reading stopped is still recorded, and kept raw.
        let cut = outcome.scene.chunks.last().unwrap();
        assert_eq!(cut.id, "CONN");
        assert!(cut.truncated);
        let raw = outcome.scene.raw_statements.last().unwrap();
        assert_eq!(raw.command, "CONN");
        assert_eq!(raw.origin, RawOrigin::Chunk(outcome.scene.chunks.len() - 1));

        let options = ReaderOptions {
            keep_partial: false,
            ..ReaderOptions::default()
        };
        let outcome = parse_binary(&data, &options);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.scene.node_count(), 0);
    }

    #[test]
    fn test_bad_magic() {
        let outcome = parse_binary(b"not a scene", &ReaderOptions::default());
        assert!(matches!(
            outcome.error,
            Some(ParseError {
                position: Position::Byte(0),
                reason: ParseErrorKind::Decode(DecodeError::BadMagic { .. }),
            })
        ));
    }
}
