use glam::DVec3;
use mayafile::parsers::chunk::{ChunkLayout, ChunkWriter};
use mayafile::parsers::{ByteWriter, Endianness};
use mayafile::scene::RawOrigin;
use mayafile::{
    build_evaluation_graph, AttributeStore, EvalContext, HandlerRegistry, SceneGraph, Value,
};
use std::io::Cursor;

fn payload<F: FnOnce(&mut ByteWriter)>(f: F) -> Vec<u8> {
    let mut w = ByteWriter::new(Endianness::Big);
    f(&mut w);
    w.into_inner()
}

fn create(name: &str, parent: Option<&str>) -> Vec<u8> {
    payload(|w| {
        w.write(0_u8).write_cstring(name);
        if let Some(parent) = parent {
            w.write_cstring(parent);
        }
    })
}

fn double3(name: &str, v: [f64; 3]) -> Vec<u8> {
    payload(|w| {
        w.write_cstring(name).write(0_u8);
        for x in v.iter() {
            w.write(*x);
        }
    })
}

/// A hip joint at y=10 rotated 90 degrees about Z, and a knee one unit along its X axis.
fn skeleton(layout: ChunkLayout, root: &[u8; 4]) -> Vec<u8> {
    let mut w = ChunkWriter::new(layout);
    w.begin_form(root, b"Maya");
    w.begin_form(root, b"HEAD")
        .chunk(b"VERS", b"2018\0")
        .chunk(b"AUNI", b"deg\0")
        .end_form();
    w.begin_form(root, b"JONT")
        .chunk(b"CREA", &create("hip", None))
        .chunk(b"DBL3", &double3("t", [0.0, 10.0, 0.0]))
        .chunk(b"DBL3", &double3("jo", [0.0, 0.0, 90.0]))
        .end_form();
    w.begin_form(root, b"JONT")
        .chunk(b"CREA", &create("knee", Some("hip")))
        .chunk(b"DBL3", &double3("t", [1.0, 0.0, 0.0]))
        .chunk(b"SLCT", b"\x00\x01")
        .end_form();
    w.finish()
}

#[test]
fn test_binary_skeleton_evaluates() {
    for &(layout, root) in &[
        (ChunkLayout::BITS32, b"FOR4"),
        (ChunkLayout::BITS64, b"FOR8"),
    ] {
        let scene = SceneGraph::from_binary(&skeleton(layout, root)).unwrap();
        assert_eq!(scene.node_count(), 2);
        assert_eq!(scene.node("knee").unwrap().parent.as_deref(), Some("hip"));
        assert_eq!(scene.raw_statements.len(), 1);
        assert!(matches!(scene.raw_statements[0].origin, RawOrigin::Chunk(_)));

        let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
        let mut store = AttributeStore::new();
        store.seed_from_scene(&scene);
        let report = graph.evaluate(&mut store);
        assert_eq!(report.computed, vec!["hip", "knee"]);

        let knee = store
            .value("knee.worldMatrix")
            .and_then(Value::as_matrix)
            .unwrap();
        assert!(knee
            .transform_point3(DVec3::ZERO)
            .abs_diff_eq(DVec3::new(0.0, 11.0, 0.0), 1e-9));
    }
}

#[test]
fn test_from_data_sniffs_dialect() {
    let binary = skeleton(ChunkLayout::BITS32, b"FOR4");
    let from_bytes = SceneGraph::from_data(Cursor::new(binary.clone())).unwrap();
    assert_eq!(from_bytes, SceneGraph::from_binary(&binary).unwrap());

    let text = "createNode joint -n \"hip\";\nsetAttr \".t\" -type \"double3\" 0 10 0 ;\n";
    let from_text = SceneGraph::from_data(Cursor::new(text.as_bytes())).unwrap();
    assert_eq!(from_text.node("hip").unwrap().node_type, "joint");
    assert!(from_text.chunks.is_empty());
}

#[test]
fn test_dialects_agree_on_values() {
    let text = "createNode joint -n \"hip\";\n\
                setAttr \".t\" -type \"double3\" 0 10 0 ;\n\
                setAttr \".jo\" -type \"double3\" 0 0 90 ;\n\
                createNode joint -n \"knee\" -p \"hip\";\n\
                setAttr \".t\" -type \"double3\" 1 0 0 ;\n";
    let from_text = SceneGraph::from_text(text).unwrap();
    let from_binary = SceneGraph::from_binary(&skeleton(ChunkLayout::BITS32, b"FOR4")).unwrap();

    let mut text_store = AttributeStore::new();
    text_store.seed_from_scene(&from_text);
    let mut binary_store = AttributeStore::new();
    binary_store.seed_from_scene(&from_binary);

    for path in &["hip.t", "hip.jo", "knee.t"] {
        assert_eq!(text_store.value(path), binary_store.value(path), "{}", path);
    }
}

#[test]
fn test_truncated_binary_keeps_what_was_read() {
    let mut data = skeleton(ChunkLayout::BITS32, b"FOR4");
    data.truncate(data.len() - 12);

    assert!(SceneGraph::from_binary(&data).is_err());
    let outcome =
        mayafile::parsers::binary::parse_binary(&data, &mayafile::ReaderOptions::default());
    assert!(outcome.error.is_some());
    assert!(outcome.scene.node("hip").is_some());
}

#[test]
fn test_repeated_node_name_leaves_first_record_alone() {
    let mut w = ChunkWriter::new(ChunkLayout::BITS32);
    w.begin_form(b"FOR4", b"Maya");
    w.begin_form(b"FOR4", b"JONT")
        .chunk(b"CREA", &create("hip", None))
        .chunk(b"DBL3", &double3("t", [0.0, 10.0, 0.0]))
        .end_form();
    w.begin_form(b"FOR4", b"DMSH")
        .chunk(b"CREA", &create("hip", None))
        .chunk(b"DBL3", &double3("t", [9.0, 9.0, 9.0]))
        .end_form();
    let scene = SceneGraph::from_binary(&w.finish()).unwrap();

    assert_eq!(scene.node_count(), 1);
    let hip = scene.node("hip").unwrap();
    assert_eq!(hip.node_type, "joint");
    assert_eq!(hip.attribute("t").unwrap().floats(), Some(vec![0.0, 10.0, 0.0]));

    let raw: Vec<_> = scene
        .raw_statements
        .iter()
        .map(|r| r.command.as_str())
        .collect();
    assert_eq!(raw, vec!["CREA", "DBL3"]);
    for statement in &scene.raw_statements {
        match statement.origin {
            RawOrigin::Chunk(i) => {
                assert_eq!(scene.chunks[i].form_type.as_deref(), Some("DMSH"))
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    graph.evaluate(&mut store);
    let hip = store
        .value("hip.worldMatrix")
        .and_then(Value::as_matrix)
        .unwrap();
    assert!(hip
        .transform_point3(DVec3::ZERO)
        .abs_diff_eq(DVec3::new(0.0, 10.0, 0.0), 1e-9));
}
