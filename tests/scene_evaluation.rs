use glam::{DMat4, DVec3};
use mayafile::handlers::{structural_references, DecodeContext, DecodedResult, NodeReference};
use mayafile::parsers::text::parse_text;
use mayafile::transform::decompose;
use mayafile::{
    build_evaluation_graph, AttributeStore, ConnectionResolver, EvalContext, EvaluationError,
    EvaluationGraph, EvaluationUnit, HandlerRegistry, NodeHandler, NodeRecord, ReaderOptions,
    RotateOrder, SceneGraph, Value,
};
use std::io::Cursor;

const RIG: &str = r#"//Maya ASCII 2018 scene
requires maya "2018";
currentUnit -l centimeter -a degree -t film;
createNode transform -n "group1";
	setAttr ".t" -type "double3" 0 10 0 ;
	setAttr ".r" -type "double3" 0 0 90 ;
createNode transform -n "pCube1" -p "group1";
	setAttr ".t" -type "double3" 1 0 0 ;
	setAttr ".s" -type "double3" 1 -2 1 ;
createNode mesh -n "pCubeShape1" -p "pCube1";
createNode multDoubleLinear -n "double1";
	setAttr ".i1" 3;
	setAttr ".i2" 2;
createNode transform -n "follower";
connectAttr "double1.o" "follower.ty";
"#;

fn world(store: &AttributeStore, node: &str) -> DMat4 {
    store
        .value(&format!("{}.worldMatrix", node))
        .and_then(Value::as_matrix)
        .unwrap()
}

#[test]
fn test_text_scene_evaluates() {
    let scene = SceneGraph::from_text(RIG).unwrap();
    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    assert_eq!(graph.len(), 5);

    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    let report = graph.evaluate(&mut store);
    assert!(report.is_success(), "{:?}", report.diagnostics);
    assert_eq!(report.computed.len(), 5);
    assert!(graph.units().all(|u| !u.is_dirty()));

    let cube = world(&store, "pCube1");
    assert!(cube
        .transform_point3(DVec3::ZERO)
        .abs_diff_eq(DVec3::new(0.0, 11.0, 0.0), 1e-9));

    let parts = decompose(&cube, RotateOrder::Xyz);
    assert!(parts.scale.abs_diff_eq(DVec3::new(1.0, -2.0, 1.0), 1e-9));
    assert!(parts.rotate.abs_diff_eq(DVec3::new(0.0, 0.0, 90.0), 1e-9));

    let follower = world(&store, "follower");
    assert!(follower.w_axis.truncate().abs_diff_eq(DVec3::new(0.0, 6.0, 0.0), 1e-9));

    let again = graph.evaluate(&mut store);
    assert!(again.computed.is_empty());
}

#[test]
fn test_change_reaches_only_dependents() {
    let scene = SceneGraph::from_text(RIG).unwrap();
    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    graph.evaluate(&mut store);

    store.clear_dirty_attributes();
    store.set_value("double1.i2", Value::Float(4.0));
    store.mark_attribute_dirty("double1.i2");
    assert_eq!(graph.mark_dirty("double1"), 2);

    let report = graph.evaluate(&mut store);
    assert_eq!(report.computed, vec!["double1", "follower"]);
    let follower = world(&store, "follower");
    assert!(follower.w_axis.truncate().abs_diff_eq(DVec3::new(0.0, 12.0, 0.0), 1e-9));
}

#[test]
fn test_radian_scenes() {
    let source = "currentUnit -a radian;\n\
                  createNode transform -n \"spin\";\n\
                  setAttr \".r\" -type \"double3\" 0 0 1.5707963267948966;";
    let scene = SceneGraph::from_text(source).unwrap();
    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    graph.evaluate(&mut store);

    let spin = world(&store, "spin");
    assert!(spin.transform_vector3(DVec3::X).abs_diff_eq(DVec3::Y, 1e-9));
}

struct SumHandler;

impl NodeHandler for SumHandler {
    fn name(&self) -> &str {
        "sum"
    }

    fn supports(&self, node_type: &str) -> bool {
        node_type == "sum"
    }

    fn decode(&self, node: &NodeRecord, _ctx: &DecodeContext) -> DecodedResult {
        let name = node.name().to_owned();
        let unit = EvaluationUnit::new(
            node.name(),
            move |ctx: &mut dyn EvalContext| -> Result<(), EvaluationError> {
                let sum = ctx.float(&format!("{}.input1", name))?
                    + ctx.float(&format!("{}.input2", name))?;
                ctx.set_value(&format!("{}.output", name), Value::Float(sum));
                Ok(())
            },
        );
        DecodedResult::unit(unit).reading(vec!["input1", "input2"])
    }

    fn describe_references(&self, node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference> {
        structural_references(node, ctx)
    }
}

#[test]
fn test_sum_node_through_registry() {
    let scene = SceneGraph::from_text(
        "createNode sum -n \"n1\";\nsetAttr \".input1\" 2.0;\nsetAttr \".input2\" 3.0;",
    )
    .unwrap();
    let mut registry = HandlerRegistry::new();
    registry.register(SumHandler);
    let mut graph = build_evaluation_graph(&scene, &mut registry);

    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    let report = graph.evaluate(&mut store);

    assert_eq!(report.computed, vec!["n1"]);
    assert_eq!(store.value("n1.output"), Some(&Value::Float(5.0)));
    assert!(!graph.unit("n1").unwrap().is_dirty());
}

#[test]
fn test_failing_unit_does_not_block_others() {
    let scene = SceneGraph::from_text(
        "createNode sum -n \"broken\";\n\
         createNode transform -n \"fine\";\n\
         setAttr \".tx\" 4;",
    )
    .unwrap();
    let mut registry = HandlerRegistry::with_defaults();
    registry.register(SumHandler);
    let mut graph = build_evaluation_graph(&scene, &mut registry);

    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    let report = graph.evaluate(&mut store);

    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].unit, "broken");
    assert_eq!(
        report.diagnostics[0].error,
        EvaluationError::MissingInput("broken.input1".to_owned())
    );
    assert!(graph.unit("broken").unwrap().is_dirty());
    assert_eq!(report.computed, vec!["fine"]);
    assert_eq!(world(&store, "fine").w_axis.x, 4.0);
}

#[test]
fn test_connection_cycles_are_reported() {
    let scene = SceneGraph::from_text(
        "createNode transform -n \"a\";\n\
         createNode transform -n \"b\";\n\
         connectAttr \"a.tx\" \"b.tx\";\n\
         connectAttr \"b.tx\" \"a.tx\";",
    )
    .unwrap();
    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());

    let order = graph.build_evaluation_order().to_vec();
    assert_eq!(order.len(), 2);
    assert_eq!(graph.cycle_nodes().len(), 1);

    let mut store = AttributeStore::new();
    let report = graph.evaluate(&mut store);
    assert!(report.is_success());
}

#[test]
fn test_unknown_types_pass_through() {
    let scene = SceneGraph::from_text(RIG).unwrap();
    let mut registry = HandlerRegistry::new();
    assert_eq!(registry.handler_for("multDoubleLinear").name(), "pass-through");

    let mut graph = build_evaluation_graph(&scene, &mut registry);
    let mut store = AttributeStore::new();
    let report = graph.evaluate(&mut store);
    assert_eq!(report.computed.len(), 5);
    assert!(store.value("pCube1.worldMatrix").is_none());
}

#[test]
fn test_partial_text_still_wires() {
    let options = ReaderOptions::default();
    let outcome = parse_text(
        "createNode transform -n \"a\";\n\
         setAttr \".tx\" 1;\n\
         createNode transform -n \"b\" -p \"a\"",
        &options,
    );
    assert!(outcome.error.is_some());
    let scene = outcome.scene;
    assert!(scene.node("a").is_some());

    let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
    let mut store = AttributeStore::new();
    store.seed_from_scene(&scene);
    assert!(graph.evaluate(&mut store).is_success());
    assert_eq!(world(&store, "a").w_axis.x, 1.0);
}

#[test]
fn test_long_dependency_chain() {
    let len = 50_000;
    let mut graph = EvaluationGraph::new();
    // Added last to first so the traversal starts at the far end of the chain.
    for i in (0..len).rev() {
        graph.add_unit(EvaluationUnit::new(
            format!("n{}", i),
            |_: &mut dyn EvalContext| -> Result<(), EvaluationError> { Ok(()) },
        ));
    }
    for i in 1..len {
        assert!(graph.add_node_dependency(&format!("n{}", i - 1), &format!("n{}", i)));
    }

    let order = graph.build_evaluation_order().to_vec();
    assert_eq!(order.len(), len);
    assert_eq!(order[0], "n0");
    assert_eq!(order[len - 1], format!("n{}", len - 1));
    assert!(graph.cycle_nodes().is_empty());

    let mut store = AttributeStore::new();
    assert_eq!(graph.evaluate(&mut store).computed.len(), len);
    assert_eq!(graph.mark_dirty("n0"), len);
}

#[test]
fn test_leaf_name_queries_per_direction() {
    let scene = SceneGraph::from_text(
        "createNode transform -n \"n\" -p \"g1\";\n\
         connectAttr \"|g1|n.o\" \"x.i\";\n\
         connectAttr \"y.o\" \"|g2|n.i\";",
    )
    .unwrap();
    let resolver = ConnectionResolver::from_scene(&scene);

    let incoming = resolver.incoming_to_node("n");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].destination, "|g2|n.i");
    assert_eq!(resolver.outgoing_from_node("n")[0].source, "|g1|n.o");
}

#[test]
fn test_latin1_text_is_kept() {
    let data = b"createNode transform -n \"label\";\n\
                 setAttr \".s\" -type \"string\" \"caf\xE9\";\n";
    let scene = SceneGraph::from_data(Cursor::new(&data[..])).unwrap();
    let attribute = scene.node("label").unwrap().attribute("s").unwrap();
    assert_eq!(attribute.tokens.len(), 1);
    assert_eq!(attribute.tokens[0].as_str(), "caf\u{e9}");
    assert_eq!(attribute.tokens[0].as_str().chars().last(), Some('\u{e9}'));
}
