//! Node-type handlers and the wiring of a scene into an evaluation graph.
//!
//! A [`HandlerRegistry`] maps node types to [`NodeHandler`]s. Handlers are tried by descending
//! priority, and a node no handler supports goes to [`PassThroughHandler`], which gives it a
//! unit that computes nothing so its connections still propagate dirtiness.

use crate::connections::ConnectionResolver;
use crate::evaluation::{
    EvalContext, EvaluationError, EvaluationGraph, EvaluationUnit, PassThrough, Value,
};
use crate::scene::{NodeRecord, SceneGraph};
use crate::transform::TransformUnit;
use indexmap::IndexMap;
use std::cmp::Reverse;

/// What a handler sees of the scene while decoding one node.
pub struct DecodeContext<'a> {
    pub scene: &'a SceneGraph,
    pub connections: &'a ConnectionResolver<'a>,
    /// Degrees per angle unit of the scene.
    pub angle_to_degrees: f64,
}

impl<'a> DecodeContext<'a> {
    pub fn new(scene: &'a SceneGraph, connections: &'a ConnectionResolver<'a>) -> Self {
        DecodeContext {
            scene,
            connections,
            angle_to_degrees: scene.format.units.angle_to_degrees(),
        }
    }

    /// Name of the record the node's parent resolves to.
    pub fn parent_of(&self, node: &NodeRecord) -> Option<String> {
        let parent = node.parent.as_deref()?;
        self.scene.resolve_name(parent)
    }
}

/// Result of decoding one node.
#[derive(Debug, Default)]
pub struct DecodedResult {
    /// `None` when the node takes no part in evaluation.
    pub unit: Option<EvaluationUnit>,
    /// Attributes of the node the unit reads.
    pub reads: Vec<String>,
}

impl DecodedResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn unit(unit: EvaluationUnit) -> Self {
        DecodedResult {
            unit: Some(unit),
            reads: Vec::new(),
        }
    }

    pub fn reading<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(attributes.into_iter().map(Into::into));
        self
    }
}

/// Another node a node refers to, and through which of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReference {
    pub field: String,
    pub target: String,
}

impl NodeReference {
    pub fn new<F: Into<String>, T: Into<String>>(field: F, target: T) -> Self {
        NodeReference {
            field: field.into(),
            target: target.into(),
        }
    }
}

/// Parent and incoming connections of `node`, the references every node has.
pub fn structural_references(node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference> {
    let mut references = Vec::new();
    if let Some(parent) = &node.parent {
        references.push(NodeReference::new("parent", parent.as_str()));
    }
    for c in ctx.connections.incoming_to_node(node.name()) {
        references.push(NodeReference::new(c.destination_attr(), c.source_node()));
    }
    references
}

pub trait NodeHandler {
    fn name(&self) -> &str;

    fn supports(&self, node_type: &str) -> bool;

    /// Handlers with a higher priority are asked first.
    fn priority(&self) -> u32 {
        0
    }

    fn decode(&self, node: &NodeRecord, ctx: &DecodeContext) -> DecodedResult;

    /// The other nodes `node` refers to, for tools that show or check the scene's links.
    fn describe_references(&self, node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference>;
}

/// Gives any node a unit that computes nothing and keeps only its raw record.
#[derive(Debug, Default)]
pub struct PassThroughHandler;

impl NodeHandler for PassThroughHandler {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn supports(&self, _node_type: &str) -> bool {
        true
    }

    fn decode(&self, node: &NodeRecord, _ctx: &DecodeContext) -> DecodedResult {
        DecodedResult::unit(EvaluationUnit::new(node.name(), PassThrough))
    }

    fn describe_references(&self, node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference> {
        structural_references(node, ctx)
    }
}

/// `transform` and `joint` nodes, evaluated by `TransformUnit`.
#[derive(Debug, Default)]
pub struct TransformHandler;

impl TransformHandler {
    /// Every name a transform channel can be read under.
    pub fn channel_names() -> Vec<String> {
        let mut names = Vec::new();
        for (short, long) in TransformUnit::CHANNELS {
            names.push((*short).to_owned());
            names.push((*long).to_owned());
            for (lower, upper) in &[("x", "X"), ("y", "Y"), ("z", "Z")] {
                names.push(format!("{}{}", short, lower));
                names.push(format!("{}{}", long, upper));
            }
        }
        names
    }
}

impl NodeHandler for TransformHandler {
    fn name(&self) -> &str {
        "transform"
    }

    fn supports(&self, node_type: &str) -> bool {
        matches!(node_type, "transform" | "joint")
    }

    fn priority(&self) -> u32 {
        10
    }

    fn decode(&self, node: &NodeRecord, ctx: &DecodeContext) -> DecodedResult {
        let mut transform = TransformUnit::new(node.name()).with_angle_unit(ctx.angle_to_degrees);
        if let Some(parent) = ctx.parent_of(node) {
            transform = transform.with_parent(parent);
        }

        let mut unit = EvaluationUnit::new(node.name(), transform);
        unit.add_output("matrix");
        unit.add_output("worldMatrix");
        DecodedResult::unit(unit).reading(Self::channel_names())
    }

    fn describe_references(&self, node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference> {
        let mut references = structural_references(node, ctx);
        if let Some(parent) = ctx.parent_of(node) {
            references.push(NodeReference::new("parentMatrix", parent));
        }
        references
    }
}

/// `addDoubleLinear` and `multDoubleLinear`: `output = input1 (+|*) input2`.
#[derive(Debug, Default)]
pub struct DoubleLinearHandler;

fn double_linear_input(
    ctx: &dyn EvalContext,
    node: &str,
    long: &str,
    short: &str,
) -> Result<f64, EvaluationError> {
    let long_path = format!("{}.{}", node, long);
    if ctx.value(&long_path).is_some() {
        return ctx.float(&long_path);
    }
    ctx.float_or(&format!("{}.{}", node, short), 0.0)
}

impl NodeHandler for DoubleLinearHandler {
    fn name(&self) -> &str {
        "double-linear"
    }

    fn supports(&self, node_type: &str) -> bool {
        matches!(node_type, "addDoubleLinear" | "multDoubleLinear")
    }

    fn priority(&self) -> u32 {
        10
    }

    fn decode(&self, node: &NodeRecord, _ctx: &DecodeContext) -> DecodedResult {
        let name = node.name().to_owned();
        let multiply = node.node_type == "multDoubleLinear";
        let mut unit = EvaluationUnit::new(
            node.name(),
            move |ctx: &mut dyn EvalContext| -> Result<(), EvaluationError> {
                let a = double_linear_input(&*ctx, &name, "input1", "i1")?;
                let b = double_linear_input(&*ctx, &name, "input2", "i2")?;
                let result = if multiply { a * b } else { a + b };
                ctx.set_value(&format!("{}.output", name), Value::Float(result));
                ctx.set_value(&format!("{}.o", name), Value::Float(result));
                Ok(())
            },
        );
        unit.add_output("o");
        DecodedResult::unit(unit).reading(vec!["input1", "i1", "input2", "i2"])
    }

    fn describe_references(&self, node: &NodeRecord, ctx: &DecodeContext) -> Vec<NodeReference> {
        structural_references(node, ctx)
    }
}

/// Node handlers by descending priority. Handlers of equal priority keep the order they were
/// registered in.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn NodeHandler>>,
    sorted: bool,
    fallback: PassThroughHandler,
}

impl HandlerRegistry {
    /// A registry without handlers: every node is passed through.
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: Vec::new(),
            sorted: true,
            fallback: PassThroughHandler,
        }
    }

    /// A registry with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TransformHandler);
        registry.register(DoubleLinearHandler);
        registry
    }

    pub fn register<H: NodeHandler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn sort_if_needed(&mut self) {
        if !self.sorted {
            self.handlers.sort_by_key(|h| Reverse(h.priority()));
            self.sorted = true;
        }
    }

    /// Names of the registered handlers in the order they are asked.
    pub fn handler_names(&mut self) -> Vec<String> {
        self.sort_if_needed();
        self.handlers.iter().map(|h| h.name().to_owned()).collect()
    }

    /// The first handler supporting `node_type`, or the pass-through handler.
    pub fn handler_for(&mut self, node_type: &str) -> &dyn NodeHandler {
        self.sort_if_needed();
        match self.handlers.iter().find(|h| h.supports(node_type)) {
            Some(handler) => handler.as_ref(),
            None => &self.fallback,
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Builds the evaluation graph of `scene`.
///
/// Every node the registry decodes into a unit becomes a unit of the graph. Each child
/// depends on its parent's `worldMatrix`, and each connection becomes a dependency between the
/// two nodes plus a binding that copies the source value to the destination before the
/// destination computes. Connections to nodes without a unit are skipped.
///
/// Units that end up with attribute dependencies also depend on every attribute their handler
/// reads, so that a change to one of their own channels isn't filtered out.
pub fn build_evaluation_graph(
    scene: &SceneGraph,
    registry: &mut HandlerRegistry,
) -> EvaluationGraph {
    let resolver = ConnectionResolver::from_scene(scene);
    let ctx = DecodeContext::new(scene, &resolver);
    let mut graph = EvaluationGraph::new();
    let mut reads: IndexMap<String, Vec<String>> = IndexMap::new();

    for node in scene.nodes() {
        let decoded = registry.handler_for(&node.node_type).decode(node, &ctx);
        if let Some(unit) = decoded.unit {
            if graph.add_unit(unit) {
                reads.insert(node.name().to_owned(), decoded.reads);
            }
        }
    }

    for node in scene.nodes() {
        if let Some(parent) = ctx.parent_of(node) {
            graph.add_dependency(&parent, "worldMatrix", node.name(), "parentMatrix");
        }
    }

    let mut skipped = 0;
    for c in &scene.connections {
        let source = scene.resolve_name(c.source_node());
        let destination = scene.resolve_name(c.destination_node());
        let (source, destination) = match (source, destination) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                skipped += 1;
                continue;
            }
        };

        if !graph.add_dependency(&source, c.source_attr(), &destination, c.destination_attr()) {
            skipped += 1;
            continue;
        }
        if let Some(unit) = graph.unit_mut(&destination) {
            unit.bind(
                format!("{}.{}", source, c.source_attr()),
                format!("{}.{}", destination, c.destination_attr()),
            );
        }
    }

    for (name, attributes) in reads {
        if let Some(unit) = graph.unit_mut(&name) {
            if unit.attribute_dependencies().next().is_some() {
                for attribute in attributes {
                    unit.add_attribute_dependency(format!("{}.{}", name, attribute));
                }
            }
        }
    }

    tracing::debug!(
        "built evaluation graph with {} units from {} nodes, {} connection(s) skipped",
        graph.len(),
        scene.node_count(),
        skipped
    );
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::AttributeStore;
    use crate::scene::{Attribute, ConnectionRecord};
    use glam::DVec3;

    fn scene() -> SceneGraph {
        let mut scene = SceneGraph::new();
        let mut root = NodeRecord::new("root", "transform");
        root.set_attribute(Attribute::new("t").with_tokens(vec!["0", "5", "0"]));
        scene.add_node(root);
        let mut arm = NodeRecord::new("arm", "joint").with_parent("root");
        arm.set_attribute(Attribute::new("tx").with_tokens(vec!["2"]));
        scene.add_node(arm);

        let mut add = NodeRecord::new("offset", "addDoubleLinear");
        add.set_attribute(Attribute::new("i1").with_tokens(vec!["1.5"]));
        add.set_attribute(Attribute::new("i2").with_tokens(vec!["2"]));
        scene.add_node(add);
        scene.add_node(NodeRecord::new("shape", "mesh").with_parent("arm"));

        scene
            .connections
            .push(ConnectionRecord::new("offset.o", "arm.ty"));
        scene
            .connections
            .push(ConnectionRecord::new("ghost.o", "arm.tz"));
        scene
    }

    struct Named(&'static str, u32);

    impl NodeHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn supports(&self, node_type: &str) -> bool {
            node_type == "mesh"
        }

        fn priority(&self) -> u32 {
            self.1
        }

        fn decode(&self, _node: &NodeRecord, _ctx: &DecodeContext) -> DecodedResult {
            DecodedResult::none()
        }

        fn describe_references(
            &self,
            _node: &NodeRecord,
            _ctx: &DecodeContext,
        ) -> Vec<NodeReference> {
            Vec::new()
        }
    }

    #[test]
    fn test_registry_priority() {
        let mut registry = HandlerRegistry::new();
        registry.register(Named("low", 1));
        registry.register(Named("high", 5));
        registry.register(Named("also-low", 1));
        assert_eq!(registry.handler_names(), vec!["high", "low", "also-low"]);
        assert_eq!(registry.handler_for("mesh").name(), "high");
        assert_eq!(registry.handler_for("camera").name(), "pass-through");

        registry.register(Named("top", 9));
        assert_eq!(registry.handler_for("mesh").name(), "top");
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_graph_wiring() {
        let scene = scene();
        let mut registry = HandlerRegistry::with_defaults();
        let graph = build_evaluation_graph(&scene, &mut registry);

        assert_eq!(graph.len(), 4);
        let arm = graph.unit("arm").unwrap();
        assert_eq!(arm.upstream().collect::<Vec<_>>(), vec!["root", "offset"]);
        assert_eq!(
            arm.bindings(),
            &[("offset.o".to_owned(), "arm.ty".to_owned())][..]
        );
        let dependencies: Vec<&str> = arm.attribute_dependencies().collect();
        assert!(dependencies.contains(&"root.worldMatrix"));
        assert!(dependencies.contains(&"arm.jo"));
        assert!(graph.unit("root").unwrap().attribute_dependencies().next().is_none());
        assert!(graph.unit("root").unwrap().outputs().any(|o| o == "worldMatrix"));
    }

    #[test]
    fn test_evaluate_scene() {
        let scene = scene();
        let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
        let mut store = AttributeStore::new();
        store.seed_from_scene(&scene);

        let report = graph.evaluate(&mut store);
        assert!(report.is_success());
        assert_eq!(report.computed.len(), 4);

        let world = store
            .value("arm.worldMatrix")
            .and_then(Value::as_matrix)
            .unwrap();
        assert!(world
            .transform_point3(DVec3::ZERO)
            .abs_diff_eq(DVec3::new(2.0, 8.5, 0.0), 1e-9));

        // Changing a channel of the root re-evaluates only what depends on it.
        store.clear_dirty_attributes();
        store.set_value("root.tx", Value::Float(1.0));
        store.mark_attribute_dirty("root.tx");
        graph.mark_dirty("root");
        let report = graph.evaluate(&mut store);
        assert_eq!(report.computed, vec!["root", "arm", "shape"]);
        let world = store
            .value("arm.worldMatrix")
            .and_then(Value::as_matrix)
            .unwrap();
        assert!(world
            .transform_point3(DVec3::ZERO)
            .abs_diff_eq(DVec3::new(3.0, 8.5, 0.0), 1e-9));
    }

    #[test]
    fn test_describe_references() {
        let scene = scene();
        let resolver = ConnectionResolver::from_scene(&scene);
        let ctx = DecodeContext::new(&scene, &resolver);
        let mut registry = HandlerRegistry::with_defaults();

        let arm = scene.node("arm").unwrap();
        let references = registry.handler_for("joint").describe_references(arm, &ctx);
        assert_eq!(
            references,
            vec![
                NodeReference::new("parent", "root"),
                NodeReference::new("ty", "offset"),
                NodeReference::new("tz", "ghost"),
                NodeReference::new("parentMatrix", "root"),
            ]
        );
    }
}
