//! Incremental evaluation of scene nodes.
//!
//! Every node that takes part in evaluation is wrapped in an [`EvaluationUnit`]. Units are
//! either clean or dirty. Marking a unit dirty marks everything downstream of it dirty too, and
//! evaluating the graph brings dirty units back to clean in dependency order. Units that
//! declare which attribute paths they read can skip their computation when the paths that
//! changed are all irrelevant to them.

use crate::scene::{Attribute, SceneGraph};
use crate::schedule;
use glam::{DMat4, DVec3};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::fmt;

/// A value of the attribute store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vector(Vec<f64>),
    Matrix(DMat4),
    Text(String),
}

impl Value {
    /// Builds a value from the tokens of a scene attribute. Declared-only attributes have no
    /// value.
    pub fn from_attribute(attribute: &Attribute) -> Option<Value> {
        if attribute.tokens.is_empty() {
            return None;
        }
        if let Some(floats) = attribute.floats() {
            if attribute.type_name.as_deref() == Some("matrix") && floats.len() == 16 {
                return Some(Value::Matrix(DMat4::from_cols_slice(&floats)));
            }
            return Some(match floats.as_slice() {
                [single] => Value::Float(*single),
                _ => Value::Vector(floats),
            });
        }
        if let [token] = attribute.tokens.as_slice() {
            if let Some(b) = token.to_bool() {
                return Some(Value::Bool(b));
            }
        }
        let text: Vec<&str> = attribute.tokens.iter().map(|t| t.as_str()).collect();
        Some(Value::Text(text.join(" ")))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Vector(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vec<f64>> {
        match self {
            Value::Vector(v) => Some(v.clone()),
            Value::Matrix(m) => Some(m.to_cols_array().to_vec()),
            other => other.as_f64().map(|f| vec![f]),
        }
    }

    pub fn as_dvec3(&self) -> Option<DVec3> {
        match self {
            Value::Vector(v) if v.len() >= 3 => Some(DVec3::new(v[0], v[1], v[2])),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<DMat4> {
        match self {
            Value::Matrix(m) => Some(*m),
            Value::Vector(v) if v.len() == 16 => Some(DMat4::from_cols_slice(v)),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Float(_) => "float",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Vector(_) => "vector",
            Value::Matrix(_) => "matrix",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Vector(v) => {
                let parts: Vec<String> = v.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Matrix(m) => write!(f, "{:?}", m.to_cols_array()),
            Value::Text(t) => f.write_str(t),
        }
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Type mismatch
    #[error("Type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

/// What a unit sees while it computes: the time, which attribute paths changed, and a
/// `"node.attribute"` keyed value store.
pub trait EvalContext {
    fn time(&self) -> f64;

    fn mark_attribute_dirty(&mut self, path: &str);

    fn is_attribute_dirty(&self, path: &str) -> bool;

    fn has_any_dirty_attributes(&self) -> bool;

    fn value(&self, path: &str) -> Option<&Value>;

    fn set_value(&mut self, path: &str, value: Value);

    fn float(&self, path: &str) -> Result<f64, EvaluationError> {
        let value = self
            .value(path)
            .ok_or_else(|| EvaluationError::MissingInput(path.to_owned()))?;
        value.as_f64().ok_or_else(|| EvaluationError::TypeMismatch {
            path: path.to_owned(),
            expected: "float",
            found: value.type_name(),
        })
    }

    /// The value at `path` as a float, `default` when there is none.
    fn float_or(&self, path: &str, default: f64) -> Result<f64, EvaluationError> {
        match self.value(path) {
            None => Ok(default),
            Some(_) => self.float(path),
        }
    }

    fn dvec3_or(&self, path: &str, default: DVec3) -> Result<DVec3, EvaluationError> {
        match self.value(path) {
            None => Ok(default),
            Some(value) => value.as_dvec3().ok_or_else(|| EvaluationError::TypeMismatch {
                path: path.to_owned(),
                expected: "vector",
                found: value.type_name(),
            }),
        }
    }

    fn matrix_or(&self, path: &str, default: DMat4) -> Result<DMat4, EvaluationError> {
        match self.value(path) {
            None => Ok(default),
            Some(value) => value.as_matrix().ok_or_else(|| EvaluationError::TypeMismatch {
                path: path.to_owned(),
                expected: "matrix",
                found: value.type_name(),
            }),
        }
    }
}

/// The default `EvalContext`: values and dirty paths in insertion order.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    time: f64,
    dirty: IndexSet<String>,
    values: IndexMap<String, Value>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Copies every attribute value of `scene` into the store. Seeding doesn't mark anything
    /// dirty.
    pub fn seed_from_scene(&mut self, scene: &SceneGraph) {
        for node in scene.nodes() {
            for attribute in node.attributes() {
                if let Some(value) = Value::from_attribute(attribute) {
                    self.values
                        .insert(format!("{}.{}", node.name(), attribute.key), value);
                }
            }
        }
    }

    /// Forgets which paths changed, starting a new change set.
    pub fn clear_dirty_attributes(&mut self) {
        self.dirty.clear();
    }

    pub fn dirty_attributes(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl EvalContext for AttributeStore {
    fn time(&self) -> f64 {
        self.time
    }

    fn mark_attribute_dirty(&mut self, path: &str) {
        if !self.dirty.contains(path) {
            self.dirty.insert(path.to_owned());
        }
    }

    fn is_attribute_dirty(&self, path: &str) -> bool {
        self.dirty.contains(path)
    }

    fn has_any_dirty_attributes(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn value(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    fn set_value(&mut self, path: &str, value: Value) {
        self.values.insert(path.to_owned(), value);
    }
}

/// The computation of a unit.
pub trait Evaluate {
    fn compute(&mut self, ctx: &mut dyn EvalContext) -> Result<(), EvaluationError>;
}

impl<F> Evaluate for F
where
    F: FnMut(&mut dyn EvalContext) -> Result<(), EvaluationError>,
{
    fn compute(&mut self, ctx: &mut dyn EvalContext) -> Result<(), EvaluationError> {
        self(ctx)
    }
}

/// A unit that computes nothing. Evaluating it still marks its outputs dirty, so values written
/// to its attributes from outside reach the units downstream.
#[derive(Debug, Default)]
pub struct PassThrough;

impl Evaluate for PassThrough {
    fn compute(&mut self, _ctx: &mut dyn EvalContext) -> Result<(), EvaluationError> {
        Ok(())
    }
}

/// What `EvaluationUnit::evaluate_if_needed` did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnitEvaluation {
    /// The unit was clean.
    Clean,
    /// None of the attribute paths the unit reads changed.
    Skipped,
    Computed,
}

/// One node of the evaluation graph.
pub struct EvaluationUnit {
    name: String,
    dirty: bool,
    upstream: IndexSet<String>,
    downstream: IndexSet<String>,
    attribute_dependencies: IndexSet<String>,
    /// Source plug to destination plug, copied right before computing.
    bindings: Vec<(String, String)>,
    /// Attributes of this unit other units read.
    outputs: IndexSet<String>,
    compute: Box<dyn Evaluate>,
}

impl fmt::Debug for EvaluationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationUnit")
            .field("name", &self.name)
            .field("dirty", &self.dirty)
            .field("upstream", &self.upstream)
            .field("attribute_dependencies", &self.attribute_dependencies)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl EvaluationUnit {
    /// A new unit starts dirty.
    pub fn new<N: Into<String>, E: Evaluate + 'static>(name: N, compute: E) -> Self {
        EvaluationUnit {
            name: name.into(),
            dirty: true,
            upstream: IndexSet::new(),
            downstream: IndexSet::new(),
            attribute_dependencies: IndexSet::new(),
            bindings: Vec::new(),
            outputs: IndexSet::new(),
            compute: Box::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Names of the units this one depends on.
    pub fn upstream(&self) -> impl Iterator<Item = &str> {
        self.upstream.iter().map(String::as_str)
    }

    /// Names of the units depending on this one.
    pub fn downstream(&self) -> impl Iterator<Item = &str> {
        self.downstream.iter().map(String::as_str)
    }

    pub fn attribute_dependencies(&self) -> impl Iterator<Item = &str> {
        self.attribute_dependencies.iter().map(String::as_str)
    }

    /// Declares that this unit reads `path`. A unit with declared paths only computes when one
    /// of them changed or when no path changed at all.
    pub fn add_attribute_dependency<P: Into<String>>(&mut self, path: P) {
        self.attribute_dependencies.insert(path.into());
    }

    /// Declares an attribute of this unit other units read.
    pub fn add_output<A: Into<String>>(&mut self, attribute: A) {
        self.outputs.insert(attribute.into());
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(String::as_str)
    }

    /// Copies the value at `source` to `destination` each time before the unit computes.
    pub fn bind<S: Into<String>, D: Into<String>>(&mut self, source: S, destination: D) {
        self.bindings.push((source.into(), destination.into()));
    }

    pub fn bindings(&self) -> &[(String, String)] {
        &self.bindings
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Brings the unit back to clean, computing it if it has to. A failed computation leaves
    /// the unit dirty.
    pub fn evaluate_if_needed(
        &mut self,
        ctx: &mut dyn EvalContext,
    ) -> Result<UnitEvaluation, EvaluationError> {
        if !self.dirty {
            return Ok(UnitEvaluation::Clean);
        }

        if !self.attribute_dependencies.is_empty()
            && ctx.has_any_dirty_attributes()
            && !self
                .attribute_dependencies
                .iter()
                .any(|path| ctx.is_attribute_dirty(path))
        {
            self.dirty = false;
            return Ok(UnitEvaluation::Skipped);
        }

        for (source, destination) in &self.bindings {
            if let Some(value) = ctx.value(source).cloned() {
                ctx.set_value(destination, value);
            }
        }

        tracing::trace!("computing '{}'", self.name);
        self.compute.compute(ctx)?;

        ctx.mark_attribute_dirty(&format!("{}.output", self.name));
        for output in &self.outputs {
            ctx.mark_attribute_dirty(&format!("{}.{}", self.name, output));
        }
        self.dirty = false;
        Ok(UnitEvaluation::Computed)
    }
}

/// A unit whose computation failed during `EvaluationGraph::evaluate`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationDiagnostic {
    pub unit: String,
    pub error: EvaluationError,
}

/// What one `EvaluationGraph::evaluate` pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    pub computed: Vec<String>,
    pub skipped: Vec<String>,
    pub diagnostics: Vec<EvaluationDiagnostic>,
}

impl EvaluationReport {
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Owns every unit and the dependencies between them.
#[derive(Debug, Default)]
pub struct EvaluationGraph {
    units: IndexMap<String, EvaluationUnit>,
    order: Option<Vec<String>>,
    cycle_nodes: IndexSet<String>,
}

impl EvaluationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit. Returns false, leaving the graph as it was, if the name is taken.
    pub fn add_unit(&mut self, unit: EvaluationUnit) -> bool {
        if self.units.contains_key(&unit.name) {
            return false;
        }
        self.units.insert(unit.name.clone(), unit);
        self.order = None;
        true
    }

    pub fn unit(&self, name: &str) -> Option<&EvaluationUnit> {
        self.units.get(name)
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut EvaluationUnit> {
        self.units.get_mut(name)
    }

    pub fn units(&self) -> impl Iterator<Item = &EvaluationUnit> {
        self.units.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Makes `destination` depend on `source`. Returns false, adding nothing, when either unit
    /// doesn't exist.
    pub fn add_node_dependency(&mut self, source: &str, destination: &str) -> bool {
        if !self.units.contains_key(source) || !self.units.contains_key(destination) {
            tracing::trace!("ignoring dependency {} -> {}", source, destination);
            return false;
        }
        if source == destination {
            return true;
        }

        let added = match self.units.get_mut(destination) {
            Some(unit) => unit.upstream.insert(source.to_owned()),
            None => false,
        };
        if let Some(unit) = self.units.get_mut(source) {
            unit.downstream.insert(destination.to_owned());
        }
        if added {
            self.order = None;
        }
        true
    }

    /// Makes `dst_node` depend on `src_node` and records the attribute paths on both ends as
    /// attribute dependencies of `dst_node`. Returns false, adding nothing, when either unit
    /// doesn't exist.
    pub fn add_dependency(
        &mut self,
        src_node: &str,
        src_attr: &str,
        dst_node: &str,
        dst_attr: &str,
    ) -> bool {
        if !self.add_node_dependency(src_node, dst_node) {
            return false;
        }
        if let Some(source) = self.units.get_mut(src_node) {
            source.add_output(src_attr);
        }
        if let Some(destination) = self.units.get_mut(dst_node) {
            destination.add_attribute_dependency(format!("{}.{}", dst_node, dst_attr));
            destination.add_attribute_dependency(format!("{}.{}", src_node, src_attr));
        }
        true
    }

    /// Marks `name` and everything downstream of it dirty. Returns how many units were
    /// visited.
    pub fn mark_dirty(&mut self, name: &str) -> usize {
        if !self.units.contains_key(name) {
            return 0;
        }
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::new();
        seen.insert(name.to_owned());
        queue.push_back(name.to_owned());

        while let Some(current) = queue.pop_front() {
            if let Some(unit) = self.units.get_mut(&current) {
                unit.dirty = true;
                for next in &unit.downstream {
                    if seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }
        seen.len()
    }

    pub fn mark_all_dirty(&mut self) {
        for unit in self.units.values_mut() {
            unit.dirty = true;
        }
    }

    /// Units in dependency order. The order is cached until units or dependencies change.
    pub fn build_evaluation_order(&mut self) -> &[String] {
        if self.order.is_none() {
            let units = &self.units;
            let result = schedule::topological_order(units.keys().cloned(), |name: &String| {
                units
                    .get(name)
                    .map(|u| u.upstream.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default()
            });
            if result.has_cycles() {
                tracing::debug!(
                    "evaluation graph has {} cycle(s) through {:?}",
                    result.cycle_nodes.len(),
                    result.cycle_nodes
                );
            }
            tracing::debug!("built evaluation order for {} units", result.order.len());
            self.cycle_nodes = result.cycle_nodes;
            self.order = Some(result.order);
        }
        self.order.as_deref().unwrap_or(&[])
    }

    /// Units found on a cycle by the last order build.
    pub fn cycle_nodes(&self) -> &IndexSet<String> {
        &self.cycle_nodes
    }

    /// Evaluates every dirty unit in dependency order. A unit that fails is reported and
    /// stays dirty; the units after it still run.
    pub fn evaluate(&mut self, ctx: &mut dyn EvalContext) -> EvaluationReport {
        let order = self.build_evaluation_order().to_vec();
        let mut report = EvaluationReport::default();

        for name in order {
            let unit = match self.units.get_mut(&name) {
                Some(unit) => unit,
                None => continue,
            };
            match unit.evaluate_if_needed(ctx) {
                Ok(UnitEvaluation::Computed) => report.computed.push(name),
                Ok(UnitEvaluation::Skipped) => report.skipped.push(name),
                Ok(UnitEvaluation::Clean) => {}
                Err(error) => {
                    tracing::warn!("evaluating '{}' failed: {}", name, error);
                    report
                        .diagnostics
                        .push(EvaluationDiagnostic { unit: name, error });
                }
            }
        }
        report
    }
}
