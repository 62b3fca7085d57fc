//! # mayafile - A crate for reading Maya scene files and evaluating their dependency graph
//!
//! ## Example
//!
//! ```ignore
//! use mayafile::{build_evaluation_graph, AttributeStore, HandlerRegistry, SceneGraph, Value};
//!
//! /// Prints the world position of every transform
//! fn main() {
//!     let scene = SceneGraph::from_path("scene.ma").unwrap();
//!
//!     let mut graph = build_evaluation_graph(&scene, &mut HandlerRegistry::default());
//!     let mut store = AttributeStore::new();
//!     store.seed_from_scene(&scene);
//!     graph.evaluate(&mut store);
//!
//!     for node in scene.nodes().filter(|n| n.node_type == "transform") {
//!         let world = store.value(&format!("{}.worldMatrix", node.name()));
//!         if let Some(Value::Matrix(m)) = world {
//!             println!("\"{}\" at {:?}", node.name(), m.w_axis.truncate());
//!         }
//!     }
//! }
//! ```
//!
//! ## The scene file
//!
//! A scene comes in two dialects. The text dialect (`.ma`) is a list of commands separated by
//! `;`, each one creating a node, setting one of its attributes or connecting two attributes:
//!
//! ```ignore
//! createNode transform -n "pCube1";
//!     setAttr ".t" -type "double3" 0 5 0 ;
//! createNode addDoubleLinear -n "offset";
//! connectAttr "offset.o" "pCube1.tx";
//! ```
//!
//! The binary dialect (`.mb`) stores the same information in nested tagged chunks: `FOR4`/`FOR8`
//! forms containing a `CREA` chunk that creates a node followed by one chunk per attribute value.
//! Both dialects are read into the same [`SceneGraph`]. Nothing in the input is dropped: commands
//! and chunks the readers don't understand are kept as [`RawStatement`]s, and every chunk of a
//! binary document stays available with its offsets and printable content hints.
//!
//! An attribute is addressed by a *plug*, `node.attribute`, where the attribute part can be a
//! nested path like `iog[0].og[1].gid`. Nodes are addressed by name, or by a `|`-separated path
//! when several nodes share a name. The [`plug`] module has the helpers to take plugs apart and
//! [`ConnectionResolver`] answers which plugs feed which.
//!
//! ## Evaluation
//!
//! [`build_evaluation_graph`] turns a scene into an [`EvaluationGraph`] with one unit per node. A
//! [`HandlerRegistry`] decides what each node type computes: transforms and joints compose their
//! local and world matrices, a few utility nodes do arithmetic, and everything else is passed
//! through so dirtiness still flows across it. Units read and write values in an
//! [`EvalContext`], by default an [`AttributeStore`] seeded from the scene.
//!
//! Evaluation is incremental. Marking a unit dirty marks everything downstream of it dirty,
//! and `EvaluationGraph::evaluate` only computes dirty units. Units with attribute-level
//! dependencies also skip their computation when the attribute paths that changed are none of
//! theirs. A unit whose computation fails is reported in the pass's [`EvaluationReport`] and
//! the units that don't depend on it run anyway.
//!
//! ### Errors
//!
//! Reading never panics on bad input. A document that fails to parse gives a [`ParseError`]
//! with the line and column, or byte offset, where reading stopped; [`parsers::ParseOutcome`]
//! keeps the part of the scene read up to that point. Cycles in the dependency graph are
//! reported by `EvaluationGraph::cycle_nodes` instead of being treated as errors.
//!
//! ### Limitations
//!
//! This crate does not write scene files and does not evaluate animation curves, deformers or
//! expressions. Compressed files have to be decompressed before being passed to
//! `SceneGraph::from_data`, see the `print_scene` demo for how.

pub mod config;
pub mod connections;
pub mod evaluation;
pub mod handlers;
pub mod parsers;
pub mod plug;
pub mod scene;
pub mod schedule;
pub mod transform;

pub use config::ReaderOptions;
pub use connections::ConnectionResolver;
pub use evaluation::{
    AttributeStore, EvalContext, Evaluate, EvaluationError, EvaluationGraph, EvaluationReport,
    EvaluationUnit, Value,
};
pub use handlers::{build_evaluation_graph, HandlerRegistry, NodeHandler};
pub use parsers::{DecodeError, ParseError};
pub use scene::{
    Attribute, ConnectionRecord, NodeRecord, RawStatement, SceneError, SceneGraph, Token,
};
pub use transform::{build_local_matrix, decompose, RotateOrder, TransformInputs};
