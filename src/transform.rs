//! Local and world matrices of transform nodes.
//!
//! Matrices use column vectors: a point is transformed as `m * p`, so the rightmost factor of a
//! product is applied first. Euler angles are in degrees.

use crate::evaluation::{EvalContext, Evaluate, EvaluationError, Value};
use glam::{DMat3, DMat4, DVec3};
use std::convert::TryFrom;

const DEGENERATE: f64 = 1e-12;
const GIMBAL: f64 = 1e-9;

/// Sequence in which the three axis rotations are applied. `Xyz` rotates about X first, then
/// Y, then Z.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RotateOrder {
    Xyz,
    Yzx,
    Zxy,
    Xzy,
    Yxz,
    Zyx,
}

impl Default for RotateOrder {
    fn default() -> Self {
        RotateOrder::Xyz
    }
}

impl RotateOrder {
    pub const ALL: [RotateOrder; 6] = [
        RotateOrder::Xyz,
        RotateOrder::Yzx,
        RotateOrder::Zxy,
        RotateOrder::Xzy,
        RotateOrder::Yxz,
        RotateOrder::Zyx,
    ];

    /// The order stored in a `rotateOrder` attribute.
    pub fn from_index(index: i64) -> Option<RotateOrder> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    pub fn index(self) -> usize {
        match self {
            RotateOrder::Xyz => 0,
            RotateOrder::Yzx => 1,
            RotateOrder::Zxy => 2,
            RotateOrder::Xzy => 3,
            RotateOrder::Yxz => 4,
            RotateOrder::Zyx => 5,
        }
    }

    /// Axis indices in application order.
    fn axes(self) -> [usize; 3] {
        match self {
            RotateOrder::Xyz => [0, 1, 2],
            RotateOrder::Yzx => [1, 2, 0],
            RotateOrder::Zxy => [2, 0, 1],
            RotateOrder::Xzy => [0, 2, 1],
            RotateOrder::Yxz => [1, 0, 2],
            RotateOrder::Zyx => [2, 1, 0],
        }
    }

    fn is_cyclic(self) -> bool {
        matches!(self, RotateOrder::Xyz | RotateOrder::Yzx | RotateOrder::Zxy)
    }
}

fn axis_rotation(axis: usize, radians: f64) -> DMat3 {
    match axis {
        0 => DMat3::from_rotation_x(radians),
        1 => DMat3::from_rotation_y(radians),
        _ => DMat3::from_rotation_z(radians),
    }
}

/// Rotation matrix of Euler angles given in degrees.
pub fn euler_to_matrix(degrees: DVec3, order: RotateOrder) -> DMat3 {
    let angles = degrees.to_array();
    order.axes().iter().fold(DMat3::IDENTITY, |acc, &axis| {
        axis_rotation(axis, angles[axis].to_radians()) * acc
    })
}

/// Euler angles in degrees of a proper rotation matrix. Inverse of `euler_to_matrix`; in
/// gimbal lock the last axis gets zero.
pub fn matrix_to_euler(rotation: &DMat3, order: RotateOrder) -> DVec3 {
    let [i, j, k] = order.axes();
    let s = if order.is_cyclic() { 1.0 } else { -1.0 };
    let r = |row: usize, col: usize| rotation.col(col)[row];

    let cos_beta = r(i, i).hypot(r(j, i));
    let beta = (-s * r(k, i)).atan2(cos_beta);
    let (alpha, gamma) = if cos_beta > GIMBAL {
        (
            (s * r(k, j)).atan2(r(k, k)),
            (s * r(j, i)).atan2(r(i, i)),
        )
    } else {
        ((-s * r(j, k)).atan2(r(j, j)), 0.0)
    };

    let mut out = [0.0; 3];
    out[i] = alpha.to_degrees();
    out[j] = beta.to_degrees();
    out[k] = gamma.to_degrees();
    DVec3::from(out)
}

/// Shear terms `(xy, xz, yz)` as an upper-triangular unit matrix.
fn shear_matrix(shear: DVec3) -> DMat4 {
    DMat4::from_cols(
        glam::DVec4::X,
        glam::DVec4::new(shear.x, 1.0, 0.0, 0.0),
        glam::DVec4::new(shear.y, shear.z, 1.0, 0.0),
        glam::DVec4::W,
    )
}

/// Channels of a transform node.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformInputs {
    pub translate: DVec3,
    /// Degrees.
    pub rotate: DVec3,
    pub scale: DVec3,
    pub rotate_order: RotateOrder,
    /// Degrees, always applied in xyz order.
    pub rotate_axis: DVec3,
    pub rotate_pivot: DVec3,
    pub rotate_pivot_translate: DVec3,
    pub scale_pivot: DVec3,
    pub scale_pivot_translate: DVec3,
    pub shear: DVec3,
    /// Degrees, always applied in xyz order. Joints put their orientation here.
    pub pre_rotation: Option<DVec3>,
    pub parent_offset: Option<DMat4>,
}

impl Default for TransformInputs {
    fn default() -> Self {
        TransformInputs {
            translate: DVec3::ZERO,
            rotate: DVec3::ZERO,
            scale: DVec3::ONE,
            rotate_order: RotateOrder::Xyz,
            rotate_axis: DVec3::ZERO,
            rotate_pivot: DVec3::ZERO,
            rotate_pivot_translate: DVec3::ZERO,
            scale_pivot: DVec3::ZERO,
            scale_pivot_translate: DVec3::ZERO,
            shear: DVec3::ZERO,
            pre_rotation: None,
            parent_offset: None,
        }
    }
}

impl TransformInputs {
    pub fn from_trs(translate: DVec3, rotate: DVec3, scale: DVec3, order: RotateOrder) -> Self {
        TransformInputs {
            translate,
            rotate,
            scale,
            rotate_order: order,
            ..Default::default()
        }
    }
}

/// Composes the local matrix of a transform.
///
/// From outermost to innermost: translate, rotate pivot translate, rotate pivot, rotation,
/// rotate axis, pre-rotation, inverse rotate pivot, scale pivot translate, scale pivot, shear,
/// scale, inverse scale pivot. A parent offset multiplies the result from the left.
pub fn build_local_matrix(inputs: &TransformInputs) -> DMat4 {
    let rotation = DMat4::from_mat3(euler_to_matrix(inputs.rotate, inputs.rotate_order));
    let rotate_axis = DMat4::from_mat3(euler_to_matrix(inputs.rotate_axis, RotateOrder::Xyz));
    let pre_rotation = inputs
        .pre_rotation
        .map(|r| DMat4::from_mat3(euler_to_matrix(r, RotateOrder::Xyz)))
        .unwrap_or(DMat4::IDENTITY);

    let local = DMat4::from_translation(inputs.translate)
        * DMat4::from_translation(inputs.rotate_pivot_translate)
        * DMat4::from_translation(inputs.rotate_pivot)
        * rotation
        * rotate_axis
        * pre_rotation
        * DMat4::from_translation(-inputs.rotate_pivot)
        * DMat4::from_translation(inputs.scale_pivot_translate)
        * DMat4::from_translation(inputs.scale_pivot)
        * shear_matrix(inputs.shear)
        * DMat4::from_scale(inputs.scale)
        * DMat4::from_translation(-inputs.scale_pivot);

    match inputs.parent_offset {
        Some(offset) => offset * local,
        None => local,
    }
}

/// Translation, Euler rotation in degrees and scale of a matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Decomposed {
    pub translate: DVec3,
    pub rotate: DVec3,
    pub scale: DVec3,
}

/// Splits `matrix` into translation, rotation and scale.
///
/// A reflection is folded into the scale of the axis with the largest scale (X before Y before
/// Z on ties). Near-zero basis columns are replaced by the matching standard axis, and
/// non-finite entries are read as zero, so the result is always finite.
pub fn decompose(matrix: &DMat4, order: RotateOrder) -> Decomposed {
    let mut cols = matrix.to_cols_array();
    for v in cols.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    let m = DMat4::from_cols_array(&cols);

    let translate = m.w_axis.truncate();
    let mut basis = [m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate()];
    let standard = [DVec3::X, DVec3::Y, DVec3::Z];
    let mut scale = [0.0; 3];

    for axis in 0..3 {
        let length = basis[axis].length();
        scale[axis] = length;
        basis[axis] = if length > DEGENERATE {
            basis[axis] / length
        } else {
            standard[axis]
        };
    }

    let mut rotation = DMat3::from_cols(basis[0], basis[1], basis[2]);
    if rotation.determinant() < 0.0 {
        let mut flip = 0;
        for axis in 1..3 {
            if scale[axis] > scale[flip] {
                flip = axis;
            }
        }
        scale[flip] = -scale[flip];
        basis[flip] = -basis[flip];
        rotation = DMat3::from_cols(basis[0], basis[1], basis[2]);
    }

    Decomposed {
        translate,
        rotate: matrix_to_euler(&rotation, order),
        scale: DVec3::from(scale),
    }
}

/// Evaluates a transform or joint node.
///
/// Reads the node's channels from the store, short names first, and writes `<node>.matrix`
/// and `<node>.worldMatrix`. The parent's world matrix is read from `<parent>.worldMatrix`,
/// so the parent has to be evaluated first.
#[derive(Debug, Clone)]
pub struct TransformUnit {
    node: String,
    parent: Option<String>,
    /// Degrees per angle unit of the scene.
    angle_to_degrees: f64,
}

impl TransformUnit {
    pub fn new<N: Into<String>>(node: N) -> Self {
        TransformUnit {
            node: node.into(),
            parent: None,
            angle_to_degrees: 1.0,
        }
    }

    pub fn with_parent<P: Into<String>>(mut self, parent: P) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_angle_unit(mut self, degrees_per_unit: f64) -> Self {
        self.angle_to_degrees = degrees_per_unit;
        self
    }

    /// Attribute names the unit reads, short and long.
    pub const CHANNELS: &'static [(&'static str, &'static str)] = &[
        ("t", "translate"),
        ("r", "rotate"),
        ("s", "scale"),
        ("ro", "rotateOrder"),
        ("ra", "rotateAxis"),
        ("rp", "rotatePivot"),
        ("rpt", "rotatePivotTranslate"),
        ("sp", "scalePivot"),
        ("spt", "scalePivotTranslate"),
        ("sh", "shear"),
        ("jo", "jointOrient"),
        ("opm", "offsetParentMatrix"),
    ];

    fn path(&self, attribute: &str) -> String {
        format!("{}.{}", self.node, attribute)
    }

    /// A compound channel with its per-axis children (`tx`, `translateX`, ...) layered over
    /// it. `None` when neither is set.
    fn vector(
        &self,
        ctx: &dyn EvalContext,
        short: &str,
        long: &str,
        default: DVec3,
    ) -> Result<Option<DVec3>, EvaluationError> {
        let mut found = false;
        let mut out = default;
        for name in &[short, long] {
            let path = self.path(name);
            if ctx.value(&path).is_some() {
                out = ctx.dvec3_or(&path, default)?;
                found = true;
                break;
            }
        }

        for (axis, (lower, upper)) in [("x", "X"), ("y", "Y"), ("z", "Z")].iter().enumerate() {
            for path in &[
                self.path(&format!("{}{}", short, lower)),
                self.path(&format!("{}{}", long, upper)),
            ] {
                if ctx.value(path).is_some() {
                    out[axis] = ctx.float(path)?;
                    found = true;
                    break;
                }
            }
        }
        Ok(if found { Some(out) } else { None })
    }

    fn vector_or(
        &self,
        ctx: &dyn EvalContext,
        short: &str,
        long: &str,
        default: DVec3,
    ) -> Result<DVec3, EvaluationError> {
        Ok(self.vector(ctx, short, long, default)?.unwrap_or(default))
    }

    fn rotate_order(&self, ctx: &dyn EvalContext) -> Result<RotateOrder, EvaluationError> {
        for name in &["ro", "rotateOrder"] {
            let path = self.path(name);
            if ctx.value(&path).is_some() {
                let index = ctx.float(&path)?;
                let order = if index.is_finite() && index.fract() == 0.0 {
                    RotateOrder::from_index(index as i64)
                } else {
                    None
                };
                return order.ok_or_else(|| {
                    tracing::warn!("{}: invalid rotate order {}", path, index);
                    EvaluationError::Custom(format!("{}: invalid rotate order {}", path, index))
                });
            }
        }
        Ok(RotateOrder::Xyz)
    }

    /// Reads every channel of the node from `ctx`.
    pub fn inputs(&self, ctx: &dyn EvalContext) -> Result<TransformInputs, EvaluationError> {
        let degrees = self.angle_to_degrees;
        let parent_offset = match ctx.value(&self.path("opm")) {
            Some(_) => Some(ctx.matrix_or(&self.path("opm"), DMat4::IDENTITY)?),
            None => match ctx.value(&self.path("offsetParentMatrix")) {
                Some(_) => Some(ctx.matrix_or(&self.path("offsetParentMatrix"), DMat4::IDENTITY)?),
                None => None,
            },
        };

        Ok(TransformInputs {
            translate: self.vector_or(ctx, "t", "translate", DVec3::ZERO)?,
            rotate: self.vector_or(ctx, "r", "rotate", DVec3::ZERO)? * degrees,
            scale: self.vector_or(ctx, "s", "scale", DVec3::ONE)?,
            rotate_order: self.rotate_order(ctx)?,
            rotate_axis: self.vector_or(ctx, "ra", "rotateAxis", DVec3::ZERO)? * degrees,
            rotate_pivot: self.vector_or(ctx, "rp", "rotatePivot", DVec3::ZERO)?,
            rotate_pivot_translate: self.vector_or(
                ctx,
                "rpt",
                "rotatePivotTranslate",
                DVec3::ZERO,
            )?,
            scale_pivot: self.vector_or(ctx, "sp", "scalePivot", DVec3::ZERO)?,
            scale_pivot_translate: self.vector_or(
                ctx,
                "spt",
                "scalePivotTranslate",
                DVec3::ZERO,
            )?,
            shear: self.vector_or(ctx, "sh", "shear", DVec3::ZERO)?,
            pre_rotation: self
                .vector(ctx, "jo", "jointOrient", DVec3::ZERO)?
                .map(|jo| jo * degrees),
            parent_offset,
        })
    }
}

impl Evaluate for TransformUnit {
    fn compute(&mut self, ctx: &mut dyn EvalContext) -> Result<(), EvaluationError> {
        let local = build_local_matrix(&self.inputs(&*ctx)?);
        let parent_world = match &self.parent {
            Some(parent) => ctx.matrix_or(&format!("{}.worldMatrix", parent), DMat4::IDENTITY)?,
            None => DMat4::IDENTITY,
        };

        ctx.set_value(&self.path("matrix"), Value::Matrix(local));
        ctx.set_value(&self.path("worldMatrix"), Value::Matrix(parent_world * local));
        Ok(())
    }
}
