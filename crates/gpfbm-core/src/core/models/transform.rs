use nalgebra::{Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("Image size must be non-zero, got {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Non-finite transform parameter: {0}")]
    NonFinite(&'static str),

    #[error("Transform matrix is singular and cannot be inverted")]
    Singular,
}

/// Scaling about the image center, `A` in the composition `A·B·C·D`.
#[rustfmt::skip]
pub fn scale_about_center(width: u32, height: u32, scale: Vector2<f64>) -> Matrix3<f64> {
    Matrix3::new(
        scale.x, 0.0, 0.5 * (1.0 - scale.x) * width as f64,
        0.0, scale.y, 0.5 * (1.0 - scale.y) * height as f64,
        0.0, 0.0, 1.0,
    )
}

/// Rotation by `angle` about `center` followed by a shift of `translate`,
/// the `B·C·D` part of the composition. Positive angles turn the x axis
/// towards the y axis.
#[rustfmt::skip]
pub fn rigid_motion(translate: Vector2<f64>, center: Vector2<f64>, angle: f64) -> Matrix3<f64> {
    let (sin, cos) = angle.sin_cos();
    let shift_back = Matrix3::new(
        1.0, 0.0, translate.x + center.x,
        0.0, 1.0, translate.y + center.y,
        0.0, 0.0, 1.0,
    );
    let rotation = Matrix3::new(
        cos, -sin, 0.0,
        sin, cos, 0.0,
        0.0, 0.0, 1.0,
    );
    let to_center = Matrix3::new(
        1.0, 0.0, -center.x,
        0.0, 1.0, -center.y,
        0.0, 0.0, 1.0,
    );
    shift_back * rotation * to_center
}

/// Registration of one camera channel onto another.
///
/// The forward matrix `trf` maps channel-1 pixel coordinates onto channel-0,
/// and its inverse `itrf` locates a channel-0 pixel inside channel-1. Both
/// are recomputed whenever a parameter changes, so they can never be observed
/// out of sync with the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformData {
    width: u32,
    height: u32,
    translate: Vector2<f64>,
    scale: Vector2<f64>,
    center: Vector2<f64>,
    angle: f64,
    trf: Matrix3<f64>,
    itrf: Matrix3<f64>,
}

impl TransformData {
    /// The identity registration for images of the given size, rotating about
    /// the image center.
    pub fn new(width: u32, height: u32) -> Result<Self, TransformError> {
        if width == 0 || height == 0 {
            return Err(TransformError::InvalidSize { width, height });
        }
        Ok(Self {
            width,
            height,
            translate: Vector2::zeros(),
            scale: Vector2::new(1.0, 1.0),
            center: Vector2::new(0.5 * width as f64, 0.5 * height as f64),
            angle: 0.0,
            trf: Matrix3::identity(),
            itrf: Matrix3::identity(),
        })
    }

    fn check_finite(name: &'static str, values: &[f64]) -> Result<(), TransformError> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(TransformError::NonFinite(name))
        }
    }

    /// Recomputes `trf = A·B·C·D` and its inverse from the parameters.
    fn update(&mut self) -> Result<(), TransformError> {
        let trf = scale_about_center(self.width, self.height, self.scale)
            * rigid_motion(self.translate, self.center, self.angle);
        let itrf = trf.try_inverse().ok_or(TransformError::Singular)?;
        self.trf = trf;
        self.itrf = itrf;
        Ok(())
    }

    /// Applies `change` to a copy and only commits it when the resulting
    /// matrix is invertible.
    fn modify(&mut self, change: impl FnOnce(&mut Self)) -> Result<(), TransformError> {
        let mut next = self.clone();
        change(&mut next);
        next.update()?;
        *self = next;
        Ok(())
    }

    pub fn set_translate(&mut self, translate: Vector2<f64>) -> Result<(), TransformError> {
        Self::check_finite("translate", translate.as_slice())?;
        self.modify(|t| t.translate = translate)
    }

    pub fn set_scale(&mut self, scale: Vector2<f64>) -> Result<(), TransformError> {
        Self::check_finite("scale", scale.as_slice())?;
        self.modify(|t| t.scale = scale)
    }

    pub fn set_rotation(&mut self, center: Vector2<f64>, angle: f64) -> Result<(), TransformError> {
        Self::check_finite("rotate", &[center.x, center.y, angle])?;
        self.modify(|t| {
            t.center = center;
            t.angle = angle;
        })
    }

    /// Sets every parameter at once, recomputing the matrices a single time.
    pub fn set_all(
        &mut self,
        translate: Vector2<f64>,
        scale: Vector2<f64>,
        center: Vector2<f64>,
        angle: f64,
    ) -> Result<(), TransformError> {
        Self::check_finite("translate", translate.as_slice())?;
        Self::check_finite("scale", scale.as_slice())?;
        Self::check_finite("rotate", &[center.x, center.y, angle])?;
        self.modify(|t| {
            t.translate = translate;
            t.scale = scale;
            t.center = center;
            t.angle = angle;
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
    pub fn translate(&self) -> Vector2<f64> {
        self.translate
    }
    pub fn scale(&self) -> Vector2<f64> {
        self.scale
    }
    pub fn center(&self) -> Vector2<f64> {
        self.center
    }
    pub fn angle(&self) -> f64 {
        self.angle
    }
    pub fn trf(&self) -> &Matrix3<f64> {
        &self.trf
    }
    pub fn itrf(&self) -> &Matrix3<f64> {
        &self.itrf
    }

    pub fn apply(&self, p: &Point2<f64>) -> Point2<f64> {
        self.trf.transform_point(p)
    }

    pub fn apply_inverse(&self, p: &Point2<f64>) -> Point2<f64> {
        self.itrf.transform_point(p)
    }
}

fn to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// Plain-data form of [`TransformData`] for persistence, with row-major
/// matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub width: u32,
    pub height: u32,
    pub translate: [f64; 2],
    pub scale: [f64; 2],
    /// `[center_x, center_y, angle]`.
    pub rotate: [f64; 3],
    pub trf: [[f64; 3]; 3],
    pub itrf: [[f64; 3]; 3],
}

impl From<&TransformData> for TransformRecord {
    fn from(t: &TransformData) -> Self {
        Self {
            width: t.width,
            height: t.height,
            translate: [t.translate.x, t.translate.y],
            scale: [t.scale.x, t.scale.y],
            rotate: [t.center.x, t.center.y, t.angle],
            trf: to_rows(&t.trf),
            itrf: to_rows(&t.itrf),
        }
    }
}

impl TryFrom<TransformRecord> for TransformData {
    type Error = TransformError;

    /// Matrices stored in the record are ignored and rebuilt from the
    /// parameters.
    fn try_from(record: TransformRecord) -> Result<Self, Self::Error> {
        let mut t = TransformData::new(record.width, record.height)?;
        t.set_all(
            Vector2::from(record.translate),
            Vector2::from(record.scale),
            Vector2::new(record.rotate[0], record.rotate[1]),
            record.rotate[2],
        )?;
        Ok(t)
    }
}
