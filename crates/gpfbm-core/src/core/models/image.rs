use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
    #[error("Image stack contains no frames")]
    Empty,

    #[error("Frame {index} has size {found:?}, expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Frame {index} is empty")]
    EmptyFrame { index: usize },

    #[error("Frame {index} contains non-finite pixels")]
    NonFinite { index: usize },
}

/// A sequence of equally sized frames from one channel.
///
/// Each frame is a `height × width` matrix of intensities, so pixel `(x, y)`
/// lives at `frame[(y, x)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
    frames: Vec<DMatrix<f64>>,
}

impl ImageStack {
    pub fn new(frames: Vec<DMatrix<f64>>) -> Result<Self, ImageError> {
        let first = frames.first().ok_or(ImageError::Empty)?;
        let expected = first.shape();
        for (index, frame) in frames.iter().enumerate() {
            if frame.is_empty() {
                return Err(ImageError::EmptyFrame { index });
            }
            if frame.shape() != expected {
                return Err(ImageError::SizeMismatch {
                    index,
                    expected,
                    found: frame.shape(),
                });
            }
            if frame.iter().any(|v| !v.is_finite()) {
                return Err(ImageError::NonFinite { index });
            }
        }
        Ok(Self { frames })
    }

    pub fn width(&self) -> usize {
        self.frames[0].ncols()
    }

    pub fn height(&self) -> usize {
        self.frames[0].nrows()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[DMatrix<f64>] {
        &self.frames
    }

    pub(crate) fn map_frames<F>(&self, f: F) -> Self
    where
        F: Fn(&DMatrix<f64>) -> DMatrix<f64> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        use rayon::prelude::*;

        #[cfg(feature = "parallel")]
        let frames = self.frames.par_iter().map(&f).collect();
        #[cfg(not(feature = "parallel"))]
        let frames = self.frames.iter().map(&f).collect();

        Self { frames }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_reports_dimensions() {
        let stack = ImageStack::new(vec![DMatrix::zeros(4, 6), DMatrix::zeros(4, 6)]).unwrap();
        assert_eq!((stack.width(), stack.height(), stack.len()), (6, 4, 2));
    }

    #[test]
    fn mismatched_or_empty_stacks_are_rejected() {
        assert_eq!(ImageStack::new(vec![]), Err(ImageError::Empty));
        assert!(matches!(
            ImageStack::new(vec![DMatrix::zeros(4, 6), DMatrix::zeros(6, 4)]),
            Err(ImageError::SizeMismatch { index: 1, .. })
        ));
        let mut bad = DMatrix::zeros(2, 2);
        bad[(1, 1)] = f64::INFINITY;
        assert_eq!(
            ImageStack::new(vec![bad]),
            Err(ImageError::NonFinite { index: 0 })
        );
    }
}
