use crate::core::models::image::ImageStack;
use crate::core::models::transform::{TransformData, rigid_motion, scale_about_center};
use crate::engine::cancel::CancellationToken;
use crate::engine::config::{AlignConfig, SimplexConfig};
use crate::engine::error::EngineError;
use crate::engine::optimize::simplex::{NelderMead, SimplexOutcome};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tasks::enhancement::enhance_stack;
use crate::engine::tasks::pixel_energy::{alignment_weight, compute};
use nalgebra::{DVector, Matrix3, Vector2};
use tracing::{debug, info, instrument};

/// Registration of a second camera channel onto a reference channel.
///
/// Each frame of `channel1` is paired with the frame of `channel0` at the
/// same index. The registration is only updated when a fit succeeds.
pub struct Aligner<'a> {
    reference: ImageStack,
    moving: ImageStack,
    transform: TransformData,
    config: AlignConfig,
    cancel: CancellationToken,
    reporter: ProgressReporter<'a>,
}

impl<'a> Aligner<'a> {
    pub fn new(channel0: ImageStack, channel1: ImageStack, config: AlignConfig) -> Result<Self, EngineError> {
        if channel0.len() != channel1.len() {
            return Err(EngineError::ImageMismatch(format!(
                "{} reference frames but {} moving frames",
                channel0.len(),
                channel1.len()
            )));
        }
        let size0 = (channel0.width(), channel0.height());
        let size1 = (channel1.width(), channel1.height());
        if size0 != size1 {
            return Err(EngineError::ImageMismatch(format!(
                "reference frames are {}x{}, moving frames are {}x{}",
                size0.0, size0.1, size1.0, size1.1
            )));
        }

        let width = u32::try_from(size0.0)
            .map_err(|_| EngineError::ImageMismatch(format!("frame width {} is too large", size0.0)))?;
        let height = u32::try_from(size0.1)
            .map_err(|_| EngineError::ImageMismatch(format!("frame height {} is too large", size0.1)))?;
        let transform = TransformData::new(width, height)?;

        let (reference, moving) = match &config.enhancement {
            Some(enhancement) => {
                debug!(frames = channel0.len(), "Enhancing image pairs before alignment");
                (enhance_stack(&channel0, enhancement), enhance_stack(&channel1, enhancement))
            }
            None => (channel0, channel1),
        };

        Ok(Self {
            reference,
            moving,
            transform,
            config,
            cancel: CancellationToken::new(),
            reporter: ProgressReporter::new(),
        })
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter<'a>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The registration committed by the last successful fit.
    pub fn transform_data(&self) -> &TransformData {
        &self.transform
    }

    /// Replaces the current registration, e.g. with one loaded from disk.
    pub fn set_transform_data(&mut self, transform: TransformData) -> Result<(), EngineError> {
        let expected = self.transform.size();
        if transform.size() != expected {
            return Err(EngineError::ImageMismatch(format!(
                "transform is for {:?} images, frames are {:?}",
                transform.size(),
                expected
            )));
        }
        self.transform = transform;
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abandons the fit in flight. A stop issued while idle is cleared by the
    /// next fit.
    pub fn stop(&self) {
        info!("Stop requested for image alignment");
        self.cancel.cancel();
    }

    /// Objective value of the candidate forward transform `trf`.
    fn energy(&self, trf: &Matrix3<f64>) -> f64 {
        let Some(itrf) = trf.try_inverse() else {
            return f64::INFINITY;
        };
        match compute(
            &self.reference,
            &self.moving,
            &itrf,
            self.config.interpolation,
            Some(&self.cancel),
        ) {
            Some(energy) => alignment_weight(&energy, self.reference.width(), self.reference.height()),
            None => f64::INFINITY,
        }
    }

    fn run<F>(&self, phase: &'static str, config: &SimplexConfig, objective: F, start: DVector<f64>) -> Result<SimplexOutcome, EngineError>
    where
        F: Fn(&DVector<f64>) -> f64,
    {
        self.cancel.reset();
        self.reporter.report(Progress::PhaseStart { name: phase });
        let outcome = NelderMead::new(config)
            .with_cancellation(self.cancel.clone())
            .minimize(&objective, &start)
            .map_err(|e| EngineError::from_optimize(phase, e));
        self.reporter.report(Progress::PhaseFinish);
        outcome
    }

    /// Coarse registration: fits translation, rotation center and angle
    /// jointly, keeping the current scale.
    #[instrument(skip_all, name = "align_cameras")]
    pub fn align_cameras(&mut self) -> Result<&TransformData, EngineError> {
        let (width, height) = self.transform.size();
        let scale = scale_about_center(width, height, self.transform.scale());
        let (t, c) = (self.transform.translate(), self.transform.center());
        let start = DVector::from_vec(vec![t.x, t.y, c.x, c.y, self.transform.angle()]);

        let objective = |p: &DVector<f64>| {
            let trf = scale * rigid_motion(Vector2::new(p[0], p[1]), Vector2::new(p[2], p[3]), p[4]);
            self.energy(&trf)
        };
        let outcome = self.run("camera alignment", &self.config.coarse, objective, start)?;

        let p = &outcome.position;
        let mut next = self.transform.clone();
        next.set_all(
            Vector2::new(p[0], p[1]),
            next.scale(),
            Vector2::new(p[2], p[3]),
            p[4],
        )?;
        info!(
            tx = p[0],
            ty = p[1],
            angle = p[4],
            iterations = outcome.iterations,
            "Camera alignment converged"
        );
        self.transform = next;
        Ok(&self.transform)
    }

    /// Fine registration: fits the per-axis scale about the image center on
    /// top of the current rigid motion.
    #[instrument(skip_all, name = "correct_aberrations")]
    pub fn correct_aberrations(&mut self) -> Result<&TransformData, EngineError> {
        let (width, height) = self.transform.size();
        let rigid = rigid_motion(self.transform.translate(), self.transform.center(), self.transform.angle());
        let s = self.transform.scale();
        let start = DVector::from_vec(vec![s.x, s.y]);

        let objective = |p: &DVector<f64>| {
            let trf = scale_about_center(width, height, Vector2::new(p[0], p[1])) * rigid;
            self.energy(&trf)
        };
        let outcome = self.run("aberration correction", &self.config.fine, objective, start)?;

        let p = &outcome.position;
        let mut next = self.transform.clone();
        next.set_scale(Vector2::new(p[0], p[1]))?;
        info!(
            sx = p[0],
            sy = p[1],
            iterations = outcome.iterations,
            "Aberration correction converged"
        );
        self.transform = next;
        Ok(&self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::AlignConfigBuilder;
    use nalgebra::DMatrix;

    fn blob(w: usize, h: usize, cx: f64, cy: f64) -> DMatrix<f64> {
        DMatrix::from_fn(h, w, |y, x| {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            100.0 * (-(dx * dx + dy * dy) / 18.0).exp()
        })
    }

    fn stack(frames: Vec<DMatrix<f64>>) -> ImageStack {
        ImageStack::new(frames).unwrap()
    }

    fn plain_config() -> AlignConfig {
        AlignConfigBuilder::new()
            .enhancement(None)
            .coarse_step(2.0)
            .threshold(1e-6)
            .build()
            .unwrap()
    }

    #[test]
    fn mismatched_stacks_are_rejected() {
        let a = stack(vec![blob(16, 16, 8.0, 8.0)]);
        let b = stack(vec![blob(16, 12, 8.0, 6.0)]);
        assert!(matches!(
            Aligner::new(a.clone(), b, plain_config()),
            Err(EngineError::ImageMismatch(_))
        ));

        let c = stack(vec![blob(16, 16, 8.0, 8.0), blob(16, 16, 8.0, 8.0)]);
        assert!(matches!(
            Aligner::new(a, c, plain_config()),
            Err(EngineError::ImageMismatch(_))
        ));
    }

    #[test]
    fn new_aligner_starts_from_identity() {
        let a = stack(vec![blob(24, 20, 12.0, 10.0)]);
        let aligner = Aligner::new(a.clone(), a, AlignConfig::default()).unwrap();
        assert_eq!(aligner.transform_data().size(), (24, 20));
        assert_eq!(*aligner.transform_data().trf(), Matrix3::identity());
    }

    #[test]
    fn align_cameras_recovers_a_shift() {
        let reference = stack(vec![blob(40, 40, 18.0, 21.0)]);
        let moving = stack(vec![blob(40, 40, 21.0, 19.0)]);
        let mut aligner = Aligner::new(reference, moving, plain_config()).unwrap();

        let fitted = aligner.align_cameras().unwrap().clone();
        let mapped = fitted.apply_inverse(&nalgebra::Point2::new(18.0, 21.0));
        assert!((mapped.x - 21.0).abs() < 0.5, "x = {}", mapped.x);
        assert!((mapped.y - 19.0).abs() < 0.5, "y = {}", mapped.y);
    }

    #[test]
    fn cancelled_fit_keeps_previous_transform() {
        let reference = stack(vec![blob(32, 32, 16.0, 16.0)]);
        let moving = stack(vec![blob(32, 32, 18.0, 15.0)]);
        let aligner = Aligner::new(reference, moving, plain_config()).unwrap();
        let token = aligner.cancellation_token();
        let mut aligner = aligner.with_reporter(ProgressReporter::with_callback(Box::new(move |event: Progress| {
            if let Progress::PhaseStart { .. } = event {
                token.cancel();
            }
        })));
        let before = aligner.transform_data().clone();

        let err = aligner.align_cameras().unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(matches!(
            aligner.correct_aberrations(),
            Err(EngineError::Cancelled { .. })
        ));
        assert_eq!(aligner.transform_data(), &before);
    }

    #[test]
    fn stop_while_idle_is_cleared_by_the_next_fit() {
        let reference = stack(vec![blob(32, 32, 16.0, 16.0)]);
        let moving = stack(vec![blob(32, 32, 17.0, 16.0)]);
        let mut aligner = Aligner::new(reference, moving, plain_config()).unwrap();

        aligner.stop();
        assert!(aligner.align_cameras().is_ok());
        aligner.stop();
        assert!(aligner.correct_aberrations().is_ok());
    }

    #[test]
    fn foreign_transform_size_is_rejected() {
        let a = stack(vec![blob(16, 16, 8.0, 8.0)]);
        let mut aligner = Aligner::new(a.clone(), a, plain_config()).unwrap();
        let other = TransformData::new(8, 8).unwrap();
        assert!(aligner.set_transform_data(other).is_err());
        let same = TransformData::new(16, 16).unwrap();
        assert!(aligner.set_transform_data(same).is_ok());
    }
}
