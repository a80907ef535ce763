use gpfbm::core::models::image::ImageStack;
use gpfbm::core::models::transform::TransformData;
use gpfbm::engine::config::{AlignConfig, AlignConfigBuilder};
use gpfbm::workflows::align::Aligner;
use nalgebra::{DMatrix, Point2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

const SIZE: usize = 128;
const SPOTS: usize = 25;
const BACKGROUND: f64 = 10.0;
const SIGNAL: f64 = 150.0;
const SIGMA: f64 = 3.0;

fn spot_positions(rng: &mut StdRng) -> Vec<Point2<f64>> {
    let mut spots: Vec<Point2<f64>> = Vec::with_capacity(SPOTS);
    while spots.len() < SPOTS {
        let candidate = Point2::new(rng.gen_range(10.0..118.0), rng.gen_range(10.0..118.0));
        if spots.iter().all(|s| (s - candidate).norm() >= 15.0) {
            spots.push(candidate);
        }
    }
    spots
}

fn intensity(spots: &[Point2<f64>], p: &Point2<f64>) -> f64 {
    BACKGROUND
        + spots
            .iter()
            .map(|s| SIGNAL * (-(s - p).norm_squared() / (2.0 * SIGMA * SIGMA)).exp())
            .sum::<f64>()
}

/// A noisy frame whose pixel `x` shows the scene at `map(x + 0.5)`.
fn render(rng: &mut StdRng, spots: &[Point2<f64>], map: impl Fn(Point2<f64>) -> Point2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(SIZE, SIZE, |y, x| {
        let p = map(Point2::new(x as f64 + 0.5, y as f64 + 0.5));
        Poisson::new(intensity(spots, &p)).unwrap().sample(rng)
    })
}

fn mean_error(spots: &[Point2<f64>], correct: impl Fn(&Point2<f64>) -> Point2<f64>) -> f64 {
    spots.iter().map(|s| (correct(s) - s).norm()).sum::<f64>() / spots.len() as f64
}

struct Scene {
    reference: ImageStack,
    moving: ImageStack,
    landmarks: Vec<Point2<f64>>,
}

fn scene(seed: u64, truth: &TransformData) -> Scene {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut reference = Vec::new();
    let mut moving = Vec::new();
    let mut landmarks = Vec::new();
    for _ in 0..2 {
        let spots = spot_positions(&mut rng);
        reference.push(render(&mut rng, &spots, |p| p));
        moving.push(render(&mut rng, &spots, |p| truth.apply_inverse(&p)));
        landmarks.extend(spots);
    }
    Scene {
        reference: ImageStack::new(reference).unwrap(),
        moving: ImageStack::new(moving).unwrap(),
        landmarks,
    }
}

#[test]
fn alignment_reduces_landmark_error() {
    let mut truth = TransformData::new(SIZE as u32, SIZE as u32).unwrap();
    truth
        .set_all(
            Vector2::new(1.5, -2.0),
            Vector2::new(1.01, 0.995),
            Vector2::new(64.0, 64.0),
            0.02,
        )
        .unwrap();
    let scene = scene(2718, &truth);

    let config = AlignConfigBuilder::new()
        .enhancement(None)
        .coarse_step(2.0)
        .threshold(1e-5)
        .build()
        .unwrap();
    let mut aligner = Aligner::new(scene.reference, scene.moving, config).unwrap();

    let before = mean_error(&scene.landmarks, |s| truth.apply(s));

    aligner.align_cameras().unwrap();
    aligner.correct_aberrations().unwrap();
    let fitted = aligner.transform_data().clone();
    let after = mean_error(&scene.landmarks, |s| fitted.apply(&truth.apply(s)));

    assert!(
        after < 0.5 * before,
        "landmark error {after:.3} px after alignment, {before:.3} px before"
    );
}

#[test]
fn enhanced_images_still_align() {
    let mut truth = TransformData::new(SIZE as u32, SIZE as u32).unwrap();
    truth.set_translate(Vector2::new(2.0, -1.5)).unwrap();
    let scene = scene(31, &truth);

    let config = AlignConfigBuilder::new()
        .coarse_step(2.0)
        .threshold(1e-5)
        .build()
        .unwrap();
    assert_eq!(config.enhancement, AlignConfig::default().enhancement);
    let mut aligner = Aligner::new(scene.reference, scene.moving, config).unwrap();

    let before = mean_error(&scene.landmarks, |s| truth.apply(s));
    aligner.align_cameras().unwrap();
    let fitted = aligner.transform_data().clone();
    let after = mean_error(&scene.landmarks, |s| fitted.apply(&truth.apply(s)));

    assert!(
        after < 0.5 * before,
        "landmark error {after:.3} px after alignment, {before:.3} px before"
    );
}
