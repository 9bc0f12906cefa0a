use glam::{Vec3, Vec4};
use kestrel_shadows::camera3d::{Camera3D, FrustumProvider};
use kestrel_shadows::cascades::{
    compute_cascades, split_planes, Cascade, CascadeError, CascadeSettings, CascadeSplitter, BIAS_MATRIX,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

const EPSILON: f32 = 1e-4;

#[derive(Deserialize)]
struct SplitGolden {
    near: f32,
    far: f32,
    split_count: u32,
    split_lambda: f32,
    planes: Vec<f32>,
}

fn camera(near: f32, far: f32) -> Camera3D {
    Camera3D::new(Vec3::new(0.0, 4.0, 12.0), Vec3::ZERO, 50.0_f32.to_radians(), 1.6, near, far)
}

fn light() -> Vec3 {
    Vec3::new(-1.4, -0.37, 0.63).normalize()
}

fn settings(split_count: u32, split_lambda: f32) -> CascadeSettings {
    CascadeSettings { split_count, split_lambda, ..CascadeSettings::default() }
}

#[test]
fn cascades_partition_the_clip_range() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..64 {
        let near = rng.gen_range(0.01..2.0);
        let far = near + rng.gen_range(1.0..500.0);
        let count = rng.gen_range(1..=8);
        let lambda = rng.gen_range(0.0..=1.0);
        let cascades = compute_cascades(&camera(near, far), light(), &settings(count, lambda)).expect("cascades");
        assert_eq!(cascades.len(), count as usize);
        assert_eq!(cascades[0].split_near, near);
        assert_eq!(cascades[cascades.len() - 1].split_far, far);
        for pair in cascades.windows(2) {
            assert_eq!(pair[0].split_far, pair[1].split_near, "cascades must be contiguous");
        }
        for cascade in &cascades {
            assert!(cascade.split_far > cascade.split_near, "{} !> {}", cascade.split_far, cascade.split_near);
        }
    }
}

#[test]
fn lambda_zero_is_uniform_and_one_is_logarithmic() {
    let (near, far) = (0.5, 200.0);
    let uniform = split_planes(4, near, far, 0.0);
    let logarithmic = split_planes(4, near, far, 1.0);
    for index in 0..=4 {
        let ratio = index as f32 / 4.0;
        let expected_uniform = near + ratio * (far - near);
        let expected_log = near * (far / near).powf(ratio);
        assert!((uniform[index] - expected_uniform).abs() <= EPSILON * far, "uniform split {index}");
        assert!((logarithmic[index] - expected_log).abs() <= EPSILON * far, "log split {index}");
    }
}

#[test]
fn splitter_output_matches_golden_fixture() {
    let golden: SplitGolden =
        serde_json::from_str(include_str!("fixtures/cascade_splits_golden.json")).expect("parse golden fixture");
    let mut splitter = CascadeSplitter::new(settings(golden.split_count, golden.split_lambda)).expect("splitter");
    let cascades = splitter.update(&camera(golden.near, golden.far), light()).expect("update");
    assert_eq!(cascades.len() + 1, golden.planes.len());
    for (cascade, bounds) in cascades.iter().zip(golden.planes.windows(2)) {
        assert!((cascade.split_near - bounds[0]).abs() < EPSILON, "near {} != {}", cascade.split_near, bounds[0]);
        assert!((cascade.split_far - bounds[1]).abs() < EPSILON, "far {} != {}", cascade.split_far, bounds[1]);
    }
    let planes = split_planes(golden.split_count, golden.near, golden.far, golden.split_lambda);
    let boundaries: Vec<f32> = cascades.iter().map(|cascade| cascade.split_near).chain([golden.far]).collect();
    assert_eq!(planes.to_vec(), boundaries);
}

#[test]
fn camera_looking_straight_down_gets_finite_cascades() {
    let camera = Camera3D::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 50.0_f32.to_radians(), 1.6, 0.1, 18.0);
    let cascades = compute_cascades(&camera, light(), &CascadeSettings::default()).expect("cascades");
    for cascade in &cascades {
        assert!(cascade.proj.is_finite() && cascade.shadow.is_finite());
        assert!(cascade.bounds_max.x - cascade.bounds_min.x > 0.0);
        assert!(cascade.bounds_max.y - cascade.bounds_min.y > 0.0);
        for corner in camera.clip_corners(cascade.split_near, cascade.split_far).to_array() {
            let uvz = cascade.shadow.project_point3(corner);
            assert!(uvz.to_array().iter().all(|v| (-EPSILON..=1.0 + EPSILON).contains(v)), "{uvz}");
        }
    }
}

#[test]
fn every_slice_corner_lands_inside_its_shadow_texture() {
    let camera = camera(0.1, 18.0);
    let cascades = compute_cascades(&camera, light(), &settings(4, 0.5)).expect("cascades");
    for (index, cascade) in cascades.iter().enumerate() {
        for corner in camera.clip_corners(cascade.split_near, cascade.split_far).to_array() {
            let uvz = cascade.shadow.project_point3(corner);
            for value in uvz.to_array() {
                assert!(
                    (-EPSILON..=1.0 + EPSILON).contains(&value),
                    "cascade {index}: corner {corner} maps to {uvz}"
                );
            }
        }
    }
}

#[test]
fn shadow_matrix_is_bias_times_projection_times_view() {
    let cascades = compute_cascades(&camera(0.1, 18.0), light(), &CascadeSettings::default()).expect("cascades");
    for cascade in &cascades {
        assert_eq!(cascade.shadow, BIAS_MATRIX * cascade.proj * cascade.view);
    }
    assert_eq!(BIAS_MATRIX * Vec4::new(-1.0, -1.0, -1.0, 1.0), Vec4::new(0.0, 0.0, 0.0, 1.0));
    assert_eq!(BIAS_MATRIX * Vec4::new(1.0, 1.0, 1.0, 1.0), Vec4::new(1.0, 1.0, 1.0, 1.0));
}

#[test]
fn zero_thickness_slice_still_produces_finite_matrices() {
    let camera = camera(0.1, 18.0);
    let corners = camera.clip_corners(5.0, 5.0);
    let cascade = Cascade::fit(&corners, light(), 5.0, 5.0, 10.0, 20.0);
    for matrix in [cascade.view, cascade.proj, cascade.shadow] {
        assert!(matrix.is_finite(), "matrix should be finite: {matrix}");
    }
    assert!(cascade.light_space_far > cascade.light_space_near);
}

#[test]
fn invalid_inputs_are_rejected() {
    let light = light();
    let err = compute_cascades(&camera(0.1, 18.0), light, &settings(0, 0.5)).unwrap_err();
    assert_eq!(err, CascadeError::ZeroSplitCount);
    let err = compute_cascades(&camera(0.1, 18.0), light, &settings(9, 0.5)).unwrap_err();
    assert_eq!(err, CascadeError::TooManySplits(9));
    let err = compute_cascades(&camera(0.1, 18.0), light, &settings(4, 1.5)).unwrap_err();
    assert_eq!(err, CascadeError::InvalidSplitLambda(1.5));
    let err = compute_cascades(&camera(5.0, 5.0), light, &settings(4, 0.5)).unwrap_err();
    assert!(matches!(err, CascadeError::InvalidClipRange { .. }));
    let err = compute_cascades(&camera(0.0, 5.0), light, &settings(4, 0.5)).unwrap_err();
    assert!(matches!(err, CascadeError::InvalidClipRange { .. }));
    let err = compute_cascades(&camera(0.1, 18.0), Vec3::new(1.0, 1.0, 0.0), &settings(4, 0.5)).unwrap_err();
    assert!(matches!(err, CascadeError::NonUnitLightDirection(_)));
    let err = compute_cascades(&camera(0.1, 18.0), Vec3::NEG_Y, &settings(4, 0.5)).unwrap_err();
    assert!(matches!(err, CascadeError::LightParallelToUp(_)));
    let padding = CascadeSettings { near_padding: -1.0, ..CascadeSettings::default() };
    let err = compute_cascades(&camera(0.1, 18.0), light, &padding).unwrap_err();
    assert!(matches!(err, CascadeError::InvalidPadding { .. }));
}

#[test]
fn splitter_keeps_previous_cascades_on_error() {
    let mut splitter = CascadeSplitter::new(settings(3, 0.5)).expect("splitter");
    splitter.update(&camera(0.1, 18.0), light()).expect("first update");
    assert!(splitter.count_changed());
    let before = splitter.cascades().to_vec();

    assert!(splitter.update(&camera(0.1, 18.0), Vec3::Y).is_err());
    assert_eq!(splitter.cascades(), before.as_slice());

    splitter.set_split_count(5).expect("split count");
    splitter.update(&camera(0.1, 18.0), light()).expect("second update");
    assert_eq!(splitter.cascades().len(), 5);
    assert!(splitter.count_changed());
    splitter.update(&camera(0.1, 18.0), light()).expect("third update");
    assert!(!splitter.count_changed());
    assert_eq!(splitter.cascade_for_depth(0.1), Some(0));
    assert_eq!(splitter.cascade_for_depth(18.0), Some(4));
    assert_eq!(splitter.cascade_for_depth(40.0), None);
}
