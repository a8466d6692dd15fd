use approx::assert_abs_diff_eq;
use fastoverlap::analysis::{
    calculate_rotation_error, calculate_translation_error, permutation_error_rate,
};
use fastoverlap::config::ConfigFormat;
use fastoverlap::data::{ClusterGenerator, ConfigurationTransformer};
use fastoverlap::geometry::{angle_between, euler_zyz, PeriodicBox};
use fastoverlap::*;
use nalgebra::{Matrix3, Vector3};

fn test_config() -> Config {
    let mut config = Config::default();
    config.spherical.jmax = 8;
    config.periodic.cutoff = 6;
    config
}

fn cluster(seed: u64) -> PointSet {
    ClusterGenerator::new(seed)
        .with_min_separation(0.9)
        .ball(&[6, 4], 2.0)
        .unwrap()
}

fn periodic_configuration(seed: u64, cell: &PeriodicBox) -> PointSet {
    ClusterGenerator::new(seed)
        .with_min_separation(1.0)
        .periodic(&[5, 3], cell)
        .unwrap()
}

#[test]
fn test_spherical_self_alignment_is_exact() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let points = cluster(7);
    let result = aligner.align(&points, &points).unwrap();

    assert_abs_diff_eq!(result.distance, 0.0, epsilon = 1e-10);
    assert!((result.rotation - Matrix3::identity()).norm() < 1e-9);
    assert_eq!(result.permutation, (0..points.len()).collect::<Vec<_>>());
    assert!(!result.inverted);
}

#[test]
fn test_periodic_self_alignment_is_exact() {
    let cell = PeriodicBox::cubic(6.0).unwrap();
    let aligner = Aligner::periodic(cell, &test_config()).unwrap();
    let points = periodic_configuration(11, &cell);
    let result = aligner.align(&points, &points).unwrap();

    assert_abs_diff_eq!(result.distance, 0.0, epsilon = 1e-10);
    assert!(cell.minimum_image(result.translation).norm() < 1e-9);
    assert_eq!(result.permutation, (0..points.len()).collect::<Vec<_>>());
}

#[test]
fn test_spherical_recovers_rotation_translation_and_shuffle() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let points = cluster(23);
    let (moved, truth) = ConfigurationTransformer::new(5).perturb(&points, 3.0).unwrap();

    let result = aligner.align(&points, &moved).unwrap();

    assert!(result.distance < 1e-8, "distance {}", result.distance);
    assert!(calculate_rotation_error(&result, &truth) < 1e-6);
    assert!(calculate_translation_error(&result, &truth, None) < 1e-6);
    assert_abs_diff_eq!(permutation_error_rate(&result, &truth), 0.0);
    for (a, b) in result.aligned1.iter().zip(&result.aligned2) {
        assert!((a - b).norm() < 1e-6);
    }
}

#[test]
fn test_periodic_recovers_shift_and_shuffle() {
    let cell = PeriodicBox::cubic(6.0).unwrap();
    let aligner = Aligner::periodic(cell, &test_config()).unwrap();
    let points = periodic_configuration(3, &cell);
    let shift = Vector3::new(1.3, -0.7, 2.2);
    let shifted = ConfigurationTransformer::wrap(
        &ConfigurationTransformer::translate(&points, &shift).unwrap(),
        &cell,
    )
    .unwrap();
    let (shuffled, permutation) = ConfigurationTransformer::new(9)
        .shuffle_within_types(&shifted)
        .unwrap();

    let result = aligner.align(&points, &shuffled).unwrap();

    assert!(result.distance < 1e-8, "distance {}", result.distance);
    assert!(cell.minimum_image(result.translation - shift).norm() < 1e-6);
    assert_eq!(result.permutation, permutation);
    assert_abs_diff_eq!(result.recompute_distance(Some(&cell)), result.distance, epsilon = 1e-12);
}

#[test]
fn test_periodic_distance_ignores_box_multiples() {
    let cell = PeriodicBox::new([5.0, 6.0, 7.0]).unwrap();
    let aligner = Aligner::periodic(cell, &test_config()).unwrap();
    let points = periodic_configuration(17, &cell);
    let image = ConfigurationTransformer::translate(&points, &Vector3::new(5.0, -12.0, 14.0)).unwrap();

    let hungarian = aligner.hungarian(&points, &image).unwrap();
    assert_abs_diff_eq!(hungarian.distance, 0.0, epsilon = 1e-9);

    let result = aligner.align(&points, &image).unwrap();
    assert_abs_diff_eq!(result.distance, 0.0, epsilon = 1e-9);
}

#[test]
fn test_inversion_is_only_found_when_enabled() {
    let points = cluster(31);
    let rotation = euler_zyz(0.4, 1.1, -0.8);
    let mirrored = ConfigurationTransformer::rotate(
        &ConfigurationTransformer::invert(&points).unwrap(),
        &rotation,
    )
    .unwrap();

    let mut config = test_config();
    let proper = Aligner::spherical(&config).unwrap().align(&points, &mirrored).unwrap();
    assert!(!proper.inverted);
    assert_abs_diff_eq!(proper.rotation.determinant(), 1.0, epsilon = 1e-9);

    config.alignment.invert = true;
    let improper = Aligner::spherical(&config).unwrap().align(&points, &mirrored).unwrap();
    assert!(improper.inverted);
    assert!(improper.distance < 1e-8);
    assert!(improper.distance <= proper.distance);
    assert_abs_diff_eq!(improper.rotation.determinant(), -1.0, epsilon = 1e-9);
}

#[test]
fn test_hungarian_two_types() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let first = PointSet::from_coords(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], vec![0, 1]).unwrap();
    let second = PointSet::from_coords(&[[0.0, 0.5, 0.0], [2.0, 0.0, 0.0]], vec![0, 1]).unwrap();

    let result = aligner.hungarian(&first, &second).unwrap();
    assert_eq!(result.permutation, vec![0, 1]);
    assert_abs_diff_eq!(result.distance, 1.25, epsilon = 1e-12);
}

#[test]
fn test_hungarian_distance_scales_quadratically() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let first = cluster(41);
    let second = ConfigurationTransformer::new(2).rattle(&first, 0.3).unwrap();
    let k = 2.5;
    let scale = |p: &PointSet| p.with_positions(p.positions().iter().map(|x| x * k).collect()).unwrap();

    let base = aligner.hungarian(&first, &second).unwrap();
    let scaled = aligner.hungarian(&scale(&first), &scale(&second)).unwrap();
    assert_eq!(base.permutation, scaled.permutation);
    assert_abs_diff_eq!(scaled.distance, k * k * base.distance, epsilon = 1e-9);
}

#[test]
fn test_alignment_distance_scales_quadratically() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let first = cluster(47);
    let mut transformer = ConfigurationTransformer::new(3);
    let rotated = ConfigurationTransformer::rotate(&first, &transformer.random_rotation()).unwrap();
    let second = transformer.rattle(&rotated, 0.1).unwrap();
    let k = 2.0;
    let scale = |p: &PointSet| p.with_positions(p.positions().iter().map(|x| x * k).collect()).unwrap();

    let base = aligner.align(&first, &second).unwrap();
    let scaled = aligner.align(&scale(&first), &scale(&second)).unwrap();
    assert_eq!(base.permutation, scaled.permutation);
    assert!(angle_between(&base.rotation, &scaled.rotation) < 1e-6);
    assert_abs_diff_eq!(scaled.distance, k * k * base.distance, epsilon = 1e-8);
}

#[test]
fn test_alignment_never_worse_than_hungarian() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let first = cluster(43);
    let second = ConfigurationTransformer::new(8).rattle(&first, 0.2).unwrap();

    let hungarian = aligner.hungarian(&first, &second).unwrap();
    let result = aligner.align(&first, &second).unwrap();
    assert!(result.distance <= hungarian.distance + 1e-9);
    assert_abs_diff_eq!(result.rmsd(), (result.distance / first.len() as f64).sqrt());
}

#[test]
fn test_shape_and_dimension_errors() {
    let config = test_config();
    let aligner = Aligner::spherical(&config).unwrap();
    let three = PointSet::uniform(vec![Vector3::zeros(), Vector3::x(), Vector3::y()]).unwrap();
    let two = PointSet::uniform(vec![Vector3::zeros(), Vector3::x()]).unwrap();
    assert!(matches!(aligner.align(&three, &two), Err(AlignError::ShapeMismatch(_))));
    assert!(matches!(aligner.hungarian(&three, &two), Err(AlignError::ShapeMismatch(_))));

    let relabelled = PointSet::new(three.positions().to_vec(), vec![0, 0, 1]).unwrap();
    assert!(matches!(aligner.align(&three, &relabelled), Err(AlignError::ShapeMismatch(_))));

    let mut bad = config.clone();
    bad.spherical.jmax = 0;
    assert!(matches!(Aligner::spherical(&bad), Err(AlignError::DimensionError(_))));
    assert!(matches!(
        Aligner::from_config(Some([4.0, -1.0, 4.0]), &config),
        Err(AlignError::DimensionError(_))
    ));
}

#[test]
fn test_precomputed_coefficients_match_direct_alignment() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let first = cluster(51);
    let (second, _) = ConfigurationTransformer::new(4).perturb(&first, 1.0).unwrap();

    let k1 = aligner.coefficients(&first).unwrap();
    let k2 = aligner.coefficients(&second).unwrap();
    let precomputed = aligner
        .align_with_coefficients(&first, &second, Some((&k1, &k2)))
        .unwrap();
    let direct = aligner.align(&first, &second).unwrap();

    assert_eq!(precomputed.permutation, direct.permutation);
    assert_abs_diff_eq!(precomputed.distance, direct.distance, epsilon = 1e-12);

    let periodic = Aligner::periodic(PeriodicBox::cubic(6.0).unwrap(), &test_config()).unwrap();
    let wrong_mode = periodic.coefficients(&first).unwrap();
    assert!(matches!(
        aligner.align_with_coefficients(&first, &second, Some((&wrong_mode, &k2))),
        Err(AlignError::DimensionError(_))
    ));
}

#[test]
fn test_cached_alignment_reuses_coefficients() {
    let aligner = Aligner::spherical(&test_config()).unwrap();
    let reference = cluster(61);
    let mut transformer = ConfigurationTransformer::new(12);
    let mut cache = CoefficientCache::new();

    for _ in 0..3 {
        let (other, _) = transformer.perturb(&reference, 1.0).unwrap();
        let cached = aligner.align_cached(&mut cache, &reference, &other).unwrap();
        let direct = aligner.align(&reference, &other).unwrap();
        assert_abs_diff_eq!(cached.distance, direct.distance, epsilon = 1e-12);
        assert_eq!(cached.permutation, direct.permutation);
    }

    assert_eq!(cache.misses(), 4);
    assert_eq!(cache.hits(), 2);
    assert_eq!(cache.len(), 4);
}

#[test]
fn test_config_file_drives_aligner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlap.toml");
    let mut config = test_config();
    config.alignment.invert = true;
    config.save_to_file(&path, ConfigFormat::Toml).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.spherical.jmax, 8);
    assert!(loaded.alignment.invert);
    assert!(loaded.validate().is_ok());

    let points = cluster(71);
    let mirrored = ConfigurationTransformer::invert(&points).unwrap();
    let result = Aligner::spherical(&loaded).unwrap().align(&points, &mirrored).unwrap();
    assert!(result.inverted);
}
