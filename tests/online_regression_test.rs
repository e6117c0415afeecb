use metronome::services::online_regression::WRITABLE_VERSION;
use metronome::{Error, OnlineRegression, OnlineRegressionConfig, Prior};
use ndarray::{array, Array1};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn trained(prior: Prior, seed: u64) -> OnlineRegression {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut trainer = OnlineRegression::new(2, 5, prior, OnlineRegressionConfig::default()).unwrap();
    for k in 0..200 {
        let instance = Array1::random_using(5, Uniform::new(-1.0, 1.0), &mut rng);
        let actual = 3.0 * instance[0] - 2.0 * instance[3];
        trainer.train(k, Some("batch"), actual, instance.view()).unwrap();
    }
    trainer
}

#[test]
fn test_serialized_state_round_trips() {
    for prior in [
        Prior::Uniform,
        Prior::L1,
        Prior::L2 { scale: 2.0 },
        Prior::ElasticBand { alpha_by_lambda: 0.3 },
    ] {
        let trainer = trained(prior, 11);
        let bytes = trainer.to_bytes().unwrap();
        let restored =
            OnlineRegression::read_from(bytes.as_slice(), &OnlineRegressionConfig::default()).unwrap();
        assert_eq!(restored, trainer);
        assert_eq!(restored.step(), 200);
        assert_eq!(restored.prior(), prior);
    }
}

#[test]
fn test_record_starts_with_version() {
    let bytes = trained(Prior::L1, 3).to_bytes().unwrap();
    let version: i32 = bincode::deserialize(&bytes[..4]).unwrap();
    assert_eq!(version, WRITABLE_VERSION);
}

#[test]
fn test_other_versions_are_rejected() {
    let mut bytes = trained(Prior::L1, 4).to_bytes().unwrap();
    let other = bincode::serialize(&(WRITABLE_VERSION + 1)).unwrap();
    bytes[..4].copy_from_slice(&other);
    match OnlineRegression::read_from(bytes.as_slice(), &OnlineRegressionConfig::default()) {
        Err(Error::VersionMismatch { expected, found }) => {
            assert_eq!(expected, WRITABLE_VERSION);
            assert_eq!(found, WRITABLE_VERSION + 1);
        }
        other => panic!("expected a version mismatch, got {:?}", other),
    }
}

#[test]
fn test_truncated_record_is_an_error() {
    let bytes = trained(Prior::L1, 5).to_bytes().unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(matches!(
        OnlineRegression::read_from(truncated, &OnlineRegressionConfig::default()),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn test_copy_closes_and_matches() {
    let mut trainer = trained(Prior::L1, 6);
    let copy = trainer.copy();
    assert_eq!(copy, trainer);
    assert_eq!(copy.step(), 201);

    let mut other = OnlineRegression::new(2, 5, Prior::L1, OnlineRegressionConfig::default()).unwrap();
    other.copy_from(&trainer);
    assert_eq!(other, trainer);
}

#[test]
fn test_merging_partitioned_trainers() {
    let mut left = trained(Prior::Uniform, 7);
    let right = trained(Prior::Uniform, 8);
    let expected = (left.beta() + right.beta()) / 2.0;
    left.merge(&right, 2).unwrap();
    for (a, b) in left.beta().iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
    let probe = array![1.0, 0.0, 0.0, 0.0, 0.0];
    assert!(left.score(probe.view()) > 1.0);
}
