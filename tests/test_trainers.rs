//! Integration tests: trainer contract across all algorithm families

use flowtrain::prelude::*;
use ndarray::{Array1, Array2};

fn iris() -> (Array2<f64>, Array1<f64>) {
    let source = SampleDatasets::new();
    let container = source
        .load(&DatasetRef::Sample("iris".to_string()), None)
        .unwrap();
    (
        container.feature_matrix().unwrap(),
        container.target_vector().unwrap(),
    )
}

fn binary_iris() -> (Array2<f64>, Array1<f64>) {
    let (x, y) = iris();
    let keep: Vec<usize> = y
        .iter()
        .enumerate()
        .filter(|(_, &label)| label < 2.0)
        .map(|(i, _)| i)
        .collect();
    let xb = Array2::from_shape_fn((keep.len(), x.ncols()), |(i, j)| x[[keep[i], j]]);
    let yb = Array1::from_iter(keep.iter().map(|&i| y[i]));
    (xb, yb)
}

fn regression_data() -> (Array2<f64>, Array1<f64>) {
    let source = SampleDatasets::new();
    let container = source
        .load(&DatasetRef::Sample("linear".to_string()), None)
        .unwrap();
    (
        container.feature_matrix().unwrap(),
        container.target_vector().unwrap(),
    )
}

fn small(params: &[(&str, i64)]) -> HyperParams {
    let mut p = HyperParams::new();
    for (k, v) in params {
        p.set(*k, *v);
    }
    p
}

/// Build one fitted trainer per family for round-trip checks.
fn fitted_trainers() -> Vec<Box<dyn Trainer>> {
    use flowtrain::training::*;

    let (x, y) = iris();
    let (xb, yb) = binary_iris();
    let (xr, yr) = regression_data();
    let mut trainers: Vec<Box<dyn Trainer>> = Vec::new();

    let mut t = LinearRegressionTrainer::new(TaskKind::Regression, HyperParams::new()).unwrap();
    t.fit(&xr, Some(&yr)).unwrap();
    trainers.push(Box::new(t));

    let mut t = LogisticRegressionTrainer::new(TaskKind::Classification, small(&[("max_iter", 150)])).unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = DecisionTreeTrainer::new(TaskKind::Classification, small(&[("max_depth", 6)])).unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = RandomForestTrainer::new(TaskKind::Classification, small(&[("n_estimators", 12)])).unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = GradientBoostingTrainer::new(
        TaskKind::Classification,
        small(&[("n_estimators", 15), ("max_depth", 3)]),
    )
    .unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = XgboostTrainer::new(
        TaskKind::Classification,
        small(&[("n_estimators", 15), ("max_depth", 3)]),
        false,
    )
    .unwrap();
    t.fit(&xb, Some(&yb)).unwrap();
    trainers.push(Box::new(t));

    let mut t = NeuralNetworkTrainer::new(
        TaskKind::Classification,
        small(&[("hidden_units", 16), ("max_iter", 150)]),
    )
    .unwrap();
    t.fit(&x, Some(&y)).unwrap();
    trainers.push(Box::new(t));

    let mut t = KMeansTrainer::new(TaskKind::Clustering, small(&[("n_clusters", 3)])).unwrap();
    t.fit(&x, None).unwrap();
    trainers.push(Box::new(t));

    let mut t = PcaTrainer::new(TaskKind::DimensionalityReduction, HyperParams::new()).unwrap();
    t.fit(&x, None).unwrap();
    trainers.push(Box::new(t));

    trainers
}

#[test]
fn test_save_load_round_trip_all_families() {
    let (x, _) = iris();
    let (xb, _) = binary_iris();
    let (xr, _) = regression_data();

    for trainer in fitted_trainers() {
        let x_test = match trainer.name() {
            "linear_regression" => &xr,
            "xgboost" => &xb,
            _ => &x,
        };

        let before = trainer.predict(x_test).unwrap();
        let dir = tempfile::tempdir().unwrap();
        trainer.save(dir.path()).unwrap();

        let restored = load_trainer(dir.path()).unwrap();
        assert_eq!(restored.name(), trainer.name());
        assert_eq!(
            restored.hyperparameters(),
            trainer.hyperparameters(),
            "{}: hyperparameters must survive the round trip",
            trainer.name()
        );

        let after = restored.predict(x_test).unwrap();
        match (before, after) {
            (ModelOutput::Labels(a), ModelOutput::Labels(b)) => {
                for (u, v) in a.iter().zip(b.iter()) {
                    assert!(
                        (u - v).abs() < 1e-9,
                        "{}: prediction changed across save/load: {} vs {}",
                        trainer.name(),
                        u,
                        v
                    );
                }
            }
            (ModelOutput::Embedding(a), ModelOutput::Embedding(b)) => {
                for (u, v) in a.iter().zip(b.iter()) {
                    assert!((u - v).abs() < 1e-9, "{}: embedding changed", trainer.name());
                }
            }
            _ => panic!("{}: output shape changed across save/load", trainer.name()),
        }
    }
}

#[test]
fn test_predict_before_fit_fails_everywhere() {
    use flowtrain::training::*;
    let x = ndarray::array![[1.0, 2.0, 3.0, 4.0]];

    let trainers: Vec<Box<dyn Trainer>> = vec![
        Box::new(LinearRegressionTrainer::new(TaskKind::Regression, HyperParams::new()).unwrap()),
        Box::new(
            LogisticRegressionTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap(),
        ),
        Box::new(KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap()),
        Box::new(DecisionTreeTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap()),
        Box::new(RandomForestTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap()),
        Box::new(
            GradientBoostingTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap(),
        ),
        Box::new(XgboostTrainer::new(TaskKind::Classification, HyperParams::new(), false).unwrap()),
        Box::new(NeuralNetworkTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap()),
        Box::new(KMeansTrainer::new(TaskKind::Clustering, HyperParams::new()).unwrap()),
        Box::new(PcaTrainer::new(TaskKind::DimensionalityReduction, HyperParams::new()).unwrap()),
    ];

    for trainer in trainers {
        let err = trainer.predict(&x).unwrap_err();
        assert!(
            err.to_string().contains("not fitted"),
            "{}: expected not-fitted state error, got: {}",
            trainer.name(),
            err
        );
    }
}

#[test]
fn test_fit_with_mismatched_lengths_fails() {
    use flowtrain::training::*;
    let x = ndarray::array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
    let y = ndarray::array![0.0, 1.0];

    let mut trainer = DecisionTreeTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
    let err = trainer.fit(&x, Some(&y)).unwrap_err();
    assert!(err.to_string().contains("length"));
}

#[test]
fn test_negative_counts_fail_at_construction() {
    use flowtrain::training::*;

    let mut p = HyperParams::new();
    p.set("n_estimators", -5i64);
    assert!(RandomForestTrainer::new(TaskKind::Classification, p.clone()).is_err());
    assert!(XgboostTrainer::new(TaskKind::Classification, p, false).is_err());

    let mut p = HyperParams::new();
    p.set("n_clusters", -2i64);
    assert!(KMeansTrainer::new(TaskKind::Clustering, p).is_err());

    let mut p = HyperParams::new();
    p.set("n_neighbors", -1i64);
    assert!(KnnTrainer::new(TaskKind::Classification, p).is_err());
}

#[test]
fn test_probability_invariant_on_iris() {
    use flowtrain::training::*;
    let (x, y) = iris();

    let mut trainers: Vec<Box<dyn Trainer>> = vec![
        Box::new(
            LogisticRegressionTrainer::new(
                TaskKind::Classification,
                small(&[("max_iter", 150)]),
            )
            .unwrap(),
        ),
        Box::new(KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap()),
        Box::new(
            DecisionTreeTrainer::new(TaskKind::Classification, small(&[("max_depth", 5)])).unwrap(),
        ),
        Box::new(
            RandomForestTrainer::new(TaskKind::Classification, small(&[("n_estimators", 10)]))
                .unwrap(),
        ),
        Box::new(
            GradientBoostingTrainer::new(
                TaskKind::Classification,
                small(&[("n_estimators", 10)]),
            )
            .unwrap(),
        ),
        Box::new(
            NeuralNetworkTrainer::new(
                TaskKind::Classification,
                small(&[("hidden_units", 16), ("max_iter", 100)]),
            )
            .unwrap(),
        ),
    ];

    for trainer in &mut trainers {
        trainer.fit(&x, Some(&y)).unwrap();
        let proba = trainer.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 3, "{}: one column per class", trainer.name());
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "{}: row sums to {}",
                trainer.name(),
                sum
            );
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }
}

#[test]
fn test_feature_importance_invariant() {
    use flowtrain::training::*;
    let (x, y) = iris();

    // Tree and bagged-forest importances are normalized
    for mut trainer in [
        Box::new(DecisionTreeTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap())
            as Box<dyn Trainer>,
        Box::new(
            RandomForestTrainer::new(TaskKind::Classification, small(&[("n_estimators", 10)]))
                .unwrap(),
        ),
    ] {
        trainer.fit(&x, Some(&y)).unwrap();
        let imp = trainer.feature_importance().unwrap();
        assert_eq!(imp.len(), 4);
        assert!(imp.iter().all(|&v| v >= 0.0));
        assert!(
            (imp.sum() - 1.0).abs() < 1e-6,
            "{}: importances should sum to 1",
            trainer.name()
        );
    }

    // Boosting importances are raw non-negative gains
    let mut trainer = GradientBoostingTrainer::new(
        TaskKind::Classification,
        small(&[("n_estimators", 10)]),
    )
    .unwrap();
    trainer.fit(&x, Some(&y)).unwrap();
    let imp = trainer.feature_importance().unwrap();
    assert_eq!(imp.len(), 4);
    assert!(imp.iter().all(|&v| v >= 0.0));
    assert!(imp.sum() > 0.0);
}

#[test]
fn test_hyperparameter_update_requires_refit() {
    use flowtrain::training::*;
    let (x, y) = iris();

    let mut trainer =
        DecisionTreeTrainer::new(TaskKind::Classification, small(&[("max_depth", 10)])).unwrap();
    trainer.fit(&x, Some(&y)).unwrap();
    let before = trainer.predict(&x).unwrap().into_labels().unwrap();

    let mut updates = HyperParams::new();
    updates.set("max_depth", 2i64);
    trainer.update_hyperparameters(updates).unwrap();

    // No refit: output unchanged
    let unchanged = trainer.predict(&x).unwrap().into_labels().unwrap();
    assert_eq!(before, unchanged);

    // After refit: the shallower tree changes at least one prediction
    trainer.fit(&x, Some(&y)).unwrap();
    let after = trainer.predict(&x).unwrap().into_labels().unwrap();
    let changed = before
        .iter()
        .zip(after.iter())
        .filter(|(a, b)| (**a - **b).abs() > 1e-9)
        .count();
    assert!(changed > 0, "shrinking max_depth 10 -> 2 should change predictions");
}

#[test]
fn test_invalid_update_leaves_params_untouched() {
    use flowtrain::training::*;
    let mut trainer =
        RandomForestTrainer::new(TaskKind::Classification, small(&[("n_estimators", 10)])).unwrap();

    let mut updates = HyperParams::new();
    updates.set("n_estimators", -1i64);
    assert!(trainer.update_hyperparameters(updates).is_err());
    assert_eq!(
        trainer.hyperparameters().get("n_estimators").and_then(|v| v.as_i64()),
        Some(10)
    );
}

#[test]
fn test_logistic_regression_on_iris_split() {
    use flowtrain::training::*;

    // 80/20 split of the 150-row iris set
    let source = SampleDatasets::new();
    let container = source
        .load(&DatasetRef::Sample("iris".to_string()), None)
        .unwrap();
    let (train, test) = container.train_test_split(0.2, 7).unwrap();

    let mut trainer =
        LogisticRegressionTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
    trainer
        .fit(
            &train.feature_matrix().unwrap(),
            Some(&train.target_vector().unwrap()),
        )
        .unwrap();

    let preds = trainer
        .predict(&test.feature_matrix().unwrap())
        .unwrap()
        .into_labels()
        .unwrap();
    assert_eq!(preds.len(), 30);
    assert!(preds.iter().all(|&p| p == 0.0 || p == 1.0 || p == 2.0));

    let y_test = test.target_vector().unwrap();
    let correct = preds
        .iter()
        .zip(y_test.iter())
        .filter(|(p, t)| (**p - **t).abs() < 1e-9)
        .count();
    let accuracy = correct as f64 / preds.len() as f64;
    assert!(accuracy > 0.5, "iris accuracy should beat 0.5, got {}", accuracy);
}

#[test]
fn test_trained_metadata_is_stamped() {
    use flowtrain::training::*;
    let (x, y) = iris();

    let mut trainer = KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
    assert!(trainer.metadata().trained_at.is_none());

    trainer.fit(&x, Some(&y)).unwrap();
    let meta = trainer.metadata();
    assert!(meta.trained_at.is_some());
    assert_eq!(meta.n_samples, 150);
    assert_eq!(meta.n_features, 4);
}
