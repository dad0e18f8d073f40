use nn_engine::approximator;
use nn_engine::loader::training_batch;
use nn_engine::loss::cross_entropy;
use nn_engine::{Engine, EngineBuilder, Matrix};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TOLERANCE: f64 = 1e-3;

fn check_input_error(engine: &Engine, input_rows: usize, output_rows: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (input, expected) = training_batch(&mut rng, input_rows, output_rows, 4);

    let mut result = engine.run_forwards(&input).unwrap();
    engine.run_backwards(&mut result, &expected).unwrap();
    let analytic = result
        .input_error()
        .expect("input error is stored")
        .clone()
        .with_tolerance(TOLERANCE);

    let approximated = approximator::gradient(&input, |x| {
        cross_entropy(&expected, &engine.predict(x)?)
    })
    .unwrap();

    assert!(
        analytic.approx_eq(&approximated),
        "analytic:\n{analytic}\napproximated:\n{approximated}"
    );
}

fn check_weight_gradients(engine: &Engine, input_rows: usize, output_rows: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (input, expected) = training_batch(&mut rng, input_rows, output_rows, 3);

    let mut result = engine.run_forwards(&input).unwrap();
    engine.run_backwards(&mut result, &expected).unwrap();
    let analytic = engine.weight_gradients(&result).unwrap();
    assert_eq!(analytic.len(), engine.dense_layers().count());

    for (k, layer) in engine.dense_layers().enumerate() {
        let approximated = approximator::weight_gradient(layer.weights(), |w| {
            let mut perturbed = engine.clone();
            perturbed
                .dense_mut(k)
                .expect("layer exists")
                .set_weights(w.clone())?;
            cross_entropy(&expected, &perturbed.predict(&input)?)
        })
        .unwrap();

        let grad = analytic[k].clone().with_tolerance(TOLERANCE);
        assert!(
            grad.approx_eq(&approximated),
            "layer {k}: analytic:\n{grad}\napproximated:\n{approximated}"
        );
    }
}

#[test]
fn single_dense_softmax_input_error() {
    let engine = EngineBuilder::new(3)
        .unwrap()
        .dense(4)
        .unwrap()
        .softmax()
        .store_input_error(true)
        .build_with_seed(0)
        .unwrap();
    check_input_error(&engine, 3, 4, 1);
}

#[test]
fn stacked_dense_without_activation_input_error() {
    let engine = EngineBuilder::new(5)
        .unwrap()
        .dense(4)
        .unwrap()
        .dense(3)
        .unwrap()
        .dense(3)
        .unwrap()
        .softmax()
        .scale_initial_weights(0.5)
        .store_input_error(true)
        .build_with_seed(2)
        .unwrap();
    check_input_error(&engine, 5, 3, 3);
}

#[test]
fn relu_network_input_error() {
    let engine = EngineBuilder::new(4)
        .unwrap()
        .dense(8)
        .unwrap()
        .relu()
        .dense(6)
        .unwrap()
        .relu()
        .dense(3)
        .unwrap()
        .softmax()
        .scale_initial_weights(0.5)
        .store_input_error(true)
        .build_with_seed(4)
        .unwrap();
    check_input_error(&engine, 4, 3, 5);
}

#[test]
fn relu_network_weight_gradients() {
    let engine = EngineBuilder::new(4)
        .unwrap()
        .dense(5)
        .unwrap()
        .relu()
        .dense(3)
        .unwrap()
        .softmax()
        .scale_initial_weights(0.5)
        .build_with_seed(6)
        .unwrap();
    check_weight_gradients(&engine, 4, 3, 7);
}

#[test]
fn input_error_is_absent_unless_requested() {
    let engine = EngineBuilder::new(2)
        .unwrap()
        .dense(2)
        .unwrap()
        .relu()
        .dense(2)
        .unwrap()
        .softmax()
        .build_with_seed(0)
        .unwrap();
    let input = Matrix::from_vec(2, 1, vec![0.3, -0.2]).unwrap();
    let expected = Matrix::from_vec(2, 1, vec![0.0, 1.0]).unwrap();

    let mut result = engine.run_forwards(&input).unwrap();
    engine.run_backwards(&mut result, &expected).unwrap();
    assert!(result.input_error().is_none());
    assert_eq!(result.weight_gradients().count(), 2);
}

#[test]
fn leading_relu_gates_input_error_on_raw_input() {
    let engine = EngineBuilder::new(4)
        .unwrap()
        .relu()
        .dense(4)
        .unwrap()
        .softmax()
        .store_input_error(true)
        .build_with_seed(8)
        .unwrap();

    // Every input stays at least 0.2 away from the ReLU kink.
    let input = Matrix::from_fn(4, 3, |i| {
        let magnitude = 0.2 + 0.15 * (i % 5) as f64;
        if i % 3 == 0 {
            -magnitude
        } else {
            magnitude
        }
    });
    let expected = Matrix::from_coords(4, 3, |r, c| if r == c + 1 { 1.0 } else { 0.0 });

    let mut result = engine.run_forwards(&input).unwrap();
    engine.run_backwards(&mut result, &expected).unwrap();
    let analytic = result
        .input_error()
        .expect("input error is stored")
        .clone()
        .with_tolerance(TOLERANCE);

    input.for_each(|_, _, index, value| {
        if value < 0.0 {
            assert_eq!(analytic.get(index), 0.0);
        }
    });

    let approximated = approximator::gradient(&input, |x| {
        cross_entropy(&expected, &engine.predict(x)?)
    })
    .unwrap();
    assert!(
        analytic.approx_eq(&approximated),
        "analytic:\n{analytic}\napproximated:\n{approximated}"
    );
}
