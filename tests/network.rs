//! Graph assembly, propagation, and end-to-end training behavior.

use edgegrad::backend::Backend;
use edgegrad::error::NnError;
use edgegrad::layer::{Layer, Phase};
use edgegrad::layers::{
    Activation, ActivationKind, Conv2d, Dropout, ElementwiseAdd, FullyConnected, MaxPooling,
};
use edgegrad::params::ConnectionTable;
use edgegrad::tensors::Shape3d;
use edgegrad::loss::{Loss, Mse};
use edgegrad::network::Network;
use edgegrad::optimizers::{Adam, Sgd};
use edgegrad::tensors::{Batch, Float};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn fc(in_size: usize, out_size: usize) -> FullyConnected {
    FullyConnected::new(in_size, out_size, true, Backend::Internal).unwrap()
}

/// Fills a network's parameters with a deterministic pattern.
fn fill_params(net: &mut Network) {
    let mut rng = StdRng::seed_from_u64(99);
    net.init_weights(&mut rng);
}

#[test]
fn test_two_layer_chain_is_deterministic() {
    let build = || {
        let mut net = Network::sequential(vec![
            Box::new(fc(4, 3)) as Box<dyn Layer>,
            Box::new(fc(3, 2)),
        ])
        .unwrap();
        fill_params(&mut net);
        net
    };
    let input: Batch = vec![vec![1.0, 0.0, -1.0, 2.0]];

    let out_a = build().predict(&input).unwrap();
    let out_b = build().predict(&input).unwrap();
    assert_eq!(out_a, out_b, "identical runs must be bit-identical");
    assert_eq!(out_a[0].len(), 2);

    // flipping the parallelize flag must not change a single bit
    let mut serial = build();
    serial.set_parallelize(false);
    assert_eq!(serial.predict(&input).unwrap(), out_a);
}

#[test]
fn test_two_layer_chain_matches_hand_computation() {
    let mut net = Network::sequential(vec![
        Box::new(FullyConnected::new(4, 3, false, Backend::Internal).unwrap()) as Box<dyn Layer>,
        Box::new(FullyConnected::new(3, 2, false, Backend::Internal).unwrap()),
    ])
    .unwrap();

    // W[c * out_size + i] = 0.1 * (c + 1) + 0.01 * i, per layer
    let patterns: Vec<(usize, usize)> = vec![(4, 3), (3, 2)];
    for (layer, &(in_size, out_size)) in net.layers_mut().zip(patterns.iter()) {
        let weight = &mut layer.params_mut()[0].value;
        for c in 0..in_size {
            for i in 0..out_size {
                weight[c * out_size + i] = 0.1 * (c + 1) as Float + 0.01 * i as Float;
            }
        }
    }

    let input = vec![1.0, 0.0, -1.0, 2.0];
    let mut hidden = vec![0.0 as Float; 3];
    for i in 0..3 {
        for c in 0..4 {
            hidden[i] += (0.1 * (c + 1) as Float + 0.01 * i as Float) * input[c];
        }
    }
    let mut expected = vec![0.0 as Float; 2];
    for i in 0..2 {
        for c in 0..3 {
            expected[i] += (0.1 * (c + 1) as Float + 0.01 * i as Float) * hidden[c];
        }
    }

    let out = net.predict(&vec![input]).unwrap();
    for (o, e) in out[0].iter().zip(expected.iter()) {
        assert!((o - e).abs() < 1e-6, "{o} vs {e}");
    }
}

#[test]
fn test_shape_mismatch_rejected_at_assembly() {
    let mut net = Network::new();
    let a = net.add_layer(Box::new(fc(4, 3)));
    let b = net.add_layer(Box::new(fc(4, 2)));
    let err = net.connect(a, b).unwrap_err();
    assert!(matches!(err, NnError::ShapeMismatch { .. }), "{err}");
}

#[test]
fn test_spatial_ports_compare_exact_geometry() {
    // 5x5x1 conv with a 3x3 window produces 3x3x2; a consumer declaring
    // different spatial geometry must be rejected even when the element
    // counts happen to match
    let conv = |in_shape| {
        Conv2d::new(
            in_shape,
            3,
            2,
            1,
            true,
            ConnectionTable::all(),
            Backend::Internal,
        )
        .unwrap()
    };
    let mut net = Network::new();
    let a = net.add_layer(Box::new(conv(Shape3d::new(5, 5, 1))));
    let wrong = net.add_layer(Box::new(conv(Shape3d::new(6, 3, 1))));
    let err = net.connect(a, wrong).unwrap_err();
    assert!(matches!(err, NnError::ShapeMismatch { .. }), "{err}");

    let mut net = Network::new();
    let a = net.add_layer(Box::new(conv(Shape3d::new(5, 5, 1))));
    let b = net.add_layer(Box::new(conv(Shape3d::new(3, 3, 2))));
    net.connect(a, b).unwrap();
    net.assemble().unwrap();

    // a flat consumer only needs the element count to agree
    let mut net = Network::new();
    let a = net.add_layer(Box::new(conv(Shape3d::new(5, 5, 1))));
    let dense = net.add_layer(Box::new(fc(18, 4)));
    net.connect(a, dense).unwrap();
    net.assemble().unwrap();
    fill_params(&mut net);
    let out = net.predict(&vec![vec![0.5; 25]]).unwrap();
    assert_eq!(out[0].len(), 4);
}

#[test]
fn test_conv_pool_dense_chain_trains() {
    // 5x5x1 -> conv 3x3 (2 channels, 3x3x2) -> 2x2 max-pool stride 1
    // (2x2x2) -> dense 8->3; pooling geometry must satisfy the spatial
    // edge checks and its backward must route gradients through the graph
    let mut net = Network::sequential(vec![
        Box::new(
            Conv2d::new(
                Shape3d::new(5, 5, 1),
                3,
                2,
                1,
                true,
                ConnectionTable::all(),
                Backend::Internal,
            )
            .unwrap(),
        ) as Box<dyn Layer>,
        Box::new(MaxPooling::new(Shape3d::new(3, 3, 2), 2, 1).unwrap()),
        Box::new(fc(8, 3)),
    ])
    .unwrap();
    fill_params(&mut net);
    net.set_parallelize(false);

    let input: Batch = vec![(0..25).map(|i| (i as Float) * 0.04 - 0.5).collect()];
    let out = net.predict(&input).unwrap();
    assert_eq!(out[0].len(), 3);

    let target: Batch = vec![vec![0.0, 0.0, 0.0]];
    let mut opt = Sgd::new(0.1);
    let first = net.train_step(&input, &target, &Mse, &mut opt).unwrap();
    let mut last = first;
    for _ in 0..20 {
        last = net.train_step(&input, &target, &Mse, &mut opt).unwrap();
    }
    assert!(last.is_finite() && last < first, "{first} -> {last}");
}

#[test]
fn test_cycle_rejected_at_assembly() {
    let mut net = Network::new();
    let entry = net.add_layer(Box::new(fc(2, 2)));
    let add = net.add_layer(Box::new(ElementwiseAdd::new(2)));
    let looper = net.add_layer(Box::new(fc(2, 2)));
    let sink = net.add_layer(Box::new(fc(2, 1)));

    net.connect(entry, add).unwrap();
    net.connect(looper, add).unwrap();
    net.connect(add, looper).unwrap();
    net.connect(add, sink).unwrap();

    let err = net.assemble().unwrap_err();
    assert!(matches!(err, NnError::Cycle(_)), "{err}");
    // a failed assembly leaves no callable graph behind
    assert!(net.predict(&vec![vec![0.0, 0.0]]).is_err());
}

#[test]
fn test_unsupported_backend_fails_at_construction() {
    let err = FullyConnected::new(4, 2, true, Backend::Cblas).unwrap_err();
    assert!(matches!(err, NnError::UnsupportedBackend { .. }));
}

#[test]
fn test_fan_out_gradients_are_summed() {
    // one dense layer feeding both ports of an elementwise add, so the
    // effective function is 2 * (Wx + b)
    let mut net = Network::new();
    let dense = net.add_layer(Box::new(FullyConnected::new(2, 2, false, Backend::Internal).unwrap()));
    let add = net.add_layer(Box::new(ElementwiseAdd::new(2)));
    net.connect(dense, add).unwrap();
    net.connect(dense, add).unwrap();
    net.assemble().unwrap();
    fill_params(&mut net);
    net.set_parallelize(false);

    let input: Batch = vec![vec![1.0, 2.0]];
    let prediction = net.predict(&input).unwrap();
    let target: Batch = vec![vec![0.0, 0.0]];
    let seed = Mse.gradient(&prediction, &target);

    // zero learning rate keeps the weights frozen so the gradient is
    // inspectable afterwards
    let mut frozen = Sgd::new(0.0);
    net.train_step(&input, &target, &Mse, &mut frozen).unwrap();

    let dense_layer = net.layers().next().unwrap();
    assert_eq!(dense_layer.layer_type(), "fully-connected");
    let dw = &dense_layer.params()[0].grad;

    // dW[c * 2 + i] = fan_out_factor * seed[i] * x[c], fan-out factor 2
    for c in 0..2 {
        for i in 0..2 {
            let expected = 2.0 * seed[0][i] * input[0][c];
            let got = dw[c * 2 + i];
            assert!(
                (got - expected).abs() < 1e-5,
                "dW[{c},{i}]: {got} vs {expected}"
            );
        }
    }
}

#[test]
fn test_predict_runs_dropout_in_test_phase() {
    let mut net = Network::sequential(vec![
        Box::new(Dropout::new(4, 0.5, 3).unwrap()) as Box<dyn Layer>,
    ])
    .unwrap();
    let out = net.predict(&vec![vec![2.0, 4.0, 6.0, 8.0]]).unwrap();
    assert_eq!(out[0], vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_adam_keeps_state_per_parameter() {
    // two equally sized layers receiving different gradients must not
    // share Adam moments; train a few steps and check their weights
    // diverge from each other
    let mut net = Network::sequential(vec![
        Box::new(fc(2, 2)) as Box<dyn Layer>,
        Box::new(Activation::new(ActivationKind::TanH, 2)),
        Box::new(fc(2, 2)),
    ])
    .unwrap();
    fill_params(&mut net);
    net.set_parallelize(false);

    let input: Batch = vec![vec![0.5, -1.0]];
    let target: Batch = vec![vec![1.0, -1.0]];
    let mut opt = Adam::new(0.05);
    for _ in 0..5 {
        net.train_step(&input, &target, &Mse, &mut opt).unwrap();
    }
    let weights: Vec<Vec<Float>> = net
        .layers()
        .filter(|l| l.layer_type() == "fully-connected")
        .map(|l| l.params()[0].value.clone())
        .collect();
    assert_eq!(weights.len(), 2);
    assert_ne!(weights[0], weights[1]);
}

#[test]
fn test_xor_training_reduces_loss() {
    let mut net = Network::sequential(vec![
        Box::new(fc(2, 8)) as Box<dyn Layer>,
        Box::new(Activation::new(ActivationKind::TanH, 8)),
        Box::new(fc(8, 1)),
    ])
    .unwrap();
    let mut rng = StdRng::seed_from_u64(1234);
    net.init_weights(&mut rng);
    net.set_parallelize(false);

    let input: Batch = vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ];
    let target: Batch = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];

    let mut opt = Adam::new(0.05);
    let first = net.train_step(&input, &target, &Mse, &mut opt).unwrap();
    let mut last = first;
    for _ in 0..300 {
        last = net.train_step(&input, &target, &Mse, &mut opt).unwrap();
    }
    assert!(
        last < first * 0.25,
        "loss did not decrease: {first} -> {last}"
    );
}

#[test]
fn test_train_step_returns_mse_of_forward_pass() {
    let mut net = Network::sequential(vec![Box::new(fc(2, 2)) as Box<dyn Layer>]).unwrap();
    fill_params(&mut net);
    net.set_parallelize(false);

    let input: Batch = vec![vec![1.0, -1.0]];
    let target: Batch = vec![vec![0.0, 0.0]];

    net.set_phase(Phase::Train);
    let prediction = net.predict(&input).unwrap();
    let expected = Mse.loss(&prediction, &target);

    let mut frozen = Sgd::new(0.0);
    let reported = net.train_step(&input, &target, &Mse, &mut frozen).unwrap();
    assert!((reported - expected).abs() < 1e-6);
}
