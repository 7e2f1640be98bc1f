//! Proptest strategies for certificates and points inside their domain.

use proptest::prelude::*;

use crate::certificate::{Activation, Certificate, CertificateShape, MlpShape, PolynomialShape};

/// Strategy for a small, well-formed certificate over `input_dim` inputs.
///
/// Learned variants have 1-6 units and at most one extra hidden layer;
/// polynomial variants have degree 1-3. Parameters lie in `[-1, 1]`.
pub fn arb_certificate(input_dim: usize) -> impl Strategy<Value = Certificate> {
    let learned = (1..=6usize, 0..=1usize, prop_oneof![
        Just(Activation::Tanh),
        (0.5f64..3.0).prop_map(|frequency| Activation::Sine { frequency }),
    ])
        .prop_map(move |(num_nl, num_hl, activation)| {
            CertificateShape::Learned(MlpShape {
                input_dim,
                num_nl,
                num_hl,
                activation,
            })
        });
    let polynomial = (1..=3u32).prop_map(move |degree| {
        CertificateShape::Polynomial(PolynomialShape { input_dim, degree })
    });
    prop_oneof![learned, polynomial].prop_flat_map(|shape| {
        let n = shape.num_params();
        proptest::collection::vec(-1.0f64..1.0, n..=n).prop_map(move |params| Certificate {
            shape: shape.clone(),
            params,
            time_varying: true,
        })
    })
}

/// Strategy for a point in `[-1, 1]^dim`.
pub fn arb_point(dim: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-1.0f64..1.0, dim..=dim)
}
