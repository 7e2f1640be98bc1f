//! Certificate representations: a learned MLP and a bounded-degree
//! polynomial behind one evaluation contract.
//!
//! Both variants evaluate a [`Jet`] (value plus input gradient) in forward
//! mode over any [`Scalar`], taking the parameters as scalars too. That one
//! routine drives numeric evaluation (`f64`), training (tape variables, so
//! the loss can be differentiated through the input gradient), and the
//! verifier's symbolic encoding (`SmtTerm`).
//!
//! Inputs are ordered `[t, x_1, .., x_n]` for time-varying certificates and
//! `[x_1, .., x_n]` otherwise.

use certreach_smt::terms::SmtTerm;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scalar::Scalar;

/// Finite-difference step used by [`Certificate::hessian`].
const HESSIAN_STEP: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepresentationKind {
    Learned,
    Polynomial,
}

impl std::fmt::Display for RepresentationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepresentationKind::Learned => f.write_str("learned"),
            RepresentationKind::Polynomial => f.write_str("polynomial"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Sine { frequency: f64 },
}

impl Activation {
    /// Activation value and its derivative at `z`.
    fn apply<S: Scalar>(&self, z: &S) -> (S, S) {
        match self {
            Activation::Tanh => {
                let a = z.tanh();
                let slope = a.constant(1.0) - a.square();
                (a, slope)
            }
            Activation::Sine { frequency } => {
                let wz = z.scale(*frequency);
                (wz.sin(), wz.cos().scale(*frequency))
            }
        }
    }
}

/// Fully connected network: `num_hl + 1` hidden layers of width `num_nl`
/// followed by a linear scalar output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpShape {
    pub input_dim: usize,
    pub num_nl: usize,
    pub num_hl: usize,
    pub activation: Activation,
}

impl MlpShape {
    /// `(fan_in, fan_out)` of every affine layer, output layer last.
    pub fn layers(&self) -> Vec<(usize, usize)> {
        let mut dims = vec![(self.input_dim, self.num_nl)];
        for _ in 0..self.num_hl {
            dims.push((self.num_nl, self.num_nl));
        }
        dims.push((self.num_nl, 1));
        dims
    }

    /// Parameters are laid out per layer: weights row-major `(out, in)`,
    /// then biases.
    pub fn num_params(&self) -> usize {
        self.layers().iter().map(|(i, o)| i * o + o).sum()
    }
}

/// Polynomial of total degree at most `degree` in the monomial basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialShape {
    pub input_dim: usize,
    pub degree: u32,
}

impl PolynomialShape {
    /// Exponent vectors in graded order (constant term first).
    pub fn monomials(&self) -> Vec<Vec<u32>> {
        if self.input_dim == 0 {
            return vec![Vec::new()];
        }
        let mut out = Vec::new();
        let mut cur = vec![0; self.input_dim];
        for total in 0..=self.degree {
            compositions(total, 0, &mut cur, &mut out);
        }
        out
    }

    pub fn num_params(&self) -> usize {
        self.monomials().len()
    }
}

fn compositions(remaining: u32, axis: usize, cur: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if axis + 1 == cur.len() {
        cur[axis] = remaining;
        out.push(cur.clone());
        cur[axis] = 0;
        return;
    }
    for k in (0..=remaining).rev() {
        cur[axis] = k;
        compositions(remaining - k, axis + 1, cur, out);
    }
    cur[axis] = 0;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CertificateShape {
    Learned(MlpShape),
    Polynomial(PolynomialShape),
}

impl CertificateShape {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            CertificateShape::Learned(_) => RepresentationKind::Learned,
            CertificateShape::Polynomial(_) => RepresentationKind::Polynomial,
        }
    }

    pub fn input_dim(&self) -> usize {
        match self {
            CertificateShape::Learned(s) => s.input_dim,
            CertificateShape::Polynomial(s) => s.input_dim,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            CertificateShape::Learned(s) => s.num_params(),
            CertificateShape::Polynomial(s) => s.num_params(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CertificateError {
    #[error("expected {expected} parameters, got {actual}")]
    ParamCount { expected: usize, actual: usize },
    #[error("non-finite parameter at index {0}")]
    NonFinite(usize),
    #[error("certificate needs at least one input and one unit")]
    EmptyShape,
}

/// Value and input gradient of a certificate at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Jet<S> {
    pub value: S,
    pub gradient: Vec<S>,
}

impl<S> Jet<S> {
    /// `dV/dt`, when the first input is time.
    pub fn time_derivative(&self, time_varying: bool) -> Option<&S> {
        if time_varying {
            self.gradient.first()
        } else {
            None
        }
    }

    /// Gradient with respect to the state coordinates only.
    pub fn state_gradient(&self, time_varying: bool) -> &[S] {
        if time_varying {
            &self.gradient[1..]
        } else {
            &self.gradient
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub shape: CertificateShape,
    pub params: Vec<f64>,
    pub time_varying: bool,
}

impl Certificate {
    /// Learned variant with seeded Xavier-uniform weights and zero biases.
    pub fn learned<R: Rng>(shape: MlpShape, time_varying: bool, rng: &mut R) -> Self {
        let mut params = Vec::with_capacity(shape.num_params());
        for (fan_in, fan_out) in shape.layers() {
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            params.extend((0..fan_in * fan_out).map(|_| rng.gen_range(-bound..=bound)));
            params.extend(std::iter::repeat(0.0).take(fan_out));
        }
        Self {
            shape: CertificateShape::Learned(shape),
            params,
            time_varying,
        }
    }

    /// Polynomial variant with all coefficients zero.
    pub fn polynomial(shape: PolynomialShape, time_varying: bool) -> Self {
        let params = vec![0.0; shape.num_params()];
        Self {
            shape: CertificateShape::Polynomial(shape),
            params,
            time_varying,
        }
    }

    pub fn from_params(
        shape: CertificateShape,
        time_varying: bool,
        params: Vec<f64>,
    ) -> Result<Self, CertificateError> {
        let cert = Self {
            shape,
            params,
            time_varying,
        };
        cert.check()?;
        Ok(cert)
    }

    /// Parameter count matches the shape and every parameter is finite.
    pub fn check(&self) -> Result<(), CertificateError> {
        let empty = match &self.shape {
            CertificateShape::Learned(s) => s.input_dim == 0 || s.num_nl == 0,
            CertificateShape::Polynomial(s) => s.input_dim == 0,
        };
        if empty {
            return Err(CertificateError::EmptyShape);
        }
        let expected = self.shape.num_params();
        if self.params.len() != expected {
            return Err(CertificateError::ParamCount {
                expected,
                actual: self.params.len(),
            });
        }
        if let Some(i) = self.params.iter().position(|p| !p.is_finite()) {
            return Err(CertificateError::NonFinite(i));
        }
        Ok(())
    }

    pub fn kind(&self) -> RepresentationKind {
        self.shape.kind()
    }

    pub fn input_dim(&self) -> usize {
        self.shape.input_dim()
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Value and input gradient with the parameters supplied as scalars of
    /// the same kind as the input.
    pub fn jet_with<S: Scalar>(&self, params: &[S], input: &[S]) -> Jet<S> {
        debug_assert_eq!(params.len(), self.shape.num_params());
        debug_assert_eq!(input.len(), self.input_dim());
        match &self.shape {
            CertificateShape::Learned(shape) => mlp_jet(shape, params, input),
            CertificateShape::Polynomial(shape) => poly_jet(shape, params, input),
        }
    }

    pub fn jet(&self, input: &[f64]) -> Jet<f64> {
        self.jet_with(&self.params, input)
    }

    /// Symbolic jet with the parameters embedded as real literals.
    pub fn symbolic_jet(&self, input: &[SmtTerm]) -> Jet<SmtTerm> {
        let params: Vec<SmtTerm> = self.params.iter().map(|&p| SmtTerm::real(p)).collect();
        self.jet_with(&params, input)
    }

    pub fn evaluate(&self, input: &[f64]) -> f64 {
        self.jet(input).value
    }

    pub fn gradient(&self, input: &[f64]) -> Vec<f64> {
        self.jet(input).gradient
    }

    pub fn time_derivative(&self, input: &[f64]) -> Option<f64> {
        self.jet(input)
            .time_derivative(self.time_varying)
            .copied()
    }

    /// Hessian with respect to the inputs by central differences of the
    /// exact gradient.
    pub fn hessian(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let n = input.len();
        let mut h = vec![vec![0.0; n]; n];
        let mut shifted = input.to_vec();
        for j in 0..n {
            shifted[j] = input[j] + HESSIAN_STEP;
            let plus = self.gradient(&shifted);
            shifted[j] = input[j] - HESSIAN_STEP;
            let minus = self.gradient(&shifted);
            shifted[j] = input[j];
            for i in 0..n {
                h[i][j] = (plus[i] - minus[i]) / (2.0 * HESSIAN_STEP);
            }
        }
        // Symmetrize away finite-difference noise.
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (h[i][j] + h[j][i]);
                h[i][j] = avg;
                h[j][i] = avg;
            }
        }
        h
    }
}

fn mlp_jet<S: Scalar>(shape: &MlpShape, params: &[S], input: &[S]) -> Jet<S> {
    let ctx = &input[0];
    let n = input.len();
    let layers = shape.layers();
    let last = layers.len() - 1;

    let mut h: Vec<S> = input.to_vec();
    // `None` stands for the identity Jacobian of the input layer.
    let mut dh: Option<Vec<Vec<S>>> = None;
    let mut offset = 0;

    for (l, &(fan_in, fan_out)) in layers.iter().enumerate() {
        let weights = &params[offset..offset + fan_in * fan_out];
        let biases = &params[offset + fan_in * fan_out..offset + fan_in * fan_out + fan_out];
        offset += fan_in * fan_out + fan_out;

        let mut next_h = Vec::with_capacity(fan_out);
        let mut next_dh = Vec::with_capacity(fan_out);
        for j in 0..fan_out {
            let row = &weights[j * fan_in..(j + 1) * fan_in];
            let z = row
                .iter()
                .zip(&h)
                .fold(biases[j].clone(), |acc, (w, hi)| acc + w.clone() * hi.clone());
            let dz: Vec<S> = match &dh {
                None => row.to_vec(),
                Some(dh) => (0..n)
                    .map(|k| {
                        row.iter()
                            .zip(dh)
                            .fold(ctx.constant(0.0), |acc, (w, dhi)| {
                                acc + w.clone() * dhi[k].clone()
                            })
                    })
                    .collect(),
            };
            if l == last {
                next_h.push(z);
                next_dh.push(dz);
            } else {
                let (a, slope) = shape.activation.apply(&z);
                next_h.push(a);
                next_dh.push(dz.into_iter().map(|d| d * slope.clone()).collect());
            }
        }
        h = next_h;
        dh = Some(next_dh);
    }

    let gradient = dh
        .and_then(|mut rows| rows.pop())
        .unwrap_or_default();
    let value = h.swap_remove(0);
    Jet { value, gradient }
}

fn poly_jet<S: Scalar>(shape: &PolynomialShape, params: &[S], input: &[S]) -> Jet<S> {
    let ctx = &input[0];
    let degree = shape.degree as usize;
    let powers: Vec<Vec<S>> = input
        .iter()
        .map(|x| {
            let mut p = vec![x.constant(1.0)];
            for e in 1..=degree {
                let next = p[e - 1].clone() * x.clone();
                p.push(next);
            }
            p
        })
        .collect();

    let mut value = ctx.constant(0.0);
    let mut gradient: Vec<S> = (0..input.len()).map(|_| ctx.constant(0.0)).collect();
    for (coef, exps) in params.iter().zip(shape.monomials()) {
        let term = exps
            .iter()
            .enumerate()
            .fold(coef.clone(), |acc, (i, &e)| acc * powers[i][e as usize].clone());
        value = value + term;
        for (k, &ek) in exps.iter().enumerate() {
            if ek == 0 {
                continue;
            }
            let partial = exps.iter().enumerate().fold(
                coef.scale(ek as f64),
                |acc, (i, &e)| {
                    let e = if i == k { e - 1 } else { e };
                    acc * powers[i][e as usize].clone()
                },
            );
            gradient[k] = gradient[k].clone() + partial;
        }
    }
    Jet { value, gradient }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn mlp(activation: Activation, num_hl: usize) -> Certificate {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        Certificate::learned(
            MlpShape {
                input_dim: 3,
                num_nl: 8,
                num_hl,
                activation,
            },
            true,
            &mut rng,
        )
    }

    fn finite_difference(cert: &Certificate, x: &[f64]) -> Vec<f64> {
        let h = 1e-6;
        (0..x.len())
            .map(|i| {
                let mut p = x.to_vec();
                let mut m = x.to_vec();
                p[i] += h;
                m[i] -= h;
                (cert.evaluate(&p) - cert.evaluate(&m)) / (2.0 * h)
            })
            .collect()
    }

    #[test]
    fn mlp_parameter_layout() {
        let shape = MlpShape {
            input_dim: 3,
            num_nl: 64,
            num_hl: 0,
            activation: Activation::Tanh,
        };
        assert_eq!(shape.layers(), vec![(3, 64), (64, 1)]);
        assert_eq!(shape.num_params(), 3 * 64 + 64 + 64 + 1);
    }

    #[test]
    fn monomials_are_graded_and_complete() {
        let shape = PolynomialShape {
            input_dim: 2,
            degree: 2,
        };
        assert_eq!(
            shape.monomials(),
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![2, 0],
                vec![1, 1],
                vec![0, 2]
            ]
        );
        let cube = PolynomialShape {
            input_dim: 3,
            degree: 4,
        };
        assert_eq!(cube.num_params(), 35);
    }

    #[test]
    fn mlp_gradients_match_finite_differences() {
        let x = [0.3, -0.4, 0.7];
        for cert in [
            mlp(Activation::Tanh, 0),
            mlp(Activation::Tanh, 1),
            mlp(Activation::Sine { frequency: 2.0 }, 1),
        ] {
            let exact = cert.gradient(&x);
            for (e, fd) in exact.iter().zip(finite_difference(&cert, &x)) {
                assert!((e - fd).abs() < 1e-6, "{e} vs {fd}");
            }
        }
    }

    #[test]
    fn polynomial_value_and_gradient() {
        // V = 1 + 2 t - x^2 + 0.5 t x
        let shape = PolynomialShape {
            input_dim: 2,
            degree: 2,
        };
        let cert = Certificate::from_params(
            CertificateShape::Polynomial(shape),
            true,
            vec![1.0, 2.0, 0.0, 0.0, 0.5, -1.0],
        )
        .unwrap();
        let x = [0.5, -2.0];
        assert!((cert.evaluate(&x) - (1.0 + 1.0 - 4.0 - 0.5)).abs() < 1e-12);
        let g = cert.gradient(&x);
        assert!((g[0] - (2.0 + 0.5 * -2.0)).abs() < 1e-12);
        assert!((g[1] - (-2.0 * -2.0 + 0.5 * 0.5)).abs() < 1e-12);
        assert_eq!(cert.time_derivative(&x), Some(g[0]));
        let hess = cert.hessian(&x);
        assert!((hess[0][1] - 0.5).abs() < 1e-6);
        assert!((hess[1][1] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn symbolic_jet_folds_to_numeric_on_literal_inputs() {
        let cert = mlp(Activation::Tanh, 1);
        let x = [0.1, 0.2, -0.3];
        let numeric = cert.jet(&x);
        let lits: Vec<SmtTerm> = x.iter().map(|&v| SmtTerm::real(v)).collect();
        let symbolic = cert.symbolic_jet(&lits);
        let value = symbolic.value.as_real_lit().unwrap();
        assert!((value - numeric.value).abs() < 1e-12);
        for (s, n) in symbolic.gradient.iter().zip(&numeric.gradient) {
            assert!((s.as_real_lit().unwrap() - n).abs() < 1e-12);
        }
    }

    #[test]
    fn parameter_count_is_checked() {
        let shape = CertificateShape::Polynomial(PolynomialShape {
            input_dim: 2,
            degree: 1,
        });
        assert_eq!(
            Certificate::from_params(shape.clone(), true, vec![0.0; 4]),
            Err(CertificateError::ParamCount {
                expected: 3,
                actual: 4
            })
        );
        assert_eq!(
            Certificate::from_params(shape, true, vec![0.0, f64::NAN, 0.0]),
            Err(CertificateError::NonFinite(1))
        );
    }

    #[test]
    fn certificate_json_keeps_shape_tags() {
        let cert = mlp(Activation::Sine { frequency: 30.0 }, 0);
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["shape"]["kind"], "learned");
        assert_eq!(json["shape"]["activation"]["kind"], "sine");
        let back: Certificate = serde_json::from_value(json).unwrap();
        assert_eq!(back, cert);
    }
}
