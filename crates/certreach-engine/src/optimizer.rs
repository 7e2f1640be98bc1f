//! First-order optimizers consumed by the trainer.

/// Applies one parameter update from a loss gradient.
pub trait Optimizer {
    fn step(&mut self, params: &mut [f64], grads: &[f64]);

    /// Forget moment estimates, e.g. after the trainer rolls parameters back.
    fn reset(&mut self);
}

/// Adam with bias-corrected moment estimates.
///
/// m <- beta1*m + (1-beta1)*g
/// v <- beta2*v + (1-beta2)*g^2
/// theta <- theta - lr*m_hat/(sqrt(v_hat)+eps)
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn steps_taken(&self) -> u32 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        debug_assert_eq!(params.len(), grads.len());
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
            self.t = 0;
        }
        self.t = self.t.saturating_add(1);
        let bc1 = 1.0 / (1.0 - self.beta1.powi(self.t as i32));
        let bc2 = 1.0 / (1.0 - self.beta2.powi(self.t as i32));
        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] * bc1;
            let v_hat = self.v[i] * bc2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
        }
    }

    fn reset(&mut self) {
        self.m.clear();
        self.v.clear();
        self.t = 0;
    }
}

/// Scale `grads` in place so their Euclidean norm is at most `max_norm`.
/// Returns the norm before clipping. A non-positive `max_norm` disables
/// clipping.
pub fn clip_grad_norm(grads: &mut [f64], max_norm: f64) -> f64 {
    let norm = grads.iter().map(|g| g * g).sum::<f64>().sqrt();
    if max_norm > 0.0 && norm > max_norm {
        let k = max_norm / norm;
        grads.iter_mut().for_each(|g| *g *= k);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut p = [1.0, -1.0];
        adam.step(&mut p, &[2.0, -0.5]);
        // Bias-corrected first step is lr * sign(g).
        assert!((p[0] - 0.9).abs() < 1e-6);
        assert!((p[1] + 0.9).abs() < 1e-6);
        assert_eq!(adam.steps_taken(), 1);
    }

    #[test]
    fn minimizes_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut p = [3.0];
        for _ in 0..2000 {
            let g = [2.0 * (p[0] - 1.0)];
            adam.step(&mut p, &g);
        }
        assert!((p[0] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn reset_clears_state() {
        let mut adam = Adam::new(0.1);
        let mut p = [0.0];
        adam.step(&mut p, &[1.0]);
        adam.reset();
        assert_eq!(adam.steps_taken(), 0);
    }

    #[test]
    fn clipping_preserves_direction() {
        let mut g = [3.0, 4.0];
        let before = clip_grad_norm(&mut g, 1.0);
        assert_eq!(before, 5.0);
        assert!((g[0] - 0.6).abs() < 1e-12);
        assert!((g[1] - 0.8).abs() < 1e-12);

        let mut small = [0.1, 0.0];
        clip_grad_norm(&mut small, 1.0);
        assert_eq!(small, [0.1, 0.0]);
    }
}
