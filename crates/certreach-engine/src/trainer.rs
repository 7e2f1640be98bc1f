//! Mini-batch fitting of certificate parameters to the residual loss.
//!
//! The first fit of a run follows the pretrain / curriculum schedule. Later
//! fits resume from the carried [`TrainingState`] as fine-tuning passes over
//! the full horizon, with the learning rate decayed on plateaus.

use std::time::{Duration, Instant};

use certreach_ir::certificate::Certificate;
use certreach_ir::config::RunConfig;
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::{dot, Scalar};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::{BatchPoint, BatchSpec, Dataset};
use crate::optimizer::{clip_grad_norm, Adam, Optimizer};
use crate::residual::{
    certificate_input, check_dynamics_at, residual_terms, ContractViolation, ResidualSettings,
};
use crate::tape::{Tape, Var};

/// Learning rate multiplier when fine-tuning starts.
const FINE_TUNE_LR_FACTOR: f64 = 0.5;
/// Epochs without improvement before the learning rate is decayed.
const PLATEAU_PATIENCE: usize = 5;
const PLATEAU_FACTOR: f64 = 0.5;
/// Floor of the decayed learning rate, relative to the configured one.
const MIN_LR_RATIO: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("non-finite loss {loss} at epoch {epoch}, step {step}")]
    NumericalInstability { epoch: usize, step: usize, loss: f64 },
    #[error("cannot train on an empty dataset")]
    EmptyDataset,
    #[error("dynamics contract violated at a training sample: {0}")]
    DynamicsContract(#[from] ContractViolation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerSettings {
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub grad_clip: f64,
    pub l1_penalty: f64,
    pub lipschitz_weight: f64,
    pub boundary_weight: f64,
    /// Loss weight of samples drawn around counterexamples.
    pub counterexample_weight: f64,
    pub pretrain_fraction: f64,
    pub residual: ResidualSettings,
    pub batch: BatchSpec,
}

impl TrainerSettings {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            num_epochs: cfg.num_epochs,
            learning_rate: cfg.learning_rate,
            grad_clip: cfg.grad_clip,
            l1_penalty: cfg.l1_penalty,
            lipschitz_weight: cfg.lipschitz_weight,
            boundary_weight: cfg.boundary_weight,
            counterexample_weight: cfg.counterexample_weight,
            pretrain_fraction: cfg.pretrain_fraction,
            residual: ResidualSettings::from(cfg),
            batch: BatchSpec::from_config(cfg),
        }
    }
}

/// Optimizer moments and learning rate schedule carried from one fit to
/// the next.
#[derive(Debug, Clone)]
pub struct TrainingState {
    optimizer: Adam,
    fits: usize,
    best_epoch_loss: f64,
    bad_epochs: usize,
    min_learning_rate: f64,
}

impl TrainingState {
    pub fn new(settings: &TrainerSettings) -> Self {
        Self {
            optimizer: Adam::new(settings.learning_rate),
            fits: 0,
            best_epoch_loss: f64::INFINITY,
            bad_epochs: 0,
            min_learning_rate: settings.learning_rate * MIN_LR_RATIO,
        }
    }

    /// Completed fits; every fit after the first is a fine-tuning pass.
    pub fn fits(&self) -> usize {
        self.fits
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate
    }

    pub fn optimizer_steps(&self) -> u32 {
        self.optimizer.steps_taken()
    }

    /// Forget the moment estimates and halve the learning rate, e.g. before
    /// retrying a fit that diverged.
    pub fn back_off(&mut self) {
        self.optimizer.reset();
        self.set_learning_rate(self.learning_rate() * PLATEAU_FACTOR);
        self.bad_epochs = 0;
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.learning_rate = lr.max(self.min_learning_rate);
    }

    /// Plateau schedule: decay after `PLATEAU_PATIENCE` epochs that do not
    /// improve on the best epoch loss.
    fn record_epoch(&mut self, loss: f64) {
        if loss < self.best_epoch_loss * (1.0 - 1e-4) {
            self.best_epoch_loss = loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
            if self.bad_epochs > PLATEAU_PATIENCE {
                self.set_learning_rate(self.learning_rate() * PLATEAU_FACTOR);
                self.bad_epochs = 0;
                debug!(lr = self.learning_rate(), "Loss plateaued; learning rate decayed");
            }
        }
    }
}

/// Loss components of one mini-batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    pub total: f64,
    pub pde: f64,
    pub boundary: f64,
    pub regularizer: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    pub steps: usize,
    pub pretrain_steps: usize,
    /// Resumed from earlier fits over the full horizon.
    pub fine_tuned: bool,
    pub learning_rate: f64,
    pub final_loss: LossBreakdown,
    pub elapsed: Duration,
}

/// Fits a certificate against one system under fixed settings.
#[derive(Debug, Clone)]
pub struct Trainer<'a, D> {
    dynamics: &'a D,
    settings: TrainerSettings,
}

impl<'a, D: Dynamics> Trainer<'a, D> {
    pub fn new(dynamics: &'a D, settings: TrainerSettings) -> Self {
        Self { dynamics, settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Fit from scratch: a fresh optimizer and the full schedule.
    pub fn fit<R: Rng>(
        &self,
        cert: &Certificate,
        dataset: &Dataset,
        rng: &mut R,
    ) -> Result<(Certificate, TrainingReport), TrainingError> {
        self.fit_with(cert, dataset, &mut TrainingState::new(&self.settings), rng)
    }

    /// Run `num_epochs` passes over `dataset` starting from `cert` and
    /// `state`, and return the fitted certificate. `cert` itself is never
    /// modified, and `state` only advances when the fit succeeds.
    pub fn fit_with<R: Rng>(
        &self,
        cert: &Certificate,
        dataset: &Dataset,
        state: &mut TrainingState,
        rng: &mut R,
    ) -> Result<(Certificate, TrainingReport), TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        let start = Instant::now();
        let s = &self.settings;
        let batch_size = s.batch.batch_size.max(1);
        let steps_per_epoch = dataset.len().div_ceil(batch_size).max(1);
        let total_steps = s.num_epochs * steps_per_epoch;
        let fine_tune = state.fits > 0;
        let pretrain_steps = if fine_tune {
            0
        } else {
            (total_steps as f64 * s.pretrain_fraction).round() as usize
        };
        let curriculum_steps = total_steps.saturating_sub(pretrain_steps).max(1);

        let mut next = state.clone();
        if next.fits == 1 {
            next.set_learning_rate(next.learning_rate() * FINE_TUNE_LR_FACTOR);
        }
        let mut params = cert.params.clone();
        let mut tape = Tape::with_capacity(1 << 16);
        let mut last = LossBreakdown::default();
        let mut step = 0;

        for epoch in 0..s.num_epochs {
            let mut epoch_loss = 0.0;
            for _ in 0..steps_per_epoch {
                let spec = if step < pretrain_steps {
                    BatchSpec {
                        initial_slice_only: true,
                        ..s.batch
                    }
                } else if fine_tune {
                    s.batch
                } else {
                    // The full horizon is reached halfway through.
                    let done = (step - pretrain_steps + 1) as f64 / curriculum_steps as f64;
                    BatchSpec {
                        time_scale: (2.0 * done).min(1.0),
                        ..s.batch
                    }
                };
                let batch = dataset.draw_batch(&spec, rng);
                for point in &batch {
                    check_dynamics_at(self.dynamics, &point.input[1..])?;
                }
                let (loss, mut grads) = self.batch_loss(&mut tape, cert, &params, &batch);
                if !loss.total.is_finite() || grads.iter().any(|g| !g.is_finite()) {
                    return Err(TrainingError::NumericalInstability {
                        epoch,
                        step,
                        loss: loss.total,
                    });
                }
                clip_grad_norm(&mut grads, s.grad_clip);
                next.optimizer.step(&mut params, &grads);
                epoch_loss += loss.total;
                last = loss;
                step += 1;
            }
            let epoch_loss = epoch_loss / steps_per_epoch as f64;
            if fine_tune {
                next.record_epoch(epoch_loss);
            }
            debug!(epoch, loss = epoch_loss, "Epoch finished");
        }

        if let Some(i) = params.iter().position(|p| !p.is_finite()) {
            return Err(TrainingError::NumericalInstability {
                epoch: s.num_epochs,
                step,
                loss: params[i],
            });
        }
        next.fits += 1;
        *state = next;
        let report = TrainingReport {
            epochs: s.num_epochs,
            steps: step,
            pretrain_steps,
            fine_tuned: fine_tune,
            learning_rate: state.learning_rate(),
            final_loss: last,
            elapsed: start.elapsed(),
        };
        info!(
            epochs = report.epochs,
            steps = report.steps,
            fine_tuned = report.fine_tuned,
            lr = report.learning_rate,
            loss = report.final_loss.total,
            pde = report.final_loss.pde,
            boundary = report.final_loss.boundary,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Training finished"
        );
        let fitted = Certificate {
            shape: cert.shape.clone(),
            params,
            time_varying: cert.time_varying,
        };
        Ok((fitted, report))
    }

    /// Loss and its parameter gradient on one batch.
    ///
    /// `loss = mean|R| + w_b mean|V - l| + w_lip mean|dV/dx|^2 + w_l1 sum|theta|`,
    /// where the interior mean runs over points off the `t = 0` slice and
    /// the boundary mean over points on it. Both means weight points drawn
    /// around counterexamples by `counterexample_weight`.
    pub fn batch_loss(
        &self,
        tape: &mut Tape,
        cert: &Certificate,
        params: &[f64],
        batch: &[BatchPoint],
    ) -> (LossBreakdown, Vec<f64>) {
        tape.clear();
        let s = &self.settings;
        let theta = tape.vars(params);
        let zero = tape.var(0.0);

        let mut pde_sum = zero;
        let mut boundary_sum = zero;
        let mut lipschitz_sum = zero;
        let (mut w_pde, mut w_boundary) = (0.0, 0.0);
        for point in batch {
            let input = tape.vars(certificate_input(cert, &point.input));
            let terms = residual_terms(self.dynamics, cert, &theta, &input, s.residual);
            let w = if point.counterexample {
                s.counterexample_weight
            } else {
                1.0
            };
            if point.on_boundary {
                boundary_sum = boundary_sum + terms.value_gap().abs().scale(w);
                w_boundary += w;
            } else {
                pde_sum = pde_sum + terms.combined.abs().scale(w);
                w_pde += w;
            }
            if s.lipschitz_weight > 0.0 {
                let jet = cert.jet_with(&theta, &input);
                let p = jet.state_gradient(cert.time_varying);
                lipschitz_sum = lipschitz_sum + dot(&zero, p, p);
            }
        }

        let pde = mean(pde_sum, w_pde);
        let boundary = mean(boundary_sum, w_boundary).scale(s.boundary_weight);
        let mut regularizer = mean(lipschitz_sum, batch.len() as f64).scale(s.lipschitz_weight);
        if s.l1_penalty > 0.0 {
            let l1 = theta.iter().fold(zero, |acc, p| acc + p.abs());
            regularizer = regularizer + l1.scale(s.l1_penalty);
        }
        let total = pde + boundary + regularizer;

        let grads = tape.gradient(total).wrt_all(&theta);
        let breakdown = LossBreakdown {
            total: total.value(),
            pde: pde.value(),
            boundary: boundary.value(),
            regularizer: regularizer.value(),
        };
        (breakdown, grads)
    }
}

/// `sum / weight`, or `sum` when nothing was accumulated.
fn mean(sum: Var<'_>, weight: f64) -> Var<'_> {
    if weight > 0.0 {
        sum.scale(1.0 / weight)
    } else {
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certreach_ir::certificate::PolynomialShape;
    use certreach_ir::config::{MinWith, ReachAim, ReachMode, SetType};
    use certreach_ir::domain::DomainBox;
    use crate::counterexample::{Counterexample, ViolationKind};
    use crate::testing::{Pinhole, Still};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn settings(epochs: usize) -> TrainerSettings {
        TrainerSettings {
            num_epochs: epochs,
            learning_rate: 0.05,
            grad_clip: 0.0,
            l1_penalty: 0.0,
            lipschitz_weight: 0.0,
            boundary_weight: 1.0,
            counterexample_weight: 3.0,
            pretrain_fraction: 0.1,
            residual: ResidualSettings {
                reach_mode: ReachMode::Backward,
                reach_aim: ReachAim::Reach,
                min_with: MinWith::None,
                set_type: SetType::Set,
            },
            batch: BatchSpec {
                batch_size: 32,
                counterexample_fraction: 0.2,
                boundary_fraction: 0.3,
                counterexample_radius: 0.05,
                time_scale: 1.0,
                initial_slice_only: false,
            },
        }
    }

    fn quadratic() -> Certificate {
        Certificate::polynomial(
            PolynomialShape {
                input_dim: 2,
                degree: 2,
            },
            true,
        )
    }

    #[test]
    fn batch_gradient_matches_finite_differences() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 20, 5, &mut rng);
        let batch = ds.draw_batch(&settings(1).batch, &mut rng);
        let trainer = Trainer::new(&Still, settings(1));
        let cert = quadratic();
        let params: Vec<f64> = (0..cert.num_params()).map(|i| 0.3 - 0.1 * i as f64).collect();
        let mut tape = Tape::new();
        let (_, grads) = trainer.batch_loss(&mut tape, &cert, &params, &batch);
        let h = 1e-7;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += h;
            let mut minus = params.clone();
            minus[i] -= h;
            let lp = trainer.batch_loss(&mut tape, &cert, &plus, &batch).0.total;
            let lm = trainer.batch_loss(&mut tape, &cert, &minus, &batch).0.total;
            let fd = (lp - lm) / (2.0 * h);
            assert!((grads[i] - fd).abs() < 1e-4, "param {i}: {} vs {fd}", grads[i]);
        }
    }

    #[test]
    fn fit_reduces_loss_and_keeps_input_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 200, 50, &mut rng);
        let trainer = Trainer::new(&Still, settings(60));
        let cert = quadratic();
        let batch = ds.draw_batch(&settings(1).batch, &mut rng);
        let mut tape = Tape::new();
        let before = trainer.batch_loss(&mut tape, &cert, &cert.params, &batch).0.total;
        let (fitted, report) = trainer.fit(&cert, &ds, &mut rng).unwrap();
        let after = trainer
            .batch_loss(&mut tape, &fitted, &fitted.params, &batch)
            .0
            .total;
        assert!(after < 0.5 * before, "{after} vs {before}");
        assert!(cert.params.iter().all(|&p| p == 0.0));
        assert_eq!(report.steps, 60 * 8);
        assert!(report.pretrain_steps > 0);
    }

    #[test]
    fn non_finite_loss_is_reported() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 10, 2, &mut rng);
        let trainer = Trainer::new(&Still, settings(1));
        let mut cert = quadratic();
        cert.params[0] = f64::NAN;
        let err = trainer.fit(&cert, &ds, &mut rng).unwrap_err();
        assert!(matches!(err, TrainingError::NumericalInstability { step: 0, .. }));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(14);
        let ds = Dataset::empty(DomainBox::cube(1, -1.0, 1.0), 1.0);
        let trainer = Trainer::new(&Still, settings(1));
        assert_eq!(
            trainer.fit(&quadratic(), &ds, &mut rng).unwrap_err(),
            TrainingError::EmptyDataset
        );
    }

    #[test]
    fn fine_tuning_resumes_the_optimizer_without_pretraining() {
        let mut rng = ChaCha8Rng::seed_from_u64(15);
        let ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 40, 10, &mut rng);
        let trainer = Trainer::new(&Still, settings(2));
        let mut state = TrainingState::new(trainer.settings());

        let (first, report) = trainer
            .fit_with(&quadratic(), &ds, &mut state, &mut rng)
            .unwrap();
        assert!(!report.fine_tuned);
        assert!(report.pretrain_steps > 0);
        assert_eq!(state.fits(), 1);
        assert_eq!(state.optimizer_steps() as usize, report.steps);

        let (_, again) = trainer.fit_with(&first, &ds, &mut state, &mut rng).unwrap();
        assert!(again.fine_tuned);
        assert_eq!(again.pretrain_steps, 0);
        assert_eq!(state.fits(), 2);
        assert_eq!(state.optimizer_steps() as usize, report.steps + again.steps);
        assert!((again.learning_rate - 0.025).abs() < 1e-12);
    }

    #[test]
    fn failed_fit_leaves_the_state_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(16);
        let ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 20, 5, &mut rng);
        let trainer = Trainer::new(&Still, settings(1));
        let mut state = TrainingState::new(trainer.settings());
        trainer.fit_with(&quadratic(), &ds, &mut state, &mut rng).unwrap();
        let steps = state.optimizer_steps();

        let mut broken = quadratic();
        broken.params[0] = f64::NAN;
        assert!(trainer.fit_with(&broken, &ds, &mut state, &mut rng).is_err());
        assert_eq!(state.fits(), 1);
        assert_eq!(state.optimizer_steps(), steps);
        assert_eq!(state.learning_rate(), 0.05);
    }

    #[test]
    fn plateau_decays_the_learning_rate_down_to_a_floor() {
        let mut state = TrainingState::new(&settings(1));
        state.record_epoch(1.0);
        for _ in 0..PLATEAU_PATIENCE {
            state.record_epoch(1.0);
        }
        assert_eq!(state.learning_rate(), 0.05);
        state.record_epoch(1.0);
        assert!((state.learning_rate() - 0.025).abs() < 1e-12);
        // An improvement resets the patience counter.
        state.record_epoch(0.5);
        for _ in 0..100 {
            state.record_epoch(0.5);
        }
        assert!((state.learning_rate() - 0.05 * MIN_LR_RATIO).abs() < 1e-12);

        state.back_off();
        assert_eq!(state.optimizer_steps(), 0);
        assert!((state.learning_rate() - 0.05 * MIN_LR_RATIO).abs() < 1e-12);
    }

    #[test]
    fn counterexample_samples_carry_extra_weight() {
        let trainer = Trainer::new(&Still, settings(1));
        let cert = quadratic();
        let params: Vec<f64> = (0..cert.num_params()).map(|i| 0.2 + 0.1 * i as f64).collect();
        let plain = BatchPoint {
            input: vec![0.5, -0.3],
            on_boundary: false,
            counterexample: false,
        };
        let near_cex = BatchPoint {
            input: vec![0.25, 0.8],
            on_boundary: false,
            counterexample: true,
        };
        let mut tape = Tape::new();
        let mut pde = |batch: &[BatchPoint]| {
            trainer
                .batch_loss(&mut tape, &cert, &params, batch)
                .0
                .pde
        };
        let a = pde(&[plain.clone()]);
        let b = pde(&[near_cex.clone()]);
        let both = pde(&[plain, near_cex]);
        assert!((a - b).abs() > 1e-3);
        assert!((both - (a + 3.0 * b) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn dynamics_are_checked_at_every_training_sample() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut ds = Dataset::generate(DomainBox::cube(1, -1.0, 1.0), 1.0, 20, 5, &mut rng);
        ds.ingest(&Counterexample {
            point: vec![0.5, 0.9],
            kind: ViolationKind::InteriorPde,
            margin: 1.0,
            clause: "derivative_high".into(),
        });
        let mut s = settings(1);
        s.batch.counterexample_radius = 0.0;
        let trainer = Trainer::new(&Pinhole, s);
        let err = trainer.fit(&quadratic(), &ds, &mut rng).unwrap_err();
        assert_eq!(
            err,
            TrainingError::DynamicsContract(ContractViolation::NonFinite {
                system: "pinhole".into(),
                quantity: "drift",
                state: vec![0.9],
            })
        );
    }
}
