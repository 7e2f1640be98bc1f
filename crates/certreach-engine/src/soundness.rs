//! Independent dense re-sampling of a certificate's residual.
//!
//! The audit shares nothing with the solver path except the residual
//! definition: it evaluates `|R|` on a regular grid plus random points of
//! `[0, T] x domain`, and `|V - l|` on the `t = 0` slice.

use certreach_ir::certificate::Certificate;
use certreach_ir::config::RunConfig;
use certreach_ir::dynamics::Dynamics;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::counterexample::ViolationKind;
use crate::residual::{ResidualEvaluator, ResidualSettings};

/// Upper bound on grid points, whatever `grid_per_axis` asks for.
const MAX_GRID_POINTS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditSettings {
    pub residual: ResidualSettings,
    pub epsilon: f64,
    /// Tolerance on top of epsilon before a sample counts as a violation.
    pub safety_margin: f64,
    pub time_horizon: f64,
    pub grid_per_axis: usize,
    pub random_points: usize,
    pub seed: u64,
}

impl AuditSettings {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            residual: ResidualSettings::from(cfg),
            epsilon: cfg.epsilon,
            safety_margin: cfg.solver_delta(),
            time_horizon: cfg.time_horizon,
            grid_per_axis: 11,
            random_points: 10_000,
            seed: cfg.seed.wrapping_add(1),
        }
    }
}

/// Largest residual seen and where.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorstSample {
    pub point: Vec<f64>,
    pub kind: ViolationKind,
    pub residual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundnessReport {
    pub points_checked: usize,
    pub max_interior: f64,
    pub max_boundary: f64,
    pub worst: Option<WorstSample>,
    /// Samples exceeding `epsilon + safety_margin`.
    pub violations: usize,
    pub epsilon: f64,
    pub safety_margin: f64,
}

impl SoundnessReport {
    pub fn passed(&self) -> bool {
        self.violations == 0
    }

    fn record(&mut self, point: &[f64], kind: ViolationKind, residual: f64) {
        self.points_checked += 1;
        let residual = if residual.is_nan() { f64::INFINITY } else { residual };
        match kind {
            ViolationKind::InteriorPde => self.max_interior = self.max_interior.max(residual),
            ViolationKind::BoundaryCondition => self.max_boundary = self.max_boundary.max(residual),
        }
        if residual > self.epsilon + self.safety_margin {
            self.violations += 1;
        }
        if self.worst.as_ref().map_or(true, |w| residual > w.residual) {
            self.worst = Some(WorstSample {
                point: point.to_vec(),
                kind,
                residual,
            });
        }
    }
}

/// Evaluate the residual densely over the input space of `cert`.
pub fn audit<D: Dynamics>(
    dynamics: &D,
    cert: &Certificate,
    settings: &AuditSettings,
) -> SoundnessReport {
    let evaluator = ResidualEvaluator::new(dynamics, settings.residual);
    let domain = dynamics.domain();
    let mut report = SoundnessReport {
        points_checked: 0,
        max_interior: 0.0,
        max_boundary: 0.0,
        worst: None,
        violations: 0,
        epsilon: settings.epsilon,
        safety_margin: settings.safety_margin,
    };

    // `[t, x]` in unit coordinates, mapped into `[0, T] x domain`.
    let to_input = |u: &[f64]| -> Vec<f64> {
        let mut input = vec![u[0] * settings.time_horizon];
        input.extend(domain.lerp(&u[1..]));
        input
    };

    let dim = domain.dim() + 1;
    let per_axis = grid_axis_len(settings.grid_per_axis, dim);
    for u in unit_grid(per_axis, dim) {
        let input = to_input(&u);
        let residual = evaluator.interior_violation(cert, &input);
        report.record(&input, ViolationKind::InteriorPde, residual);
        if u[0] == 0.0 {
            let residual = evaluator.boundary_violation(cert, &input[1..]);
            report.record(&input, ViolationKind::BoundaryCondition, residual);
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    for _ in 0..settings.random_points {
        let u: Vec<f64> = (0..dim).map(|_| rng.gen::<f64>()).collect();
        let input = to_input(&u);
        let residual = evaluator.interior_violation(cert, &input);
        report.record(&input, ViolationKind::InteriorPde, residual);

        let mut initial = input.clone();
        initial[0] = 0.0;
        let residual = evaluator.boundary_violation(cert, &initial[1..]);
        report.record(&initial, ViolationKind::BoundaryCondition, residual);
    }

    if report.passed() {
        info!(
            points = report.points_checked,
            max_interior = report.max_interior,
            max_boundary = report.max_boundary,
            "Soundness audit passed"
        );
    } else {
        warn!(
            points = report.points_checked,
            violations = report.violations,
            worst = ?report.worst,
            "Soundness audit found residuals above epsilon"
        );
    }
    report
}

/// Shrink `requested` until `requested^dim` fits the grid cap.
fn grid_axis_len(requested: usize, dim: usize) -> usize {
    let mut n = requested.max(2);
    while n > 2 && n.checked_pow(dim as u32).map_or(true, |total| total > MAX_GRID_POINTS) {
        n -= 1;
    }
    n
}

/// All points of the regular `n^dim` grid on the unit cube, corners included.
fn unit_grid(n: usize, dim: usize) -> impl Iterator<Item = Vec<f64>> {
    let total = n.pow(dim as u32);
    let step = 1.0 / (n - 1) as f64;
    (0..total).map(move |mut idx| {
        let mut u = Vec::with_capacity(dim);
        for _ in 0..dim {
            u.push((idx % n) as f64 * step);
            idx /= n;
        }
        u
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Still;
    use certreach_ir::certificate::{CertificateShape, PolynomialShape};
    use certreach_ir::config::{MinWith, ReachAim, ReachMode, SetType};

    fn settings() -> AuditSettings {
        AuditSettings {
            residual: ResidualSettings {
                reach_mode: ReachMode::Backward,
                reach_aim: ReachAim::Reach,
                min_with: MinWith::None,
                set_type: SetType::Set,
            },
            epsilon: 0.1,
            safety_margin: 1e-6,
            time_horizon: 1.0,
            grid_per_axis: 5,
            random_points: 100,
            seed: 3,
        }
    }

    fn linear(ct: f64, cx: f64) -> Certificate {
        let shape = PolynomialShape {
            input_dim: 2,
            degree: 1,
        };
        Certificate::from_params(CertificateShape::Polynomial(shape), true, vec![0.0, ct, cx])
            .unwrap()
    }

    #[test]
    fn exact_solution_passes() {
        let report = audit(&Still, &linear(0.0, 1.0), &settings());
        assert!(report.passed());
        assert_eq!(report.max_interior, 0.0);
        assert!(report.max_boundary < 1e-12);
        // 25 grid points (5 of them on t = 0) and 100 random points with
        // one boundary sample each.
        assert_eq!(report.points_checked, 25 + 5 + 200);
    }

    #[test]
    fn drifting_certificate_is_caught() {
        // dV/dt = 0.5 everywhere, far above epsilon.
        let report = audit(&Still, &linear(0.5, 1.0), &settings());
        assert!(!report.passed());
        assert!((report.max_interior - 0.5).abs() < 1e-12);
        let worst = report.worst.unwrap();
        assert_eq!(worst.kind, ViolationKind::InteriorPde);
    }

    #[test]
    fn grid_is_capped_and_covers_corners() {
        assert_eq!(grid_axis_len(11, 2), 11);
        assert!(grid_axis_len(1000, 4).pow(4) <= MAX_GRID_POINTS);
        let pts: Vec<_> = unit_grid(3, 2).collect();
        assert_eq!(pts.len(), 9);
        assert!(pts.contains(&vec![0.0, 0.0]));
        assert!(pts.contains(&vec![1.0, 1.0]));
        assert!(pts.contains(&vec![0.5, 1.0]));
    }
}
