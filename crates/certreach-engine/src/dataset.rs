//! Training samples and the pruning / batch composition policy.
//!
//! Every sample is a full input `[t, x]`. Counterexamples are append-only:
//! no operation in this module removes one.

use certreach_ir::config::RunConfig;
use certreach_ir::domain::DomainBox;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::counterexample::Counterexample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleTag {
    Uniform,
    Counterexample,
    /// A `t = 0` state where the terminal condition is enforced.
    BoundaryAnchor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub point: Vec<f64>,
    pub tag: SampleTag,
}

/// One training input and whether the boundary loss applies to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPoint {
    pub input: Vec<f64>,
    pub on_boundary: bool,
    /// Drawn around a counterexample.
    pub counterexample: bool,
}

/// How a mini-batch is composed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSpec {
    pub batch_size: usize,
    pub counterexample_fraction: f64,
    pub boundary_fraction: f64,
    /// Half-width of the jitter applied around counterexamples.
    pub counterexample_radius: f64,
    /// Multiplier on the time coordinate of uniform samples (curriculum).
    pub time_scale: f64,
    /// Draw every point on the `t = 0` slice.
    pub initial_slice_only: bool,
}

impl BatchSpec {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            counterexample_fraction: cfg.counterexample_fraction,
            boundary_fraction: cfg.boundary_fraction,
            counterexample_radius: cfg.counterexample_radius,
            time_scale: 1.0,
            initial_slice_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_uniform: usize,
    pub retained_uniform: usize,
    pub regenerated_uniform: usize,
    pub counterexamples: usize,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    domain: DomainBox,
    time_horizon: f64,
}

impl Dataset {
    pub fn empty(domain: DomainBox, time_horizon: f64) -> Self {
        Self {
            samples: Vec::new(),
            domain,
            time_horizon,
        }
    }

    /// Uniform samples over `[0, T] x domain` plus `t = 0` boundary anchors.
    pub fn generate<R: Rng>(
        domain: DomainBox,
        time_horizon: f64,
        num_uniform: usize,
        num_boundary: usize,
        rng: &mut R,
    ) -> Self {
        let mut ds = Self::empty(domain, time_horizon);
        ds.add_uniform(num_uniform, rng);
        for _ in 0..num_boundary {
            let mut point = vec![0.0];
            point.extend(ds.random_state(rng));
            ds.samples.push(Sample {
                point,
                tag: SampleTag::BoundaryAnchor,
            });
        }
        ds
    }

    pub fn domain(&self) -> &DomainBox {
        &self.domain
    }

    pub fn time_horizon(&self) -> f64 {
        self.time_horizon
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn count(&self, tag: SampleTag) -> usize {
        self.samples.iter().filter(|s| s.tag == tag).count()
    }

    pub fn counterexamples(&self) -> impl Iterator<Item = &Sample> {
        self.samples
            .iter()
            .filter(|s| s.tag == SampleTag::Counterexample)
    }

    pub fn ingest(&mut self, cex: &Counterexample) {
        self.samples.push(Sample {
            point: cex.point.clone(),
            tag: SampleTag::Counterexample,
        });
    }

    fn random_state<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let u: Vec<f64> = (0..self.domain.dim()).map(|_| rng.gen::<f64>()).collect();
        self.domain.lerp(&u)
    }

    fn add_uniform<R: Rng>(&mut self, n: usize, rng: &mut R) {
        for _ in 0..n {
            let mut point = vec![rng.gen::<f64>() * self.time_horizon];
            point.extend(self.random_state(rng));
            self.samples.push(Sample {
                point,
                tag: SampleTag::Uniform,
            });
        }
    }

    /// Keep `retained` random uniform samples, drop the rest, and add
    /// `regenerate` fresh ones. Anchors and counterexamples are untouched.
    pub fn prune<R: Rng>(
        &mut self,
        retained: usize,
        regenerate: usize,
        rng: &mut R,
    ) -> PruneReport {
        let (mut uniform, kept): (Vec<Sample>, Vec<Sample>) = std::mem::take(&mut self.samples)
            .into_iter()
            .partition(|s| s.tag == SampleTag::Uniform);
        self.samples = kept;
        let before = uniform.len();
        uniform.shuffle(rng);
        uniform.truncate(retained);
        let retained_uniform = uniform.len();
        self.samples.extend(uniform);
        self.add_uniform(regenerate, rng);
        let report = PruneReport {
            removed_uniform: before - retained_uniform,
            retained_uniform,
            regenerated_uniform: regenerate,
            counterexamples: self.count(SampleTag::Counterexample),
        };
        debug!(?report, "pruned dataset");
        report
    }

    /// Compose one mini-batch. Counterexample and boundary shares are only
    /// used when such samples exist; the remainder is uniform.
    pub fn draw_batch<R: Rng>(&self, spec: &BatchSpec, rng: &mut R) -> Vec<BatchPoint> {
        let by_tag = |tag: SampleTag| -> Vec<&Sample> {
            self.samples.iter().filter(|s| s.tag == tag).collect()
        };
        let cexs = by_tag(SampleTag::Counterexample);
        let anchors = by_tag(SampleTag::BoundaryAnchor);
        let mut uniform = by_tag(SampleTag::Uniform);
        if uniform.is_empty() {
            uniform = self.samples.iter().collect();
        }

        let share = |fraction: f64, pool: &[&Sample]| -> usize {
            if pool.is_empty() {
                0
            } else {
                (spec.batch_size as f64 * fraction).round() as usize
            }
        };
        let n_cex = share(spec.counterexample_fraction, &cexs[..]).min(spec.batch_size);
        let n_anchor = share(spec.boundary_fraction, &anchors[..]).min(spec.batch_size - n_cex);
        let n_uniform = spec.batch_size - n_cex - n_anchor;

        let mut batch = Vec::with_capacity(spec.batch_size);
        for _ in 0..n_cex {
            if let Some(s) = cexs.choose(rng) {
                batch.push(self.jitter(&s.point, spec.counterexample_radius, rng));
            }
        }
        for _ in 0..n_anchor {
            if let Some(s) = anchors.choose(rng) {
                batch.push(BatchPoint {
                    input: s.point.clone(),
                    on_boundary: true,
                    counterexample: false,
                });
            }
        }
        for _ in 0..n_uniform {
            if let Some(s) = uniform.choose(rng) {
                let mut input = s.point.clone();
                input[0] *= spec.time_scale;
                batch.push(BatchPoint {
                    on_boundary: input[0] == 0.0,
                    input,
                    counterexample: false,
                });
            }
        }
        if spec.initial_slice_only {
            for p in &mut batch {
                p.input[0] = 0.0;
                p.on_boundary = true;
            }
        }
        batch
    }

    fn jitter<R: Rng>(&self, point: &[f64], radius: f64, rng: &mut R) -> BatchPoint {
        let mut input: Vec<f64> = point
            .iter()
            .map(|v| v + radius * rng.gen_range(-1.0..=1.0))
            .collect();
        input[0] = input[0].clamp(0.0, self.time_horizon);
        self.domain.clamp(&mut input[1..]);
        BatchPoint {
            on_boundary: input[0] == 0.0,
            input,
            counterexample: true,
        }
    }
}
