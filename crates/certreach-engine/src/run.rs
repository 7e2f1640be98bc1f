//! Run-mode entry points: `train`, `verify`, and `cegis` share one wiring
//! of dynamics, configuration, solver backend, and output directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use certreach_ir::certificate::Certificate;
use certreach_ir::config::RunConfig;
use certreach_ir::dynamics::Dynamics;
use certreach_proof_kernel::{
    artifact_dir, load_checked_artifact, save_artifact, ArtifactStatus, CertificateArtifact,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{Backend, SolverFactory};
use crate::cegis::{initial_certificate, Cegis, CegisError, CegisOutcome, CegisStatus};
use crate::dataset::Dataset;
use crate::result::{VerificationResult, VerificationStatus};
use crate::trainer::TrainingReport;
use crate::verifier::{Verifier, VerifierSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Fit once, no verification.
    Train,
    /// Verify a previously saved certificate.
    Verify,
    /// Full train / verify / refine loop.
    Cegis,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Train => "train",
            RunMode::Verify => "verify",
            RunMode::Cegis => "cegis",
        })
    }
}

/// Where a run reads and writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub logging_root: PathBuf,
    pub experiment_name: String,
    /// Dump every verification query as SMT-LIB2 under this directory.
    pub dump_smt: Option<PathBuf>,
}

impl RunContext {
    pub fn new(logging_root: impl Into<PathBuf>, experiment_name: impl Into<String>) -> Self {
        Self {
            logging_root: logging_root.into(),
            experiment_name: experiment_name.into(),
            dump_smt: None,
        }
    }

    pub fn experiment_dir(&self) -> PathBuf {
        artifact_dir(&self.logging_root, &self.experiment_name)
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub artifact: CertificateArtifact,
    /// Where `artifact` lives on disk.
    pub artifact_path: PathBuf,
    pub training: Option<TrainingReport>,
    pub verification: Option<VerificationResult>,
    pub cegis: Option<CegisOutcome>,
}

impl RunReport {
    pub fn verified(&self) -> bool {
        self.artifact.is_verified()
    }
}

/// Run `mode` with the solver backend selected by `config.solver`.
pub fn run<D: Dynamics>(
    mode: RunMode,
    dynamics: &D,
    config: RunConfig,
    ctx: &RunContext,
) -> Result<RunReport, CegisError> {
    config.validate()?;
    let backend = Backend::from_config(&config)?;
    run_with_factory(mode, dynamics, config, ctx, backend)
}

/// Like [`run`], with an explicit solver factory.
pub fn run_with_factory<D: Dynamics, F: SolverFactory>(
    mode: RunMode,
    dynamics: &D,
    config: RunConfig,
    ctx: &RunContext,
    factory: F,
) -> Result<RunReport, CegisError> {
    let dir = ctx.experiment_dir();
    info!(
        %mode,
        system = dynamics.name(),
        experiment = %ctx.experiment_name,
        dir = %dir.display(),
        "Run started"
    );
    let verifier_settings = VerifierSettings {
        dump_dir: ctx.dump_smt.clone(),
        ..VerifierSettings::from_config(&config)
    };
    let cegis = Cegis::new(dynamics, config, factory, verifier_settings)?;
    let loaded = if cegis.config().load_model {
        Some(load_model(&dir, dynamics.name())?)
    } else {
        None
    };

    match mode {
        RunMode::Train => train(&cegis, dynamics, &dir, loaded),
        RunMode::Verify => {
            let cert = match loaded {
                Some(cert) => cert,
                None => load_model(&dir, dynamics.name())?,
            };
            verify(cegis.verifier(), dynamics, cegis.config(), &dir, cert)
        }
        RunMode::Cegis => {
            let outcome = cegis.run(loaded)?;
            let status = if outcome.verified() {
                ArtifactStatus::Verified
            } else {
                ArtifactStatus::Unverified
            };
            let mut artifact = CertificateArtifact::new(
                status,
                dynamics.name(),
                outcome.certificate.clone(),
                cegis.config().clone(),
            );
            artifact.iterations = outcome.iterations();
            artifact.counterexample_count = outcome.counterexamples.len();
            if let CegisStatus::Failed(reason) = outcome.status {
                artifact.failure = Some(reason.to_string());
            }
            let artifact_path = save_artifact(&dir, &mut artifact)?;
            write_json(&dir.join("history.json"), &outcome.history)?;
            write_json(&dir.join("counterexamples.json"), &outcome.counterexamples)?;
            info!(status = %artifact.status, path = %artifact_path.display(), "Artifact written");
            Ok(RunReport {
                mode: RunMode::Cegis,
                artifact,
                artifact_path,
                training: None,
                verification: None,
                cegis: Some(outcome),
            })
        }
    }
}

/// Load the artifact in `dir`, refusing tampered files and certificates
/// saved for another system.
pub fn load_model(dir: &Path, system: &str) -> Result<Certificate, CegisError> {
    let artifact = load_checked_artifact(dir)?;
    if artifact.dynamics != system {
        return Err(CegisError::ModelMismatch {
            expected: system.to_string(),
            found: artifact.dynamics,
        });
    }
    info!(
        dir = %dir.display(),
        status = %artifact.status,
        representation = %artifact.representation,
        "Loaded model"
    );
    Ok(artifact.certificate)
}

fn train<D: Dynamics, F: SolverFactory>(
    cegis: &Cegis<'_, D, F>,
    dynamics: &D,
    dir: &Path,
    loaded: Option<Certificate>,
) -> Result<RunReport, CegisError> {
    let cfg = cegis.config();
    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let start = match loaded {
        Some(cert) => cert,
        None => initial_certificate(cfg, dynamics.state_dim(), &mut rng),
    };
    let dataset = Dataset::generate(
        dynamics.domain(),
        cfg.time_horizon,
        cfg.num_uniform,
        cfg.num_boundary,
        &mut rng,
    );
    let (fitted, report) = cegis.trainer().fit(&start, &dataset, &mut rng)?;
    let mut artifact =
        CertificateArtifact::new(ArtifactStatus::Unverified, dynamics.name(), fitted, cfg.clone());
    let artifact_path = save_artifact(dir, &mut artifact)?;
    info!(path = %artifact_path.display(), "Artifact written");
    Ok(RunReport {
        mode: RunMode::Train,
        artifact,
        artifact_path,
        training: Some(report),
        verification: None,
        cegis: None,
    })
}

/// Verify `cert`, rewrite the artifact with the resulting status, and
/// record the full result next to it.
fn verify<D: Dynamics, F: SolverFactory>(
    verifier: &Verifier<'_, D, F>,
    dynamics: &D,
    cfg: &RunConfig,
    dir: &Path,
    cert: Certificate,
) -> Result<RunReport, CegisError> {
    let result = verifier.verify(&cert)?;
    let status = if result.status.is_verified() {
        ArtifactStatus::Verified
    } else {
        ArtifactStatus::Unverified
    };
    let mut artifact = CertificateArtifact::new(status, dynamics.name(), cert, cfg.clone());
    if let VerificationStatus::Counterexample(_) = &result.status {
        artifact.counterexample_count = 1;
    }
    let artifact_path = save_artifact(dir, &mut artifact)?;
    write_json(&dir.join("verification.json"), &result)?;
    Ok(RunReport {
        mode: RunMode::Verify,
        artifact,
        artifact_path,
        training: None,
        verification: Some(result),
        cegis: None,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CegisError> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    fs::write(path, text)?;
    Ok(())
}
