#![doc = include_str!("../README.md")]

//! Persisted certificate artifacts for certreach.
//!
//! This crate owns the artifact schema, its canonical integrity hash, and
//! the save / load / integrity-check operations. It deliberately knows
//! nothing about training or solvers so it can be audited on its own.

use std::fs;
use std::path::{Path, PathBuf};

use certreach_ir::certificate::{Certificate, RepresentationKind};
use certreach_ir::config::RunConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Current artifact schema version. The checker accepts exactly this one.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// File name of the artifact inside an experiment directory.
pub const ARTIFACT_FILE_NAME: &str = "certificate.json";

const ARTIFACT_HASH_DOMAIN_TAG: &str = "certreach-artifact-v1\n";

/// Whether the CEGIS loop proved the certificate at `epsilon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Verified,
    Unverified,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactStatus::Verified => f.write_str("verified"),
            ArtifactStatus::Unverified => f.write_str("unverified"),
        }
    }
}

/// Certificate artifact loaded from or written to `certificate.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateArtifact {
    /// Schema version for compatibility checks.
    pub schema_version: u32,
    /// Verification status at the time the artifact was written.
    pub status: ArtifactStatus,
    /// Name of the dynamics the certificate was fitted for.
    pub dynamics: String,
    /// Representation kind, duplicated from the shape for quick inspection.
    pub representation: RepresentationKind,
    /// Shape and parameters.
    pub certificate: Certificate,
    /// Configuration that produced the certificate.
    pub run_config: RunConfig,
    /// Acceptance tolerance the status refers to.
    pub epsilon: f64,
    /// CEGIS iterations spent (0 for a plain training run).
    pub iterations: usize,
    /// Counterexamples collected over the run.
    pub counterexample_count: usize,
    /// Why the run stopped without verification, if it did.
    #[serde(default)]
    pub failure: Option<String>,
    /// Integrity hash over every other field.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl CertificateArtifact {
    /// Unsealed artifact for `certificate`; `epsilon` is taken from the
    /// configuration.
    pub fn new(
        status: ArtifactStatus,
        dynamics: impl Into<String>,
        certificate: Certificate,
        run_config: RunConfig,
    ) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            status,
            dynamics: dynamics.into(),
            representation: certificate.kind(),
            epsilon: run_config.epsilon,
            certificate,
            run_config,
            iterations: 0,
            counterexample_count: 0,
            failure: None,
            sha256: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == ArtifactStatus::Verified
    }

    /// Compute and store the integrity hash.
    pub fn seal(&mut self) -> Result<(), ArtifactError> {
        self.sha256 = Some(compute_artifact_sha256(self)?);
        Ok(())
    }
}

/// One integrity-check issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIssue {
    /// Stable machine-readable issue code.
    pub code: &'static str,
    /// Human-readable issue details.
    pub message: String,
}

impl std::fmt::Display for ArtifactIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Full integrity-check report for one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactIntegrityReport {
    pub artifact: CertificateArtifact,
    pub issues: Vec<ArtifactIssue>,
}

impl ArtifactIntegrityReport {
    /// `true` when no integrity issues were found.
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid artifact JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("artifact {path} failed its integrity check: {}", summarize(.issues))]
    Integrity {
        path: PathBuf,
        issues: Vec<ArtifactIssue>,
    },
}

fn summarize(issues: &[ArtifactIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Experiment directory `<logging_root>/<experiment>`.
pub fn artifact_dir(logging_root: &Path, experiment: &str) -> PathBuf {
    logging_root.join(experiment)
}

/// Artifact file path for an experiment directory.
pub fn artifact_path(dir: &Path) -> PathBuf {
    dir.join(ARTIFACT_FILE_NAME)
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Canonical hash over every field except `sha256`.
///
/// Floats are hashed by their bit patterns so that the digest does not
/// depend on how a JSON writer chooses to print them.
pub fn compute_artifact_sha256(artifact: &CertificateArtifact) -> Result<String, ArtifactError> {
    let mut hasher = Sha256::new();
    hasher.update(ARTIFACT_HASH_DOMAIN_TAG.as_bytes());
    hasher.update(artifact.schema_version.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.status.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.dynamics.as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.representation.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(&artifact.certificate.shape)?);
    hasher.update(b"\n");
    hasher.update(if artifact.certificate.time_varying {
        b"time_varying\n".as_slice()
    } else {
        b"time_invariant\n".as_slice()
    });
    for p in &artifact.certificate.params {
        hasher.update(format!("{:016x}", p.to_bits()).as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(&artifact.run_config)?);
    hasher.update(b"\n");
    hasher.update(format!("{:016x}", artifact.epsilon.to_bits()).as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.iterations.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.counterexample_count.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(artifact.failure.clone().unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    Ok(hex(&hasher.finalize()))
}

/// Seal `artifact` and write it as `<dir>/certificate.json`, creating `dir`
/// if needed. Returns the written path.
pub fn save_artifact(
    dir: &Path,
    artifact: &mut CertificateArtifact,
) -> Result<PathBuf, ArtifactError> {
    artifact.seal()?;
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = artifact_path(dir);
    let text = serde_json::to_string_pretty(artifact)?;
    fs::write(&path, text).map_err(|source| ArtifactError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Read `<dir>/certificate.json` without checking its integrity.
pub fn load_artifact(dir: &Path) -> Result<CertificateArtifact, ArtifactError> {
    let path = artifact_path(dir);
    let text = fs::read_to_string(&path).map_err(|source| ArtifactError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Read an artifact and reject it if any integrity issue is found.
pub fn load_checked_artifact(dir: &Path) -> Result<CertificateArtifact, ArtifactError> {
    let report = check_artifact_integrity(dir)?;
    if report.is_ok() {
        Ok(report.artifact)
    } else {
        Err(ArtifactError::Integrity {
            path: artifact_path(dir),
            issues: report.issues,
        })
    }
}

/// Validate the structure and hash of the artifact in `dir`.
///
/// Load and decode failures are errors; everything else is reported as an
/// [`ArtifactIssue`].
pub fn check_artifact_integrity(dir: &Path) -> Result<ArtifactIntegrityReport, ArtifactError> {
    let artifact = load_artifact(dir)?;
    let issues = artifact_issues(&artifact)?;
    Ok(ArtifactIntegrityReport { artifact, issues })
}

/// Issues with an in-memory artifact.
pub fn artifact_issues(
    artifact: &CertificateArtifact,
) -> Result<Vec<ArtifactIssue>, ArtifactError> {
    let mut issues = Vec::new();

    if artifact.schema_version != ARTIFACT_SCHEMA_VERSION {
        issues.push(ArtifactIssue {
            code: "schema_version",
            message: format!(
                "Unsupported artifact schema version {} (expected exactly {}).",
                artifact.schema_version, ARTIFACT_SCHEMA_VERSION
            ),
        });
    }

    match &artifact.sha256 {
        None => issues.push(ArtifactIssue {
            code: "missing_hash",
            message: "Artifact carries no integrity hash.".into(),
        }),
        Some(recorded) => {
            let expected = compute_artifact_sha256(artifact)?;
            if *recorded != expected {
                issues.push(ArtifactIssue {
                    code: "hash_mismatch",
                    message: format!(
                        "Integrity hash mismatch: recorded {recorded}, computed {expected}."
                    ),
                });
            }
        }
    }

    if let Err(err) = artifact.certificate.check() {
        issues.push(ArtifactIssue {
            code: "malformed_certificate",
            message: format!("Certificate is malformed: {err}."),
        });
    }

    if artifact.representation != artifact.certificate.kind() {
        issues.push(ArtifactIssue {
            code: "representation_mismatch",
            message: format!(
                "Declared representation '{}' does not match the shape '{}'.",
                artifact.representation,
                artifact.certificate.kind()
            ),
        });
    }

    if artifact.epsilon.to_bits() != artifact.run_config.epsilon.to_bits() {
        issues.push(ArtifactIssue {
            code: "epsilon_mismatch",
            message: format!(
                "Recorded epsilon {} differs from the run configuration's {}.",
                artifact.epsilon, artifact.run_config.epsilon
            ),
        });
    }

    if let Err(err) = artifact.run_config.validate() {
        issues.push(ArtifactIssue {
            code: "invalid_run_config",
            message: format!("Recorded run configuration is invalid: {err}."),
        });
    }

    if artifact.is_verified() && artifact.failure.is_some() {
        issues.push(ArtifactIssue {
            code: "verified_with_failure",
            message: "Artifact is marked verified but records a failure reason.".into(),
        });
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use certreach_ir::certificate::{CertificateShape, PolynomialShape};

    fn artifact() -> CertificateArtifact {
        let shape = PolynomialShape {
            input_dim: 2,
            degree: 1,
        };
        let cert =
            Certificate::from_params(CertificateShape::Polynomial(shape), true, vec![0.0, 0.1, 1.0])
                .unwrap();
        let mut a = CertificateArtifact::new(
            ArtifactStatus::Verified,
            "still",
            cert,
            RunConfig {
                use_polynomial: true,
                poly_degree: 1,
                ..RunConfig::default()
            },
        );
        a.iterations = 3;
        a.counterexample_count = 2;
        a
    }

    #[test]
    fn save_then_load_passes_the_integrity_check() {
        let dir = tempfile::tempdir().unwrap();
        let exp = artifact_dir(dir.path(), "exp");
        let mut a = artifact();
        let path = save_artifact(&exp, &mut a).unwrap();
        assert_eq!(path, exp.join(ARTIFACT_FILE_NAME));

        let report = check_artifact_integrity(&exp).unwrap();
        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.artifact, a);
        assert_eq!(load_checked_artifact(&exp).unwrap(), a);
    }

    #[test]
    fn hash_changes_with_any_parameter() {
        let a = artifact();
        let mut b = a.clone();
        b.certificate.params[1] = 0.1 + f64::EPSILON;
        assert_ne!(
            compute_artifact_sha256(&a).unwrap(),
            compute_artifact_sha256(&b).unwrap()
        );
        let mut c = a.clone();
        c.status = ArtifactStatus::Unverified;
        assert_ne!(
            compute_artifact_sha256(&a).unwrap(),
            compute_artifact_sha256(&c).unwrap()
        );
    }

    #[test]
    fn tampered_artifact_is_flagged_and_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = artifact();
        a.status = ArtifactStatus::Unverified;
        save_artifact(dir.path(), &mut a).unwrap();

        let path = artifact_path(dir.path());
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\"unverified\"", "\"verified\"")).unwrap();

        let report = check_artifact_integrity(dir.path()).unwrap();
        let codes: Vec<&str> = report.issues.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec!["hash_mismatch"]);
        assert!(matches!(
            load_checked_artifact(dir.path()),
            Err(ArtifactError::Integrity { .. })
        ));
    }

    #[test]
    fn structural_issues_are_all_reported() {
        let mut a = artifact();
        a.schema_version = 99;
        a.representation = RepresentationKind::Learned;
        a.epsilon = 0.5;
        a.failure = Some("stall_cap".into());
        a.certificate.params.pop();
        let codes: Vec<&str> = artifact_issues(&a).unwrap().iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![
                "schema_version",
                "missing_hash",
                "malformed_certificate",
                "representation_mismatch",
                "epsilon_mismatch",
                "verified_with_failure",
            ]
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = artifact();
        save_artifact(dir.path(), &mut a).unwrap();
        let path = artifact_path(dir.path());
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replacen('{', "{\"extra\": 1,", 1)).unwrap();
        assert!(matches!(load_artifact(dir.path()), Err(ArtifactError::Json(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_artifact(&dir.path().join("nope")),
            Err(ArtifactError::Io { .. })
        ));
    }
}
