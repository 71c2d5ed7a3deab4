//! End-to-end push pipeline.
//!
//! [`push_policies`] drives a push through a fixed sequence of phases:
//!
//! ```text
//! Idle ──► Loading ──► Validating ──► Assembling ──► Publishing ──► Done
//!   │         │            │              │              │
//!   └─────────┴────────────┴──────────────┴──────────────┴──► Failed
//! ```
//!
//! The first failure ends the push. Nothing reaches the registry unless every
//! policy loaded, validated and serialized.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use dike_core::{load_policies, validate_all, LoadError, Policy, PolicyKind, PolicyScope};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::CredentialResolver;
use crate::error::RegistryError;
use crate::image::{Addendum, ImageBuilder, PolicyImage};
use crate::reference::Reference;

/// Destination for finished images.
///
/// [`RegistryClient`](crate::RegistryClient) writes to an OCI registry;
/// tests substitute an in-memory writer.
#[async_trait]
pub trait ImageWriter: Send + Sync {
    /// Writes `image` under `reference` and returns the manifest digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be written, or
    /// [`RegistryError::Cancelled`] once `cancel` fires.
    async fn write(
        &self,
        reference: &Reference,
        image: PolicyImage,
        credentials: &dyn CredentialResolver,
        cancel: &CancellationToken,
    ) -> Result<String, RegistryError>;
}

/// What to push and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRequest {
    /// Policy files or directories.
    pub paths: Vec<PathBuf>,
    /// Destination image reference.
    pub reference: String,
}

impl PushRequest {
    /// Creates a request pushing `paths` to `reference`.
    pub fn new<P: Into<PathBuf>>(
        reference: impl Into<String>,
        paths: impl IntoIterator<Item = P>,
    ) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            reference: reference.into(),
        }
    }

    /// Parses the destination reference.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Input`] if the reference is blank and
    /// [`PushError::ReferenceParse`] if it is malformed.
    pub fn parse_reference(&self) -> Result<Reference, PushError> {
        let reference = self.reference.trim();
        if reference.is_empty() {
            return Err(PushError::missing_reference());
        }
        Reference::parse(reference).map_err(PushError::ReferenceParse)
    }
}

/// Stage of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushPhase {
    /// Nothing has happened yet.
    Idle,
    /// Reading policy files.
    Loading,
    /// Checking every policy.
    Validating,
    /// Serializing policies into layers.
    Assembling,
    /// Writing the image.
    Publishing,
    /// The image was written.
    Done,
    /// The push stopped on an error.
    Failed,
}

impl PushPhase {
    /// Returns the phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Validating => "validating",
            Self::Assembling => "assembling",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notification emitted while pushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A new phase started.
    Phase(PushPhase),
    /// A policy is being added as a layer.
    PolicyAdded {
        /// Policy name.
        name: String,
        /// Policy kind.
        kind: PolicyKind,
        /// Policy scope.
        scope: PolicyScope,
    },
    /// The upload started.
    Uploading {
        /// Destination reference.
        reference: String,
    },
    /// The image was written.
    Done {
        /// Destination reference.
        reference: String,
        /// Manifest digest.
        digest: String,
    },
}

/// Result of a successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    /// Where the image was written.
    pub reference: Reference,
    /// Manifest digest.
    pub digest: String,
    /// Number of policy layers.
    pub layers: usize,
}

/// Why a push stopped.
#[derive(Debug, Error)]
pub enum PushError {
    /// The request itself is unusable.
    #[error("{message}")]
    Input {
        /// What is missing.
        message: String,
    },

    /// The destination reference did not parse.
    #[error("parsing image reference: {0}")]
    ReferenceParse(#[source] RegistryError),

    /// Policy files could not be read.
    #[error("unable to read policy file or directory {paths}: {source}")]
    Load {
        /// The requested paths.
        paths: String,
        /// Every failure encountered.
        #[source]
        source: LoadError,
    },

    /// Loading succeeded but found no policy.
    #[error("no policies found in {paths}")]
    NoPolicies {
        /// The requested paths.
        paths: String,
    },

    /// A policy failed validation.
    #[error(transparent)]
    Validation(dike_core::Error),

    /// A policy could not be serialized.
    #[error(transparent)]
    Serialization(dike_core::Error),

    /// A layer could not be added to the image.
    #[error("mutating image: {0}")]
    Assembly(#[source] RegistryError),

    /// The image could not be written.
    #[error("writing image: {0}")]
    Publish(#[source] RegistryError),

    /// The push was cancelled.
    #[error("push cancelled while {phase}")]
    Cancelled {
        /// Phase the push was in.
        phase: PushPhase,
    },
}

impl PushError {
    fn missing_reference() -> Self {
        Self::Input {
            message: "image reference is required".to_string(),
        }
    }

    /// Returns the phase in which the push failed.
    #[must_use]
    pub const fn phase(&self) -> PushPhase {
        match self {
            Self::Input { .. } | Self::ReferenceParse(_) => PushPhase::Idle,
            Self::Load { .. } | Self::NoPolicies { .. } => PushPhase::Loading,
            Self::Validation(_) => PushPhase::Validating,
            Self::Serialization(_) | Self::Assembly(_) => PushPhase::Assembling,
            Self::Publish(_) => PushPhase::Publishing,
            Self::Cancelled { phase } => *phase,
        }
    }
}

/// Packages `policies` into a policy image, one layer per policy, in order.
///
/// Emits [`PushEvent::PolicyAdded`] for each policy before its layer is
/// appended.
///
/// # Errors
///
/// Returns [`PushError::Serialization`] if a policy cannot be encoded and
/// [`PushError::Assembly`] if a layer is rejected or `policies` is empty.
pub fn assemble_image(
    policies: &[Policy],
    mut on_event: impl FnMut(&PushEvent),
) -> Result<PolicyImage, PushError> {
    let mut builder = ImageBuilder::policy_image();

    for policy in policies {
        on_event(&PushEvent::PolicyAdded {
            name: policy.name().to_string(),
            kind: policy.kind,
            scope: policy.scope(),
        });
        let addendum = Addendum::for_policy(policy).map_err(PushError::Serialization)?;
        builder = builder.append(addendum).map_err(PushError::Assembly)?;
    }

    builder.build().map_err(PushError::Assembly)
}

/// Loads, validates, packages and writes the policies named by `request`.
///
/// `on_event` observes progress; it is called on the calling task.
///
/// # Errors
///
/// Returns the first failure. Its [`PushError::phase`] names the stage that
/// failed; later stages never ran.
pub async fn push_policies<W, F>(
    request: &PushRequest,
    writer: &W,
    credentials: &dyn CredentialResolver,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<PushOutcome, PushError>
where
    W: ImageWriter + ?Sized,
    F: FnMut(&PushEvent),
{
    let result = run(request, writer, credentials, cancel, &mut on_event).await;

    match &result {
        Ok(outcome) => {
            info!(reference = %outcome.reference, digest = %outcome.digest, layers = outcome.layers, "Pushed policies");
            on_event(&PushEvent::Done {
                reference: outcome.reference.to_string(),
                digest: outcome.digest.clone(),
            });
            on_event(&PushEvent::Phase(PushPhase::Done));
        }
        Err(err) => {
            warn!(phase = %err.phase(), error = %err, "Push failed");
            on_event(&PushEvent::Phase(PushPhase::Failed));
        }
    }

    result
}

async fn run<W, F>(
    request: &PushRequest,
    writer: &W,
    credentials: &dyn CredentialResolver,
    cancel: &CancellationToken,
    on_event: &mut F,
) -> Result<PushOutcome, PushError>
where
    W: ImageWriter + ?Sized,
    F: FnMut(&PushEvent),
{
    let reference = request.parse_reference()?;

    enter(PushPhase::Loading, cancel, on_event)?;
    let paths = display_paths(&request.paths);
    let policies = load_policies(request.paths.as_slice()).map_err(|source| PushError::Load {
        paths: paths.clone(),
        source,
    })?;
    if policies.is_empty() {
        return Err(PushError::NoPolicies { paths });
    }
    debug!(count = policies.len(), "Loaded policies");

    enter(PushPhase::Validating, cancel, on_event)?;
    validate_all(&policies).map_err(PushError::Validation)?;

    enter(PushPhase::Assembling, cancel, on_event)?;
    let image = assemble_image(&policies, &mut *on_event)?;
    let layers = image.layers().len();

    enter(PushPhase::Publishing, cancel, on_event)?;
    on_event(&PushEvent::Uploading {
        reference: reference.to_string(),
    });

    let written = tokio::select! {
        () = cancel.cancelled() => Err(RegistryError::Cancelled),
        result = writer.write(&reference, image, credentials, cancel) => result,
    };
    let digest = written.map_err(|err| match err {
        RegistryError::Cancelled => PushError::Cancelled {
            phase: PushPhase::Publishing,
        },
        other => PushError::Publish(other),
    })?;

    Ok(PushOutcome {
        reference,
        digest,
        layers,
    })
}

fn enter<F>(phase: PushPhase, cancel: &CancellationToken, on_event: &mut F) -> Result<(), PushError>
where
    F: FnMut(&PushEvent),
{
    if cancel.is_cancelled() {
        return Err(PushError::Cancelled { phase });
    }
    debug!(%phase, "Entering phase");
    on_event(&PushEvent::Phase(phase));
    Ok(())
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
