//! Error kinds for the blueprint composition / OCI / module-resolver pipeline.
//!
//! Each kind mirrors a boundary named in the design: the core never swallows
//! errors silently, and every variant carries whatever context (expression
//! text, feature path, tar entry name, component path) its caller needs to
//! render a useful message. `WindsorError` is the aggregate every public
//! operation in this crate returns, the same role `EngineError` plays over
//! the teacher's own per-subsystem error enums.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigResolutionError {
    #[error("required configuration key `{key}` could not be resolved")]
    MissingKey { key: String },

    #[error("shell could not resolve project root: {reason}")]
    ProjectRootNotFound { reason: String },

    #[error("required collaborator `{name}` was not injected")]
    MissingDependency { name: String },

    #[error("environment variable `{var}` is not valid unicode")]
    InvalidEnvVar { var: String },
}

#[derive(Debug, Error)]
pub enum TemplateCompositionError {
    #[error("expression `{expr}` in {feature_path} failed to compile: {source}")]
    Compile {
        expr: String,
        feature_path: String,
        #[source]
        source: evalexpr::EvalexprError,
    },

    #[error("expression `{expr}` in {feature_path} failed to evaluate: {source}")]
    Evaluate {
        expr: String,
        feature_path: String,
        #[source]
        source: evalexpr::EvalexprError,
    },

    #[error("expression `{expr}` in {feature_path} did not evaluate to a boolean")]
    NotBoolean { expr: String, feature_path: String },

    #[error("unclosed `${{` interpolation in {feature_path}: `{text}`")]
    UnclosedInterpolation { feature_path: String, text: String },

    #[error("jsonnet evaluation of {path} failed: {message}")]
    Jsonnet { path: PathBuf, message: String },

    #[error("malformed feature file {path}: {message}")]
    MalformedFeature { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum IOError {
    #[error("I/O error at {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum OCIReferenceError {
    #[error("oci reference `{reference}` is missing the required `oci://` scheme")]
    MissingScheme { reference: String },

    #[error("oci reference `{reference}` is missing a tag")]
    MissingTag { reference: String },

    #[error("oci reference `{reference}` has no registry component")]
    MissingRegistry { reference: String },

    #[error("oci reference `{reference}` has more than one `:` separating the tag")]
    AmbiguousTag { reference: String },

    #[error("oci reference `{reference}` has a tag that does not match the distribution spec's tag grammar")]
    InvalidTag { reference: String },
}

#[derive(Debug, Error)]
pub enum OCITransportError {
    #[error("failed to push artifact {reference}: {message}")]
    Push { reference: String, message: String },

    #[error("failed to pull artifact {reference}: {message}")]
    Pull { reference: String, message: String },
}

#[derive(Debug, Error)]
pub enum ExtractionSafetyError {
    #[error("tar entry `{entry}` would escape extraction root {root}")]
    PathTraversal { entry: String, root: PathBuf },

    #[error("tar entry `{entry}` uses an absolute path")]
    AbsolutePath { entry: String },
}

#[derive(Debug, Error)]
pub enum ModuleResolutionError {
    #[error("malformed terraform component source `{source}`: {message}")]
    MalformedSource { source: String, message: String },

    #[error("failed to materialize git module `{url}` at `{reference}`: {message}")]
    Git { url: String, reference: String, message: String },

    #[error("failed to generate terraform shim at {path}: {message}")]
    Shim { path: PathBuf, message: String },

    #[error("failed to resolve terraform component `{component_path}`: {source}")]
    Component {
        component_path: String,
        #[source]
        source: Box<ModuleResolutionError>,
    },
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("cluster operation `{operation}` failed: {message}")]
    ClusterClient { operation: String, message: String },

    #[error("waiter gave up after {attempts} consecutive failures, last error: {last_error}")]
    ConsecutiveFailures { attempts: u32, last_error: String },

    #[error("failed to remove cleanup kustomization `{name}`: {source}")]
    CleanupDeletionFailed { name: String, source: String },
}

#[derive(Debug, Error)]
#[error("timed out after {elapsed:?} waiting for kustomizations {names:?} to become ready")]
pub struct TimeoutError {
    pub elapsed: Duration,
    pub names: Vec<String>,
}

#[derive(Debug, Error)]
pub enum WindsorError {
    #[error(transparent)]
    Config(#[from] ConfigResolutionError),

    #[error(transparent)]
    TemplateComposition(#[from] TemplateCompositionError),

    #[error(transparent)]
    Io(#[from] IOError),

    #[error(transparent)]
    OciReference(#[from] OCIReferenceError),

    #[error(transparent)]
    OciTransport(#[from] OCITransportError),

    #[error(transparent)]
    ExtractionSafety(#[from] ExtractionSafetyError),

    #[error(transparent)]
    ModuleResolution(#[from] ModuleResolutionError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl From<std::io::Error> for WindsorError {
    fn from(source: std::io::Error) -> Self {
        WindsorError::Io(IOError::Other(source))
    }
}
