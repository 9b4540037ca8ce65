//! Execution-verified dependency capture
//!
//! depcapture runs a program's entry point against a set of base paths and
//! records exactly the units and resources the run resolved, optionally
//! persisting them into a store that can replace the original paths.

pub mod artifact;
pub mod capture;
pub mod config;
pub mod runtime;
pub mod store;
pub mod util;

pub use artifact::{Artifact, ArtifactIndex, ArtifactKey, ArtifactKind};
pub use capture::{
    CaptureError, CaptureRequest, CaptureSession, Capturer, GenerationLauncher, GenerationReport,
    ProcessLauncher, ResumeToken, TwoPassCapturer,
};
pub use config::Config;
pub use runtime::{Environment, ExecError, InstallMode, Invocation};
pub use store::{ArtifactSink, PersistenceSink, Store, StoreOutcome};
