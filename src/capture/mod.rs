//! Capture engine: interceptor, sessions and the multi-generation protocol

mod discovered;
mod error;
mod interceptor;
mod launcher;
mod resume;
mod session;
mod two_pass;

pub use discovered::DiscoveredSet;
pub use error::CaptureError;
pub use interceptor::{Adder, Interceptor, InterceptorHooks};
pub use launcher::{GenerationLauncher, LaunchExit, ProcessLauncher};
pub use resume::{ResumeToken, ResumeTokenError, RESUME_TOKEN_VERSION};
pub use session::{CaptureRequest, CaptureSession, Capturer, GenerationReport};
pub use two_pass::TwoPassCapturer;
