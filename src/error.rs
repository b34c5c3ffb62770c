//! Failures that callers need to tell apart. Everything else travels as a plain
//! `failure::Error`.

#[derive(Debug, Fail)]
pub enum BenchError {
    /// A command that was not allowed to fail exited with a non-zero status (or was killed by a
    /// signal, in which case `status` is `None`).
    #[fail(display = "command `{}` failed with status {:?}", command, status)]
    CommandFailed {
        command: String,
        status: Option<i32>,
    },

    /// The backing device already exists, so somebody (probably a previous run) holds the stack.
    #[fail(display = "already loaded ({} exists). Unload first", device)]
    AlreadyLoaded { device: String },

    /// The backend cannot do what was asked of it.
    #[fail(display = "invalid backend {} for {}", backend, operation)]
    InvalidBackend {
        backend: String,
        operation: &'static str,
    },

    #[fail(display = "invalid configuration: {}", _0)]
    InvalidConfig(String),

    #[fail(display = "missing required option --{}", _0)]
    MissingOption(&'static str),
}

impl BenchError {
    /// A short description of the error class, printed by `main` under the error banner.
    pub fn hint(&self) -> &'static str {
        match self {
            BenchError::CommandFailed { .. } => {
                "An external tool failed. Its own diagnostics are printed above. Run `unload` \
                 to clean up whatever was already set up."
            }
            BenchError::AlreadyLoaded { .. } => {
                "The storage stack is already set up. Run `unload` before starting a new run."
            }
            BenchError::InvalidBackend { .. }
            | BenchError::InvalidConfig(..)
            | BenchError::MissingOption(..) => {
                "The configuration is invalid. Nothing was touched."
            }
        }
    }
}
