//! Drivers for the external Ultralytics `yolo` command-line tool.
//!
//! Training and export are not implemented here: each operation builds a
//! `yolo` invocation, runs it through a [`ToolRunner`], and inspects the files
//! the tool leaves behind.

pub mod device;
pub mod export;
pub mod metrics;
pub mod train;

use std::fmt;
use std::path::PathBuf;

use crate::error::DetkitError;

/// Default name of the Ultralytics CLI executable.
pub const DEFAULT_YOLO_BIN: &str = "yolo";

/// A program plus its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a `key=value` argument as the Ultralytics CLI expects.
    pub fn kv(self, key: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("{key}={value}"))
    }

    /// Value of a `key=value` argument, if present.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find_map(|arg| arg.strip_prefix(key)?.strip_prefix('='))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a tool invocation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Non-zero exit; holds the rendered exit status.
    Failed(String),
    /// The user pressed Ctrl+C while the tool was running.
    Interrupted,
}

/// Executes tool invocations.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<RunStatus, DetkitError>;
}

/// Runs invocations as child processes with inherited stdio.
///
/// While a child runs, Ctrl+C is caught: the child is stopped and the run
/// reports [`RunStatus::Interrupted`] instead of this process dying.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<RunStatus, DetkitError> {
        let program = invocation.program.display().to_string();
        let toolchain_error = |message: String| DetkitError::Toolchain {
            program: program.clone(),
            message,
        };

        tracing::debug!(command = %invocation, "spawning tool");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let mut child = tokio::process::Command::new(&invocation.program)
                .args(&invocation.args)
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| toolchain_error(e.to_string()))?;

            tokio::select! {
                status = child.wait() => {
                    let status = status.map_err(|e| toolchain_error(e.to_string()))?;
                    if status.success() {
                        Ok(RunStatus::Success)
                    } else {
                        Ok(RunStatus::Failed(status.to_string()))
                    }
                }
                Ok(()) = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupt received; stopping {}", program);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    Ok(RunStatus::Interrupted)
                }
            }
        })
    }
}

/// Location of the `yolo` executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct YoloCli {
    pub program: PathBuf,
}

impl YoloCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.program)
    }
}

impl Default for YoloCli {
    fn default() -> Self {
        Self::new(DEFAULT_YOLO_BIN)
    }
}

/// Python-style boolean literal for `key=value` arguments.
pub(crate) fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_renders_key_value_args() {
        let inv = YoloCli::default()
            .invocation()
            .arg("export")
            .kv("format", "onnx")
            .kv("simplify", py_bool(true));

        assert_eq!(inv.to_string(), "yolo export format=onnx simplify=True");
        assert_eq!(inv.value_of("format"), Some("onnx"));
        assert_eq!(inv.value_of("form"), None);
        assert_eq!(inv.value_of("missing"), None);
    }

    #[test]
    fn missing_program_is_a_toolchain_error() {
        let inv = Invocation::new("/nonexistent/detkit-test-yolo").arg("version");
        let err = ProcessRunner.run(&inv).unwrap_err();
        assert!(matches!(err, DetkitError::Toolchain { .. }));
    }
}
