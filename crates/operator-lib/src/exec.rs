//! Remote command execution inside pods

use crate::error::Result;
use crate::names::NamespacedName;
use async_trait::async_trait;

/// Captured output of a command run in a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Runs commands in a container of a pod.
///
/// A non-zero exit status is reported as an error.
#[async_trait]
pub trait PodRunner: Send + Sync {
    async fn exec_in_pod(
        &self,
        pod: &NamespacedName,
        container: &str,
        command: &[&str],
    ) -> Result<ExecOutput>;

    /// Write `payload` to `remote_path` in the container, then run
    /// `run_command` if it isn't empty. The output is that of the run command.
    async fn copy_to_pod(
        &self,
        pod: &NamespacedName,
        container: &str,
        payload: &[u8],
        remote_path: &str,
        run_command: &[&str],
    ) -> Result<ExecOutput>;

    /// Run vsql in the container with the given arguments
    async fn exec_vsql(
        &self,
        pod: &NamespacedName,
        container: &str,
        args: &[&str],
    ) -> Result<ExecOutput>;
}
