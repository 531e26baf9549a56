//! `PodRunner` that runs commands through the pod exec subresource

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess};
use kube::Client;
use operator_lib::error::{ReconcileError, Result};
use operator_lib::exec::{ExecOutput, PodRunner};
use operator_lib::NamespacedName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const VSQL: &str = "/opt/vertica/bin/vsql";

#[derive(Clone)]
pub struct KubeExecRunner {
    client: Client,
}

impl KubeExecRunner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn run(
        &self,
        pod: &NamespacedName,
        container: &str,
        command: Vec<String>,
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput> {
        debug!(pod = %pod, container, cmd = ?command, "Exec in pod");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);
        let mut proc = api
            .exec(&pod.name, command, &params)
            .await
            .map_err(|e| ReconcileError::exec(pod, e.to_string()))?;

        if let Some(payload) = stdin {
            if let Some(mut writer) = proc.stdin() {
                writer
                    .write_all(payload)
                    .await
                    .map_err(|e| ReconcileError::exec(pod, format!("writing stdin: {e}")))?;
                writer
                    .shutdown()
                    .await
                    .map_err(|e| ReconcileError::exec(pod, format!("closing stdin: {e}")))?;
            }
        }
        collect_output(pod, proc).await
    }
}

/// Drain stdout and stderr, then check the exit status
async fn collect_output(pod: &NamespacedName, mut proc: AttachedProcess) -> Result<ExecOutput> {
    let status = proc.take_status();
    let stdout_reader = proc.stdout();
    let stderr_reader = proc.stderr();

    let read_stdout = async {
        let mut buf = String::new();
        if let Some(mut r) = stdout_reader {
            r.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_stderr = async {
        let mut buf = String::new();
        if let Some(mut r) = stderr_reader {
            r.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
    let output = ExecOutput {
        stdout: stdout.map_err(|e| ReconcileError::exec(pod, format!("reading stdout: {e}")))?,
        stderr: stderr.map_err(|e| ReconcileError::exec(pod, format!("reading stderr: {e}")))?,
    };

    if let Some(status) = status {
        if let Some(s) = status.await {
            if s.status.as_deref() == Some("Failure") {
                let message = s.message.unwrap_or_default();
                return Err(ReconcileError::exec(
                    pod,
                    format!("{message}: {}", output.stderr.trim()),
                ));
            }
        }
    }
    Ok(output)
}

#[async_trait]
impl PodRunner for KubeExecRunner {
    async fn exec_in_pod(
        &self,
        pod: &NamespacedName,
        container: &str,
        command: &[&str],
    ) -> Result<ExecOutput> {
        let command = command.iter().map(|s| s.to_string()).collect();
        self.run(pod, container, command, None).await
    }

    async fn copy_to_pod(
        &self,
        pod: &NamespacedName,
        container: &str,
        payload: &[u8],
        remote_path: &str,
        run_command: &[&str],
    ) -> Result<ExecOutput> {
        let write = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > '{remote_path}'"),
        ];
        let out = self.run(pod, container, write, Some(payload)).await?;
        if run_command.is_empty() {
            return Ok(out);
        }
        self.exec_in_pod(pod, container, run_command).await
    }

    async fn exec_vsql(
        &self,
        pod: &NamespacedName,
        container: &str,
        args: &[&str],
    ) -> Result<ExecOutput> {
        let command = std::iter::once(VSQL)
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        self.run(pod, container, command, None).await
    }
}
