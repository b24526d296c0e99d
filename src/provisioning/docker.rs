//! # Docker Backend
//!
//! Provisions each worker as a detached container running this binary in
//! `worker` mode. The container joins the bus under a fresh node id, so process
//! steps for the worker are dispatched to the container rather than this node.
//!
//! ## Template parameters
//!
//! | Param | Docker flag |
//! |-------|-------------|
//! | `user` | `--user` |
//! | `memory_mb` | `--memory <n>m` |
//! | `cpus` | `--cpus` |
//! | `env.<NAME>` | `-e NAME=<value>` |

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::backend::ProvisioningBackend;
use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseResult};
use crate::messaging::{subjects, MessageBus};
use crate::models::Worker;
use crate::node::NodeId;
use crate::state_machine::{WorkerEvent, WorkerState};

/// Path of the worker binary inside the container
const CONTAINER_BIN_PATH: &str = "/usr/local/bin/remote-make";
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);
const REMOVAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSettings {
    /// Docker CLI executable
    pub binary: String,
    /// Passed as `DOCKER_HOST` when set
    pub host: Option<String>,
    /// Image used when the worker template names none
    pub default_image: Option<String>,
    /// Host path of the binary mounted into the container
    pub worker_bin_path: String,
    /// Bus address as seen from inside the container
    pub worker_bus_url: String,
    /// How long to wait for the container's node to answer a ping
    pub readiness_timeout: Duration,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            host: None,
            default_image: None,
            worker_bin_path: "./target/release/remote-make".to_string(),
            worker_bus_url: "host.docker.internal:4222".to_string(),
            readiness_timeout: Duration::from_secs(30),
        }
    }
}

pub struct DockerBackend {
    settings: DockerSettings,
    bus: Option<Arc<dyn MessageBus>>,
}

impl std::fmt::Debug for DockerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerBackend")
            .field("settings", &self.settings)
            .field("waits_for_readiness", &self.bus.is_some())
            .finish()
    }
}

pub fn container_name(worker: &Worker) -> String {
    format!("remote-make-worker-{}", worker.id)
}

/// Docker CLI invocation settings, owned so background removals can outlive the backend call
#[derive(Debug, Clone)]
struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    async fn run(&self, ctx: &ExecutionContext, args: &[String]) -> Result<String, String> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(host) = &self.host {
            command.env("DOCKER_HOST", host);
        }

        debug!(args = ?args, "Running docker");
        match ctx.run(command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => Err(format!(
                "docker exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Err(e)) => Err(format!("failed to run {}: {e}", self.binary)),
            Err(interrupted) => Err(interrupted.to_string()),
        }
    }

    /// `docker rm -f` on a fresh bounded context; failures are logged, not returned
    async fn remove(&self, container: &str) {
        let ctx = ExecutionContext::with_timeout(REMOVAL_TIMEOUT);
        let args = ["rm".to_string(), "-f".to_string(), container.to_string()];
        match self.run(&ctx, &args).await {
            Ok(_) => info!(container = %container, "Removed container"),
            Err(reason) => warn!(
                container = %container,
                reason = %reason,
                "Failed to remove container, it must be removed by hand"
            ),
        }
    }
}

/// Removes a container started during provisioning unless disarmed.
///
/// If the provision future is dropped mid-flight (caller cancelled, deadline
/// passed) the guard is dropped armed and schedules the removal on the
/// current runtime.
struct ContainerRollback {
    cli: DockerCli,
    container: String,
    armed: bool,
}

impl ContainerRollback {
    fn new(cli: DockerCli, container: String) -> Self {
        Self {
            cli,
            container,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn remove(mut self) {
        self.cli.remove(&self.container).await;
        self.armed = false;
    }
}

impl Drop for ContainerRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(container = %self.container, "Provisioning abandoned, removing container");
                let cli = self.cli.clone();
                let container = std::mem::take(&mut self.container);
                runtime.spawn(async move { cli.remove(&container).await });
            }
            Err(_) => warn!(
                container = %self.container,
                "Provisioning abandoned outside a runtime, container left behind"
            ),
        }
    }
}

impl DockerBackend {
    pub const NAME: &'static str = "docker";

    pub fn new(settings: DockerSettings) -> Self {
        Self {
            settings,
            bus: None,
        }
    }

    /// Wait for the container's node to answer `node.<id>.ping` before reporting it provisioned
    #[must_use]
    pub fn with_readiness_probe(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Arguments for `docker run`
    pub fn run_args(&self, worker: &Worker, node_id: NodeId, image: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name(worker),
            "--add-host".to_string(),
            "host.docker.internal:host-gateway".to_string(),
            "-v".to_string(),
            format!("{}:{CONTAINER_BIN_PATH}:ro", self.settings.worker_bin_path),
            "-e".to_string(),
            format!("NODE_UUID={node_id}"),
            "-e".to_string(),
            format!("BUS_URL={}", self.settings.worker_bus_url),
            "-e".to_string(),
            "STEP_RUNNER_ENABLED=true".to_string(),
            "-e".to_string(),
            "TASK_RUNNER_ENABLED=false".to_string(),
            "-e".to_string(),
            "NODE_MANAGER_ENABLED=false".to_string(),
            "-e".to_string(),
            "REMOTE_MAKE__BUS__TRANSPORT=tcp".to_string(),
            "-e".to_string(),
            "REMOTE_MAKE__BUS__EMBEDDED_BROKER=false".to_string(),
        ];

        for (key, value) in &worker.template.params {
            match key.as_str() {
                "user" => args.extend(["--user".to_string(), value.clone()]),
                "memory_mb" => args.extend(["--memory".to_string(), format!("{value}m")]),
                "cpus" => args.extend(["--cpus".to_string(), value.clone()]),
                other => {
                    if let Some(name) = other.strip_prefix("env.") {
                        args.extend(["-e".to_string(), format!("{name}={value}")]);
                    }
                }
            }
        }

        args.push(image.to_string());
        args.push(CONTAINER_BIN_PATH.to_string());
        args.push("worker".to_string());
        args
    }

    fn cli(&self) -> DockerCli {
        DockerCli {
            binary: self.settings.binary.clone(),
            host: self.settings.host.clone(),
        }
    }

    async fn wait_until_ready(&self, ctx: &ExecutionContext, node_id: NodeId) -> Result<(), String> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let probe_ctx = ctx.child_with_timeout(self.settings.readiness_timeout);
        let subject = subjects::node_ping(node_id);

        loop {
            match bus
                .request(&probe_ctx, &subject, Vec::new(), READINESS_POLL_INTERVAL * 4)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) if e.is_no_responders() => {}
                Err(e) => debug!(node_id = %node_id, error = %e, "Readiness probe failed"),
            }
            if probe_ctx
                .run(tokio::time::sleep(READINESS_POLL_INTERVAL))
                .await
                .is_err()
            {
                return Err(format!(
                    "node {node_id} did not answer within {:?}",
                    self.settings.readiness_timeout
                ));
            }
        }
    }
}

#[async_trait]
impl ProvisioningBackend for DockerBackend {
    async fn provision(&self, ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        let image = match worker
            .template
            .image
            .clone()
            .or_else(|| self.settings.default_image.clone())
        {
            Some(image) => image,
            None => {
                let error = OrchestratorError::invalid_template(
                    worker.template.id,
                    "docker backend requires an image",
                );
                return Err(worker.reject(error));
            }
        };

        if let Err(e) = worker.transition(WorkerEvent::Provision) {
            return Err(worker.reject(e.into()));
        }

        let node_id = NodeId::new();
        let args = self.run_args(&worker, node_id, &image);
        let rollback = ContainerRollback::new(self.cli(), container_name(&worker));

        let container_id = match self.cli().run(ctx, &args).await {
            Ok(id) => id,
            Err(reason) => {
                // docker may have created the container before failing or being interrupted
                rollback.remove().await;
                let error =
                    OrchestratorError::backend_failed(Self::NAME, worker.id, "provision", reason);
                return Err(worker.reject(error));
            }
        };

        if let Err(reason) = self.wait_until_ready(ctx, node_id).await {
            warn!(worker_id = %worker.id, reason = %reason, "Container never became ready, removing it");
            rollback.remove().await;
            let error = OrchestratorError::backend_failed(Self::NAME, worker.id, "provision", reason);
            return Err(worker.reject(error));
        }

        worker.node_id = Some(node_id);
        if let Err(e) = worker.transition(WorkerEvent::Provisioned) {
            rollback.remove().await;
            return Err(worker.reject(e.into()));
        }
        rollback.disarm();
        info!(
            worker_id = %worker.id,
            node_id = %node_id,
            container_id = %container_id,
            image = %image,
            "Provisioned docker worker"
        );
        Ok(worker)
    }

    async fn terminate(&self, ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        if worker.state != WorkerState::Provisioned {
            debug!(worker_id = %worker.id, state = %worker.state, "Nothing to terminate");
            return Ok(worker);
        }
        if let Err(e) = worker.transition(WorkerEvent::Terminate) {
            return Err(worker.reject(e.into()));
        }

        let args = ["rm".to_string(), "-f".to_string(), container_name(&worker)];
        if let Err(reason) = self.cli().run(ctx, &args).await {
            let error = OrchestratorError::backend_failed(Self::NAME, worker.id, "terminate", reason);
            return Err(worker.reject(error));
        }

        if let Err(e) = worker.transition(WorkerEvent::Terminated) {
            return Err(worker.reject(e.into()));
        }
        info!(worker_id = %worker.id, "Terminated docker worker");
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::messaging::InMemoryMessageBus;
    use crate::models::WorkerTemplate;
    use crate::provisioning::{WorkerLifecycle, WorkerLifecycleManager};
    use std::path::{Path, PathBuf};

    /// Shell script standing in for the docker CLI; appends its arguments to a log
    #[cfg(unix)]
    fn fake_docker(dir: &Path) -> (String, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\necho fake-container-id\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), log)
    }

    fn calls(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .map(|contents| contents.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    async fn wait_for_call(log: &Path, expected: &str) -> bool {
        for _ in 0..100 {
            if calls(log).iter().any(|call| call == expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn fake_settings(binary: String, readiness_timeout: Duration) -> DockerSettings {
        DockerSettings {
            binary,
            default_image: Some("alpine:3".to_string()),
            readiness_timeout,
            ..DockerSettings::default()
        }
    }

    #[test]
    fn test_run_args_carry_node_identity_and_params() {
        let backend = DockerBackend::new(DockerSettings::default());
        let worker = Worker::new(
            WorkerTemplate::new("docker")
                .with_image("alpine:3")
                .with_param("memory_mb", "512")
                .with_param("env.FOO", "bar"),
        );
        let node = NodeId::new();
        let args = backend.run_args(&worker, node, "alpine:3");

        assert_eq!(&args[..2], &["run".to_string(), "-d".to_string()]);
        assert!(args.contains(&container_name(&worker)));
        assert!(args.contains(&format!("NODE_UUID={node}")));
        assert!(args.contains(&"512m".to_string()));
        assert!(args.contains(&"FOO=bar".to_string()));
        assert_eq!(
            &args[args.len() - 3..],
            &[
                "alpine:3".to_string(),
                CONTAINER_BIN_PATH.to_string(),
                "worker".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_image_is_configuration_error() {
        let backend = DockerBackend::new(DockerSettings::default());
        let failure = backend
            .provision(
                &ExecutionContext::background(),
                Worker::new(WorkerTemplate::new("docker")),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Configuration);
        assert_eq!(failure.entity.state, WorkerState::Error);
    }

    #[tokio::test]
    async fn test_missing_docker_binary_fails_provisioning() {
        let backend = DockerBackend::new(DockerSettings {
            binary: "/nonexistent/docker".to_string(),
            default_image: Some("alpine".to_string()),
            ..DockerSettings::default()
        });
        let failure = backend
            .provision(
                &ExecutionContext::background(),
                Worker::new(WorkerTemplate::new("docker")),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Execution);
        assert_eq!(failure.entity.state, WorkerState::Error);
        assert!(failure.entity.node_id.is_none());
    }

    #[tokio::test]
    async fn test_terminate_unprovisioned_is_noop() {
        let backend = DockerBackend::new(DockerSettings {
            binary: "/nonexistent/docker".to_string(),
            ..DockerSettings::default()
        });
        let worker = Worker::new(WorkerTemplate::new("docker"));
        let returned = backend
            .terminate(&ExecutionContext::background(), worker.clone())
            .await
            .unwrap();
        assert_eq!(returned, worker);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_provision_removes_started_container() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, log) = fake_docker(dir.path());
        // Nobody answers the ping, so provisioning sits in the readiness wait
        let backend = DockerBackend::new(fake_settings(binary, Duration::from_secs(30)))
            .with_readiness_probe(Arc::new(InMemoryMessageBus::new()));
        let manager =
            WorkerLifecycleManager::new().with_backend(DockerBackend::NAME, Arc::new(backend));

        let ctx = ExecutionContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let failure = manager
            .provision(&ctx, &WorkerTemplate::new(DockerBackend::NAME))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Cancelled);

        let container = container_name(&failure.entity);
        assert!(calls(&log)[0].starts_with(&format!("run -d --name {container}")));
        assert!(
            wait_for_call(&log, &format!("rm -f {container}")).await,
            "container left running: {:?}",
            calls(&log)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unready_container_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, log) = fake_docker(dir.path());
        let backend = DockerBackend::new(fake_settings(binary, Duration::from_millis(300)))
            .with_readiness_probe(Arc::new(InMemoryMessageBus::new()));
        let worker = Worker::new(WorkerTemplate::new(DockerBackend::NAME));
        let container = container_name(&worker);

        let failure = backend
            .provision(&ExecutionContext::background(), worker)
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Execution);
        assert_eq!(failure.entity.state, WorkerState::Error);
        assert_eq!(calls(&log).last(), Some(&format!("rm -f {container}")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_container_is_kept_until_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, log) = fake_docker(dir.path());
        let backend = DockerBackend::new(fake_settings(binary, Duration::from_secs(5)));
        let ctx = ExecutionContext::background();

        let worker = backend
            .provision(&ctx, Worker::new(WorkerTemplate::new(DockerBackend::NAME)))
            .await
            .unwrap();
        assert_eq!(worker.state, WorkerState::Provisioned);
        assert_eq!(calls(&log).len(), 1);

        let container = container_name(&worker);
        let worker = backend.terminate(&ctx, worker).await.unwrap();
        assert_eq!(worker.state, WorkerState::Terminated);
        assert_eq!(calls(&log), vec![calls(&log)[0].clone(), format!("rm -f {container}")]);
    }
}
