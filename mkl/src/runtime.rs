use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// The slice of the local container runtime the kubelet drives. Image
/// pulls and container lifecycle specifics stay behind this seam.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its runtime identifier.
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Containers carrying the given label key, whatever their state.
    async fn list_containers(&self, label_key: &str) -> Result<Vec<RuntimeContainer>>;
}

#[derive(Debug, Clone)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}

/// Drives the local docker daemon through its CLI.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "invoking container runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to invoke {}", self.binary))?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                self.binary,
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.run(&["pull", image]).await?;
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        labels: &HashMap<String, String>,
    ) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), name.into()];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        args.push(image.into());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).await?;
        Ok(())
    }

    async fn list_containers(&self, label_key: &str) -> Result<Vec<RuntimeContainer>> {
        let filter = format!("label={label_key}");
        let out = self
            .run(&[
                "ps",
                "--all",
                "--filter",
                &filter,
                "--format",
                "{{.ID}}\t{{.Names}}\t{{.State}}\t{{.Labels}}",
            ])
            .await?;

        let mut containers = Vec::new();
        for line in out.lines().filter(|line| !line.is_empty()) {
            let mut fields = line.splitn(4, '\t');
            let (Some(id), Some(name), Some(state)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let labels = fields
                .next()
                .unwrap_or("")
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            containers.push(RuntimeContainer {
                id: id.to_string(),
                name: name.to_string(),
                state: state.to_string(),
                labels,
            });
        }
        Ok(containers)
    }
}
