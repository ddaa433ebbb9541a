use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use super::{AttachHandle, ContainerDriver, DriverError, DriverResult};

#[derive(Debug, Clone)]
pub struct DockerDriverConfig {
    pub base_image: String,
    pub network_name: String,
    pub memory_limit_bytes: i64,
    pub nano_cpus: i64,
    pub storage_limit_mb: i64,
}

#[derive(Clone)]
pub struct DockerDriver {
    client: Arc<Docker>,
    config: DockerDriverConfig,
}

impl DockerDriver {
    pub fn new(socket_path: &str, config: DockerDriverConfig) -> DriverResult<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn container_name(box_id: uuid::Uuid) -> String {
        format!("box-{box_id}")
    }

    /// Make sure the dedicated bridge network exists before a container is
    /// created on it. Best-effort: "already exists" is not an error.
    async fn ensure_network(&self) -> DriverResult<()> {
        let networks = self.client.list_networks::<String>(None).await?;
        if networks
            .iter()
            .any(|n| n.name.as_deref() == Some(&self.config.network_name))
        {
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name: self.config.network_name.clone(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        match self.client.create_network(options).await {
            Ok(_) => {
                info!(network = %self.config.network_name, "created box network");
                Ok(())
            }
            Err(BollardError::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
            Err(e) => Err(DriverError::from(e)),
        }
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn create(&self, box_id: uuid::Uuid) -> DriverResult<String> {
        self.ensure_network().await?;

        let mut labels = HashMap::new();
        labels.insert("gobox.managed".to_string(), "true".to_string());

        let host_config = HostConfig {
            memory: Some(self.config.memory_limit_bytes),
            nano_cpus: Some(self.config.nano_cpus),
            storage_opt: Some(HashMap::from([(
                "size".to_string(),
                format!("{}M", self.config.storage_limit_mb),
            )])),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(vec!["NET_RAW".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            network_mode: Some(self.config.network_name.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(self.config.base_image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = Self::container_name(box_id);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = match self.client.create_container(Some(options), container_config).await {
            Ok(r) => r,
            Err(e) => {
                warn!(network = %self.config.network_name, error = %e, "container create failed, network left for reuse");
                return Err(DriverError::from(e));
            }
        };

        self.client
            .start_container::<String>(&response.id, None)
            .await?;

        debug!(container_id = %response.id, %box_id, "container created and started");
        Ok(response.id)
    }

    async fn ensure_running(&self, container_id: &str) -> DriverResult<()> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| map_not_found(e, container_id))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| s == ContainerStateStatusEnum::RUNNING)
            .unwrap_or(false);

        if running {
            return Ok(());
        }

        self.client
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| map_not_found(e, container_id))?;

        Ok(())
    }

    async fn attach(&self, container_id: &str) -> DriverResult<AttachHandle> {
        let options = Some(AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        });

        let result = self
            .client
            .attach_container(container_id, options)
            .await
            .map_err(|e| map_not_found(e, container_id))?;

        let output = result
            .output
            .map(|item| item.map(|chunk| chunk.into_bytes().to_vec()).map_err(DriverError::from))
            .boxed();

        let input: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(result.input);

        Ok(AttachHandle { input, output })
    }

    async fn stop(&self, container_id: &str) -> DriverResult<()> {
        let options = Some(StopContainerOptions { t: 10 });

        match self.client.stop_container(container_id, options).await {
            Ok(_) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
            Err(e) => Err(DriverError::from(e)),
        }
    }

    async fn remove(&self, container_id: &str) -> DriverResult<()> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });

        match self.client.remove_container(container_id, options).await {
            Ok(_) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(DriverError::from(e)),
        }
    }

    async fn list_managed(&self) -> DriverResult<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec!["gobox.managed=true".to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

fn map_not_found(e: BollardError, container_id: &str) -> DriverError {
    match e {
        BollardError::DockerResponseServerError { status_code: 404, .. } => {
            DriverError::NotFound(container_id.to_string())
        }
        other => DriverError::from(other),
    }
}
