//! In-memory stand-in for the Docker daemon, shared by unit tests.

use crate::container::{
    ContainerBrief, ContainerError, ContainerInspection, ContainerRuntime, SessionContainerSpec,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub(crate) id: String,
    pub(crate) running: bool,
    pub(crate) workspace: Option<PathBuf>,
    pub(crate) host_port: Option<u16>,
}

/// In-memory [`ContainerRuntime`].
#[derive(Default)]
pub(crate) struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicUsize,
    pub(crate) creates: AtomicUsize,
    pub(crate) removes: AtomicUsize,
    pub(crate) fail_create: AtomicBool,
    pub(crate) fail_start: AtomicBool,
}

impl FakeRuntime {
    pub(crate) fn seed(
        &self,
        name: &str,
        running: bool,
        workspace: Option<&str>,
        port: Option<u16>,
    ) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            FakeContainer {
                id: format!("seeded-{name}"),
                running,
                workspace: workspace.map(PathBuf::from),
                host_port: port,
            },
        );
    }

    pub(crate) fn stop(&self, name: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.running = false;
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    pub(crate) fn is_running(&self, name: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub(crate) fn running_count(&self) -> usize {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.running)
            .count()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(
        &self,
        name: &str,
        spec: &SessionContainerSpec,
    ) -> crate::container::Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ContainerError::Other("create refused".to_string()));
        }
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.containers.lock().unwrap().insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                running: false,
                workspace: Some(spec.workspace_host.clone()),
                host_port: Some(spec.host_port),
            },
        );
        Ok(id)
    }

    async fn start(&self, name_or_id: &str) -> crate::container::Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ContainerError::Other("start refused".to_string()));
        }
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name_or_id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(ContainerError::NotFound(name_or_id.to_string())),
        }
    }

    async fn remove(&self, name_or_id: &str, _force: bool) -> crate::container::Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.remove(name_or_id) {
            Some(_) => {
                self.removes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(ContainerError::NotFound(name_or_id.to_string())),
        }
    }

    async fn inspect(&self, name_or_id: &str) -> crate::container::Result<ContainerInspection> {
        let containers = self.containers.lock().unwrap();
        match containers.get(name_or_id) {
            Some(c) => Ok(ContainerInspection {
                id: c.id.clone(),
                running: c.running,
                workspace_host_path: c.workspace.clone(),
                host_port: c.host_port,
            }),
            None => Err(ContainerError::NotFound(name_or_id.to_string())),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> crate::container::Result<Vec<ContainerBrief>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, c)| ContainerBrief {
                id: c.id.clone(),
                name: name.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }
}
