use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::process::monitor::{ProbeFactory, SysinfoProbe};
use crate::process::supervisor::{InstanceHandle, SupervisorConfig};
use crate::process::types::{InstanceId, InstanceStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

/// Registry of supervised instances
///
/// Each instance is owned by its own supervisor task; the manager only keeps
/// handles and routes requests by spec name.
pub struct ProcessManager {
    config: SupervisorConfig,
    probes: ProbeFactory,
    specs: Vec<Arc<ProcessSpec>>,
    instances: BTreeMap<InstanceId, InstanceHandle>,
}

impl ProcessManager {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_probe(config, SysinfoProbe::factory())
    }

    /// Use a custom memory probe for every instance
    pub fn with_probe(config: SupervisorConfig, probes: ProbeFactory) -> Self {
        Self {
            config,
            probes,
            specs: Vec::new(),
            instances: BTreeMap::new(),
        }
    }

    /// Register a spec and spawn a (stopped) supervisor per instance
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&mut self, spec: ProcessSpec) -> Result<()> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(WardenError::ProcessAlreadyExists(spec.name.clone()));
        }

        spec.validate()?;

        let spec = Arc::new(spec);
        for index in 0..spec.instances {
            let id = InstanceId::new(spec.name.clone(), index);
            let handle =
                InstanceHandle::spawn(id.clone(), spec.clone(), self.config.clone(), &self.probes);
            self.instances.insert(id, handle);
        }

        info!(
            "Registered '{}' with {} instance(s)",
            spec.name, spec.instances
        );
        self.specs.push(spec);
        Ok(())
    }

    /// Register several specs; one rejected spec does not affect the others
    pub fn load<I>(&mut self, specs: I) -> Vec<(String, WardenError)>
    where
        I: IntoIterator<Item = ProcessSpec>,
    {
        let mut rejected = Vec::new();
        for spec in specs {
            let name = spec.name.clone();
            if let Err(e) = self.register(spec) {
                error!("Cannot register '{}': {}", name, e);
                rejected.push((name, e));
            }
        }
        rejected
    }

    pub fn specs(&self) -> impl Iterator<Item = &ProcessSpec> {
        self.specs.iter().map(|spec| spec.as_ref())
    }

    pub fn spec(&self, name: &str) -> Option<&ProcessSpec> {
        self.specs().find(|spec| spec.name == name)
    }

    fn handles(&self, name: &str) -> Result<Vec<&InstanceHandle>> {
        let handles: Vec<&InstanceHandle> = self
            .instances
            .values()
            .filter(|handle| handle.id().name == name)
            .collect();

        if handles.is_empty() {
            return Err(WardenError::ProcessNotFound(name.to_string()));
        }
        Ok(handles)
    }

    /// Start every instance of `name`
    ///
    /// All instances are attempted; the first failure is returned.
    pub async fn start(&self, name: &str) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles(name)? {
            if let Err(e) = handle.start().await {
                error!("Failed to start {}: {}", handle.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Start every registered spec, returning the ones that failed
    pub async fn start_all(&self) -> Vec<(String, WardenError)> {
        let mut failures = Vec::new();
        for spec in &self.specs {
            if let Err(e) = self.start(&spec.name).await {
                failures.push((spec.name.clone(), e));
            }
        }
        failures
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles(name)? {
            if let Err(e) = handle.stop().await {
                error!("Failed to stop {}: {}", handle.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Restart every instance of `name`, clearing their restart counters
    pub async fn restart(&self, name: &str) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles(name)? {
            if let Err(e) = handle.restart().await {
                error!("Failed to restart {}: {}", handle.id(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn status(&self, name: &str) -> Result<Vec<InstanceStatus>> {
        Ok(self
            .handles(name)?
            .into_iter()
            .map(InstanceHandle::status)
            .collect())
    }

    /// Status of every instance, ordered by name and index
    pub fn list(&self) -> Vec<InstanceStatus> {
        self.instances.values().map(InstanceHandle::status).collect()
    }

    /// Wait until every instance of `name` satisfies `condition`
    pub async fn wait_settled<F>(
        &self,
        name: &str,
        timeout: Duration,
        condition: F,
    ) -> Result<Vec<InstanceStatus>>
    where
        F: Fn(&InstanceStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut statuses = Vec::new();

        for handle in self.handles(name)? {
            let mut rx = handle.subscribe();
            let waited = tokio::time::timeout_at(deadline, rx.wait_for(|s| condition(s))).await;
            match waited {
                Ok(Ok(status)) => statuses.push(status.clone()),
                Ok(Err(_)) => {
                    return Err(WardenError::SupervisorUnavailable(handle.id().to_string()))
                }
                Err(_) => {
                    return Err(WardenError::TimeoutError(format!(
                        "{} did not reach the expected state within {:?}",
                        handle.id(),
                        timeout
                    )))
                }
            }
        }

        Ok(statuses)
    }

    /// Stop every instance and wait for all supervisor tasks to end
    ///
    /// Returns the final status of every instance, in `list` order.
    pub async fn shutdown(self) -> Vec<InstanceStatus> {
        info!("Shutting down {} instance(s)", self.instances.len());

        let tasks: Vec<_> = self
            .instances
            .into_values()
            .map(|handle| {
                let id = handle.id().clone();
                (id, tokio::spawn(handle.shutdown()))
            })
            .collect();

        let mut statuses = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            match task.await {
                Ok(status) => statuses.push(status),
                Err(e) => error!("Shutdown of {} ended abnormally: {}", id, e),
            }
        }
        statuses
    }
}

#[cfg(test)]
mod tests;
