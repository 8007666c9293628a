//! Harness configuration
//!
//! [`HarnessConfig`] carries the defaults every flow inherits (poll
//! interval, readiness timeout, teardown budget) and the transport used to
//! reach the cluster. Values come from code, from `CONVERGE_*` environment
//! variables, or both.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::kube_utils::create_client;
use crate::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use crate::retry::RetryConfig;
use crate::step::StepDefaults;
use crate::store::{KubeStore, KubectlStore, ObjectStore, RetryingStore};
use crate::{Error, Result};

/// Poll interval in whole seconds
pub const ENV_POLL_INTERVAL: &str = "CONVERGE_POLL_INTERVAL_SECS";
/// Readiness timeout in whole seconds
pub const ENV_TIMEOUT: &str = "CONVERGE_TIMEOUT_SECS";
/// Per-step teardown budget in whole seconds
pub const ENV_TEARDOWN_TIMEOUT: &str = "CONVERGE_TEARDOWN_TIMEOUT_SECS";
/// Path of the kubeconfig to use instead of the inferred one
pub const ENV_KUBECONFIG: &str = "CONVERGE_KUBECONFIG";
/// `api` or `kubectl`
pub const ENV_TRANSPORT: &str = "CONVERGE_TRANSPORT";
/// Path of the `kubectl` binary for the kubectl transport
pub const ENV_KUBECTL: &str = "CONVERGE_KUBECTL";

/// Default time allowed for each teardown step
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// How the harness talks to the cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// Kubernetes API through kube-rs
    #[default]
    Api,
    /// `kubectl` subprocesses
    Kubectl,
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" | "kube" => Ok(Transport::Api),
            "kubectl" | "shell" => Ok(Transport::Kubectl),
            other => Err(Error::config(
                ENV_TRANSPORT,
                format!("unknown transport '{}' (expected api or kubectl)", other),
            )),
        }
    }
}

/// Settings shared by every flow a runner executes
#[derive(Clone, Debug, PartialEq)]
pub struct HarnessConfig {
    /// Default time between readiness fetches
    pub poll_interval: Duration,
    /// Default readiness timeout
    pub timeout: Duration,
    /// Time allowed for each teardown step, also after cancellation
    pub teardown_timeout: Duration,
    /// Explicit kubeconfig; `None` infers in-cluster or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    /// Cluster transport
    pub transport: Transport,
    /// `kubectl` binary for [`Transport::Kubectl`]
    pub kubectl: PathBuf,
    /// Backoff for transient store errors; `None` calls the store once
    pub retry: Option<RetryConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            kubeconfig: None,
            transport: Transport::Api,
            kubectl: PathBuf::from(crate::store::DEFAULT_KUBECTL),
            retry: None,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by any `CONVERGE_*` variables that are set
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary lookup (e.g. a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(secs) = lookup(ENV_POLL_INTERVAL) {
            config.poll_interval = parse_secs(ENV_POLL_INTERVAL, &secs)?;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT) {
            config.timeout = parse_secs(ENV_TIMEOUT, &secs)?;
        }
        if let Some(secs) = lookup(ENV_TEARDOWN_TIMEOUT) {
            config.teardown_timeout = parse_secs(ENV_TEARDOWN_TIMEOUT, &secs)?;
        }
        if let Some(path) = lookup(ENV_KUBECONFIG).filter(|p| !p.is_empty()) {
            config.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(transport) = lookup(ENV_TRANSPORT) {
            config.transport = transport.parse()?;
        }
        if let Some(kubectl) = lookup(ENV_KUBECTL).filter(|p| !p.is_empty()) {
            config.kubectl = PathBuf::from(kubectl);
        }
        if config.poll_interval.is_zero() {
            return Err(Error::config(ENV_POLL_INTERVAL, "must be greater than zero"));
        }
        Ok(config)
    }

    /// Override the default poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the default readiness timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the teardown budget
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Use an explicit kubeconfig
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Select the transport
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Retry transient store errors with `retry`
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Defaults for steps of a flow carrying `labels`
    pub fn step_defaults(&self, labels: BTreeMap<String, String>) -> StepDefaults {
        StepDefaults {
            labels,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        }
    }

    /// Build the configured store
    pub async fn connect(&self) -> Result<Arc<dyn ObjectStore>> {
        info!(
            transport = ?self.transport,
            kubeconfig = ?self.kubeconfig,
            retry = self.retry.is_some(),
            "connecting object store"
        );
        match self.transport {
            Transport::Api => {
                let client = create_client(self.kubeconfig.as_deref()).await?;
                Ok(self.wrap(KubeStore::new(client)))
            }
            Transport::Kubectl => {
                let mut store = KubectlStore::new(&self.kubectl);
                if let Some(path) = &self.kubeconfig {
                    store = store.with_kubeconfig(path);
                }
                Ok(self.wrap(store))
            }
        }
    }

    fn wrap<S: ObjectStore + 'static>(&self, store: S) -> Arc<dyn ObjectStore> {
        match &self.retry {
            Some(retry) => Arc::new(RetryingStore::with_config(store, retry.clone())),
            None => Arc::new(store),
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::config(key, format!("'{}' is not a whole number of seconds: {}", value, e)))
}

/// `prefix` plus a random 5-character suffix, valid as a Kubernetes name.
///
/// Concurrent flows use it to keep their namespaces and names apart.
pub fn unique_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}", prefix, suffix)
}
