use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ANTHROPIC_PROVIDER, OPENAI_PROVIDER, RuntimeConfig};
use crate::core::error::RuntimeError;
use crate::core::traits::ProviderAdapter;
use crate::core::types::HealthStatus;
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::openai::OpenAiAdapter;

#[derive(Default)]
struct RegistryState {
    adapters: IndexMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
}

/// Named provider adapters in registration order, plus a default.
///
/// Shared through `Arc`; every method takes `&self`.
#[derive(Default)]
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one adapter per configured provider, skipping providers
    /// without an API key.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let registry = Self::new();

        if config.anthropic.has_api_key() {
            let adapter = AnthropicAdapter::new(
                &config.anthropic,
                config.retry.clone(),
                config.circuit_breaker.clone(),
            )?;
            registry.register(ANTHROPIC_PROVIDER, Arc::new(adapter));
        } else {
            warn!(provider = ANTHROPIC_PROVIDER, "no api key configured, provider skipped");
        }

        if config.openai.has_api_key() {
            let adapter = OpenAiAdapter::new(
                &config.openai,
                config.retry.clone(),
                config.circuit_breaker.clone(),
            )?;
            registry.register(OPENAI_PROVIDER, Arc::new(adapter));
        } else {
            warn!(provider = OPENAI_PROVIDER, "no api key configured, provider skipped");
        }

        if registry.is_empty() {
            return Err(RuntimeError::NoProvidersConfigured);
        }

        if let Some(default_provider) = &config.default_provider
            && !registry.set_default(default_provider)
        {
            warn!(
                provider = %default_provider,
                "configured default provider is not registered, keeping first registered"
            );
        }

        info!(
            providers = ?registry.available_names(),
            default = ?registry.default_name(),
            "provider registry initialized"
        );
        Ok(registry)
    }

    /// Registers `adapter` under `name`. Re-registering a name replaces the
    /// adapter in place.
    pub fn register(&self, name: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        let name = name.into();
        debug!(provider = %name, "registering provider adapter");
        self.write_state().adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.read_state().adapters.get(name).cloned()
    }

    /// The explicitly chosen default if it is registered, else the first
    /// registered adapter.
    pub fn get_default(&self) -> Option<Arc<dyn ProviderAdapter>> {
        let state = self.read_state();
        state
            .default_provider
            .as_deref()
            .and_then(|name| state.adapters.get(name))
            .or_else(|| state.adapters.first().map(|(_, adapter)| adapter))
            .cloned()
    }

    pub fn default_name(&self) -> Option<String> {
        let state = self.read_state();
        state
            .default_provider
            .as_deref()
            .filter(|name| state.adapters.contains_key(*name))
            .or_else(|| state.adapters.keys().next().map(String::as_str))
            .map(str::to_string)
    }

    /// Returns `false`, leaving the default unchanged, when `name` is not registered.
    pub fn set_default(&self, name: &str) -> bool {
        let mut state = self.write_state();
        if !state.adapters.contains_key(name) {
            return false;
        }
        state.default_provider = Some(name.to_string());
        true
    }

    pub fn available_names(&self) -> Vec<String> {
        self.read_state().adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().adapters.is_empty()
    }

    /// Probes every adapter concurrently. Results keep registration order.
    pub async fn check_all_health(&self) -> Vec<(String, HealthStatus)> {
        let adapters: Vec<(String, Arc<dyn ProviderAdapter>)> = self
            .read_state()
            .adapters
            .iter()
            .map(|(name, adapter)| (name.clone(), Arc::clone(adapter)))
            .collect();

        join_all(adapters.into_iter().map(|(name, adapter)| async move {
            let status = adapter.check_health().await;
            (name, status)
        }))
        .await
    }

    /// Polls provider health every `interval` until the registry is dropped.
    /// Degraded providers are logged, never removed. A zero interval
    /// disables monitoring and spawns nothing.
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            debug!("health monitor disabled by zero interval");
            return None;
        }
        let registry: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("provider registry dropped, stopping health monitor");
                    return;
                };

                for (name, status) in registry.check_all_health().await {
                    if status.is_healthy {
                        debug!(
                            provider = %name,
                            average_response_time_ms = ?status.average_response_time_ms,
                            "provider healthy"
                        );
                    } else {
                        warn!(
                            provider = %name,
                            message = status.message.as_deref().unwrap_or("unknown"),
                            "provider degraded"
                        );
                    }
                }
            }
        }))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
