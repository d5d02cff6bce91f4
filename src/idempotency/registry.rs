use crate::error::{AppError, Result};
use crate::idempotency::operation::{OperationConfig, OperationId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolved guard settings for every registered operation. Built once at
/// startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<OperationId, Arc<OperationConfig>>,
}

impl OperationRegistry {
    pub fn builder<S: Into<String>>(namespaces: impl IntoIterator<Item = S>) -> OperationRegistryBuilder {
        OperationRegistryBuilder {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
            definitions: Vec::new(),
        }
    }

    pub fn get(&self, id: &OperationId) -> Option<Arc<OperationConfig>> {
        self.operations.get(id).cloned()
    }

    /// Like [`get`](Self::get) but an unknown operation is a configuration error.
    pub fn resolve(&self, id: &OperationId) -> Result<Arc<OperationConfig>> {
        self.get(id).ok_or_else(|| {
            AppError::Configuration(format!("No idempotent operation registered for {}", id))
        })
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &OperationId> {
        self.operations.keys()
    }
}

/// Collects operation definitions and keeps those that live under one of the
/// configured namespaces.
#[derive(Debug)]
pub struct OperationRegistryBuilder {
    namespaces: Vec<String>,
    definitions: Vec<OperationConfig>,
}

impl OperationRegistryBuilder {
    pub fn register(mut self, config: OperationConfig) -> Self {
        self.definitions.push(config);
        self
    }

    pub fn register_all(mut self, configs: impl IntoIterator<Item = OperationConfig>) -> Self {
        self.definitions.extend(configs);
        self
    }

    pub fn build(self) -> Result<OperationRegistry> {
        let namespaces: Vec<String> = self
            .namespaces
            .into_iter()
            .filter(|ns| !ns.trim().is_empty())
            .collect();

        if namespaces.is_empty() {
            return Err(AppError::Configuration(
                "No operation namespaces configured".to_string(),
            ));
        }

        info!("Registering idempotent operations under namespaces: {:?}", namespaces);

        let mut operations = HashMap::new();
        for config in self.definitions {
            if !namespaces.iter().any(|ns| config.id.name.starts_with(ns.as_str())) {
                debug!("Skipping {} outside configured namespaces", config.id);
                continue;
            }

            if config.expire_time.is_zero() {
                return Err(AppError::Configuration(format!(
                    "Operation {} must have a non-zero expire time",
                    config.id
                )));
            }

            if operations.contains_key(&config.id) {
                return Err(AppError::Configuration(format!(
                    "Operation {} registered twice",
                    config.id
                )));
            }

            debug!("Registered idempotent operation: {}", config.id);
            operations.insert(config.id.clone(), Arc::new(config));
        }

        info!("Idempotent operation registry built with {} operations", operations.len());

        Ok(OperationRegistry { operations })
    }
}
