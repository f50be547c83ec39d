// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use kserve_runtime::ServerConfig;

use crate::error::{DataPlaneError, Result};
use crate::model::Model;

/// A registered model. Remote models are served by another process and are
/// always considered ready here.
#[derive(Clone)]
pub enum ModelHandle {
    Local(Arc<dyn Model>),
    Remote(Arc<dyn Model>),
}

impl ModelHandle {
    pub fn model(&self) -> &Arc<dyn Model> {
        match self {
            ModelHandle::Local(model) | ModelHandle::Remote(model) => model,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            ModelHandle::Local(model) => model.ready(),
            ModelHandle::Remote(_) => true,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelHandle::Local(model) => f.debug_tuple("Local").field(&model.name()).finish(),
            ModelHandle::Remote(model) => f.debug_tuple("Remote").field(&model.name()).finish(),
        }
    }
}

/// Creates models on demand for the repository extension.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, name: &str, models_dir: Option<&Path>) -> Result<ModelHandle>;
}

/// Name-keyed registry of the models this server dispatches to.
pub struct ModelRepository {
    models: RwLock<HashMap<String, ModelHandle>>,
    // Serializes lazy loads of the same model
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    models_dir: Option<PathBuf>,
    loader: Option<Arc<dyn ModelLoader>>,
}

impl ModelRepository {
    pub fn new(models_dir: Option<PathBuf>) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            models_dir,
            loader: None,
        }
    }

    /// Repository over the configured `model_dir`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.model_dir.clone())
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn models_dir(&self) -> Option<&Path> {
        self.models_dir.as_deref()
    }

    pub fn get_model(&self, name: &str) -> Option<ModelHandle> {
        self.models.read().get(name).cloned()
    }

    pub fn get_models(&self) -> HashMap<String, ModelHandle> {
        self.models.read().clone()
    }

    pub fn is_model_ready(&self, name: &str) -> bool {
        self.get_model(name).is_some_and(|handle| handle.is_ready())
    }

    /// Registers a local model under its own name, replacing any previous one.
    pub fn update(&self, model: Arc<dyn Model>) {
        let name = model.name().to_string();
        self.update_handle(name, ModelHandle::Local(model));
    }

    pub fn update_handle(&self, name: impl Into<String>, handle: ModelHandle) {
        self.models.write().insert(name.into(), handle);
    }

    /// Lock held while a model named `name` is being loaded on first use.
    pub fn load_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.load_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Stops the model and removes it.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let handle = self
            .get_model(name)
            .ok_or_else(|| DataPlaneError::ModelNotFound(name.to_string()))?;
        handle.model().stop().await;
        self.models.write().remove(name);
        self.load_locks.lock().remove(name);
        tracing::info!(model = name, "model unloaded");
        Ok(())
    }

    /// Creates the model through the registered loader, loads it and registers it.
    /// A model already registered under `name` keeps serving until the new one
    /// has loaded.
    pub async fn load_model(&self, name: &str) -> Result<bool> {
        let loader = self.loader.as_ref().ok_or_else(|| {
            DataPlaneError::NotImplemented(format!(
                "Model repository can not load model {name}, no model loader is registered"
            ))
        })?;

        let handle = loader.load(name, self.models_dir()).await?;
        let ready = match &handle {
            ModelHandle::Local(model) => model.load().await?,
            ModelHandle::Remote(_) => true,
        };
        self.update_handle(name, handle);
        tracing::info!(model = name, ready, "model loaded");
        Ok(ready)
    }

    /// Loads every subdirectory of the models directory as a model of the same name.
    pub async fn load_models(&self) -> Result<()> {
        let Some(models_dir) = self.models_dir.clone() else {
            return Ok(());
        };

        let mut entries = tokio::fs::read_dir(&models_dir).await.map_err(|e| {
            anyhow::anyhow!("failed to read models directory {}: {e}", models_dir.display())
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(anyhow::Error::from)? {
            let file_type = entry.file_type().await.map_err(anyhow::Error::from)?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            self.load_model(&name).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRepository")
            .field("models", &self.models.read().keys().collect::<Vec<_>>())
            .field("models_dir", &self.models_dir)
            .finish()
    }
}
