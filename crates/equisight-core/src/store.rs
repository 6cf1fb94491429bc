//! Store traits for the externally-owned persistence layer, plus in-memory
//! implementations.
//!
//! The orchestration core never opens a direct write path to the table
//! layer; everything goes through these traits. Each operation is a short,
//! local, atomic transition — counter updates and default swaps happen under
//! a single lock, never as read-modify-write at the caller.

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{NewProviderConfig, ProviderConfig};
use crate::prompt::{NewPromptTemplate, PromptCategory, PromptTemplate};

/// Errors from store operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("provider config {0} not found")]
    ConfigNotFound(u64),

    #[error("provider '{0}' already exists")]
    DuplicateProvider(String),

    #[error("config {0} is not active")]
    InactiveConfig(u64),

    #[error("prompt template {0} not found")]
    PromptNotFound(u64),

    #[error("template '{0}' already exists; create a new version instead")]
    DuplicateTemplate(String),

    #[error("template {0} is not active")]
    InactiveTemplate(u64),
}

/// Persistence contract for provider configurations.
pub trait ConfigStore: Send + Sync {
    /// All configs, newest first.
    fn get_all(&self) -> Vec<ProviderConfig>;

    fn get_by_id(&self, id: u64) -> Option<ProviderConfig>;

    fn get_by_provider(&self, provider_name: &str) -> Option<ProviderConfig>;

    /// The single active default config, if any.
    fn get_default_config(&self) -> Option<ProviderConfig>;

    /// Active configs, default first, then by creation order.
    fn get_active_configs(&self) -> Vec<ProviderConfig>;

    /// Insert a new config. If the new row is flagged default, any previous
    /// default is cleared within the same transition.
    fn insert(&self, new: NewProviderConfig) -> Result<ProviderConfig, StoreError>;

    /// Atomically charge one attempt: bumps `total_requests`, exactly one of
    /// the outcome counters, and `last_used_at`.
    fn update_usage_stats(&self, id: u64, success: bool) -> Result<(), StoreError>;

    /// Atomically make `id` the sole default. The config must be active.
    fn set_default(&self, id: u64) -> Result<(), StoreError>;
}

/// Persistence contract for prompt templates.
pub trait PromptStore: Send + Sync {
    fn get_by_id(&self, id: u64) -> Option<PromptTemplate>;

    /// All versions of `name`, newest version first.
    fn get_by_name(&self, name: &str) -> Vec<PromptTemplate>;

    /// Active templates in `category`, default first, then newest version.
    fn get_active_by_category(&self, category: &PromptCategory) -> Vec<PromptTemplate>;

    /// The active default template for `category`, if any.
    fn get_default(&self, category: &PromptCategory) -> Option<PromptTemplate>;

    /// Create a brand-new template at version 1. Fails if the name exists.
    fn create(&self, new: NewPromptTemplate) -> Result<PromptTemplate, StoreError>;

    /// Append version `max(existing) + 1` for `name`. Never mutates an
    /// existing version. Creates version 1 if the name is new.
    fn create_new_version(
        &self,
        name: &str,
        category: PromptCategory,
        body: &str,
        description: Option<String>,
    ) -> Result<PromptTemplate, StoreError>;

    /// Atomically make `id` the sole default within its category.
    fn set_default_version(&self, id: u64) -> Result<(), StoreError>;

    /// Bump usage counter and last-used timestamp.
    fn increment_usage(&self, id: u64) -> Result<(), StoreError>;
}

#[derive(Default)]
struct ConfigRows {
    next_id: u64,
    rows: Vec<ProviderConfig>,
}

/// In-memory [`ConfigStore`]. Backing store for tests, the CLI, and any
/// deployment that does not need durable config rows.
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<ConfigRows>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_all(&self) -> Vec<ProviderConfig> {
        let inner = self.inner.lock();
        let mut rows = inner.rows.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows
    }

    fn get_by_id(&self, id: u64) -> Option<ProviderConfig> {
        self.inner.lock().rows.iter().find(|c| c.id == id).cloned()
    }

    fn get_by_provider(&self, provider_name: &str) -> Option<ProviderConfig> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|c| c.provider_name == provider_name)
            .cloned()
    }

    fn get_default_config(&self) -> Option<ProviderConfig> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|c| c.is_default && c.is_active)
            .cloned()
    }

    fn get_active_configs(&self) -> Vec<ProviderConfig> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner.rows.iter().filter(|c| c.is_active).cloned().collect();
        rows.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        rows
    }

    fn insert(&self, new: NewProviderConfig) -> Result<ProviderConfig, StoreError> {
        let mut inner = self.inner.lock();
        if inner
            .rows
            .iter()
            .any(|c| c.provider_name == new.provider_name)
        {
            return Err(StoreError::DuplicateProvider(new.provider_name));
        }

        if new.is_default {
            for row in inner.rows.iter_mut() {
                row.is_default = false;
            }
        }

        inner.next_id += 1;
        let config = ProviderConfig {
            id: inner.next_id,
            provider_name: new.provider_name,
            display_name: new.display_name,
            api_key: new.api_key,
            model_name: new.model_name,
            api_url: new.api_url,
            advanced: new.advanced,
            is_active: new.is_active,
            is_default: new.is_default,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        inner.rows.push(config.clone());
        Ok(config)
    }

    fn update_usage_stats(&self, id: u64, success: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = inner
            .rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::ConfigNotFound(id))?;

        row.total_requests += 1;
        if success {
            row.successful_requests += 1;
        } else {
            row.failed_requests += 1;
        }
        row.last_used_at = Some(Utc::now());
        Ok(())
    }

    fn set_default(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let target = inner
            .rows
            .iter()
            .find(|c| c.id == id)
            .ok_or(StoreError::ConfigNotFound(id))?;
        if !target.is_active {
            return Err(StoreError::InactiveConfig(id));
        }

        for row in inner.rows.iter_mut() {
            row.is_default = row.id == id;
        }
        Ok(())
    }
}

#[derive(Default)]
struct PromptRows {
    next_id: u64,
    rows: Vec<PromptTemplate>,
}

/// In-memory [`PromptStore`].
#[derive(Default)]
pub struct MemoryPromptStore {
    inner: Mutex<PromptRows>,
}

impl MemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_version(
        inner: &mut PromptRows,
        name: String,
        description: Option<String>,
        category: PromptCategory,
        body: String,
        version: u32,
        is_active: bool,
        is_default: bool,
    ) -> PromptTemplate {
        if is_default {
            for row in inner.rows.iter_mut() {
                if row.category == category {
                    row.is_default = false;
                }
            }
        }

        inner.next_id += 1;
        let template = PromptTemplate {
            id: inner.next_id,
            name,
            description,
            category,
            body,
            version,
            is_active,
            is_default,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        inner.rows.push(template.clone());
        template
    }
}

impl PromptStore for MemoryPromptStore {
    fn get_by_id(&self, id: u64) -> Option<PromptTemplate> {
        self.inner.lock().rows.iter().find(|t| t.id == id).cloned()
    }

    fn get_by_name(&self, name: &str) -> Vec<PromptTemplate> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .rows
            .iter()
            .filter(|t| t.name == name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows
    }

    fn get_active_by_category(&self, category: &PromptCategory) -> Vec<PromptTemplate> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .rows
            .iter()
            .filter(|t| t.is_active && &t.category == category)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.version.cmp(&a.version))
        });
        rows
    }

    fn get_default(&self, category: &PromptCategory) -> Option<PromptTemplate> {
        self.inner
            .lock()
            .rows
            .iter()
            .find(|t| t.is_default && t.is_active && &t.category == category)
            .cloned()
    }

    fn create(&self, new: NewPromptTemplate) -> Result<PromptTemplate, StoreError> {
        let mut inner = self.inner.lock();
        if inner.rows.iter().any(|t| t.name == new.name) {
            return Err(StoreError::DuplicateTemplate(new.name));
        }

        Ok(Self::push_version(
            &mut inner,
            new.name,
            new.description,
            new.category,
            new.body,
            1,
            new.is_active,
            new.is_default,
        ))
    }

    fn create_new_version(
        &self,
        name: &str,
        category: PromptCategory,
        body: &str,
        description: Option<String>,
    ) -> Result<PromptTemplate, StoreError> {
        let mut inner = self.inner.lock();
        let next_version = inner
            .rows
            .iter()
            .filter(|t| t.name == name)
            .map(|t| t.version)
            .max()
            .map_or(1, |v| v + 1);

        Ok(Self::push_version(
            &mut inner,
            name.to_string(),
            description,
            category,
            body.to_string(),
            next_version,
            true,
            false,
        ))
    }

    fn set_default_version(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let target = inner
            .rows
            .iter()
            .find(|t| t.id == id)
            .ok_or(StoreError::PromptNotFound(id))?;
        if !target.is_active {
            return Err(StoreError::InactiveTemplate(id));
        }
        let category = target.category.clone();

        for row in inner.rows.iter_mut() {
            if row.category == category {
                row.is_default = row.id == id;
            }
        }
        Ok(())
    }

    fn increment_usage(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = inner
            .rows
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::PromptNotFound(id))?;
        row.usage_count += 1;
        row.last_used_at = Some(Utc::now());
        Ok(())
    }
}
