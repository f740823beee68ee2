//! Bidirectional label name/ID cache with create-on-miss
use crate::client::{GmailClient, LabelInfo};
use crate::error::{GmailError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Pair of mirrored maps: `by_name[n] == id` iff `by_id[id] == n`
#[derive(Debug, Default, Clone)]
struct LabelMaps {
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl LabelMaps {
    /// Insert a pair, evicting any stale counterpart of either side
    fn insert(&mut self, name: String, id: String) {
        if let Some(old_id) = self.by_name.get(&name) {
            if *old_id != id {
                self.by_id.remove(old_id);
            }
        }
        if let Some(old_name) = self.by_id.get(&id) {
            if *old_name != name {
                self.by_name.remove(old_name);
            }
        }
        self.by_name.insert(name.clone(), id.clone());
        self.by_id.insert(id, name);
    }
}

#[derive(Debug)]
enum CacheState {
    Uninitialized,
    Loaded(LabelMaps),
}

/// Label name <-> ID cache, loaded in bulk on first use
///
/// The first lookup lists every label once. After that, `resolve_to_id`
/// creates missing labels on demand and records them in both directions;
/// `resolve_to_name` never creates anything.
pub struct LabelCache {
    client: Arc<dyn GmailClient>,
    state: CacheState,
    created: Vec<String>,
}

impl LabelCache {
    pub fn new(client: Arc<dyn GmailClient>) -> Self {
        Self {
            client,
            state: CacheState::Uninitialized,
            created: Vec::new(),
        }
    }

    /// Whether the bulk listing has happened
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, CacheState::Loaded(_))
    }

    /// Number of known labels (0 before loading)
    pub fn len(&self) -> usize {
        match &self.state {
            CacheState::Uninitialized => 0,
            CacheState::Loaded(maps) => maps.by_name.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of labels this cache created, in creation order
    pub fn created_labels(&self) -> &[String] {
        &self.created
    }

    /// Lists all labels once and fills both maps
    ///
    /// Calling again once loaded does nothing.
    pub async fn ensure_loaded(&mut self) -> Result<()> {
        self.loaded_maps().await.map(|_| ())
    }

    async fn loaded_maps(&mut self) -> Result<&mut LabelMaps> {
        if let CacheState::Uninitialized = self.state {
            let labels = self.client.list_labels().await?;
            let mut maps = LabelMaps::default();
            for LabelInfo { id, name } in labels {
                maps.insert(name, id);
            }
            info!("Loaded {} existing labels into cache", maps.by_name.len());
            self.state = CacheState::Loaded(maps);
        }

        match &mut self.state {
            CacheState::Loaded(maps) => Ok(maps),
            CacheState::Uninitialized => Err(GmailError::LabelError(
                "label cache failed to load".to_string(),
            )),
        }
    }

    /// Returns the ID for `name`, creating the label if it does not exist
    pub async fn resolve_to_id(&mut self, name: &str) -> Result<String> {
        if let Some(id) = self.loaded_maps().await?.by_name.get(name) {
            debug!("Label '{}' already exists in cache", name);
            return Ok(id.clone());
        }

        info!("Creating label: {}", name);
        let id = self.client.create_label(name).await.map_err(|e| {
            GmailError::LabelError(format!("Failed to create label '{}': {}", name, e))
        })?;

        self.loaded_maps()
            .await?
            .insert(name.to_string(), id.clone());
        self.created.push(name.to_string());

        info!("Successfully created label '{}' with ID: {}", name, id);
        Ok(id)
    }

    /// Returns the human readable name for a label ID
    ///
    /// An ID missing from the listing means the cache is stale; that is
    /// reported as [`GmailError::UnknownLabelId`] and the cache is left as is.
    pub async fn resolve_to_name(&mut self, id: &str) -> Result<String> {
        self.loaded_maps()
            .await?
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| GmailError::UnknownLabelId(id.to_string()))
    }

    /// Looks up an ID without creating anything
    pub async fn lookup_id(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self.loaded_maps().await?.by_name.get(name).cloned())
    }

    /// Snapshot of the name -> ID map
    pub fn name_to_id(&self) -> HashMap<String, String> {
        match &self.state {
            CacheState::Uninitialized => HashMap::new(),
            CacheState::Loaded(maps) => maps.by_name.clone(),
        }
    }

    /// Snapshot of the ID -> name map
    pub fn id_to_name(&self) -> HashMap<String, String> {
        match &self.state {
            CacheState::Uninitialized => HashMap::new(),
            CacheState::Loaded(maps) => maps.by_id.clone(),
        }
    }
}

impl std::fmt::Debug for LabelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelCache")
            .field("loaded", &self.is_loaded())
            .field("labels", &self.len())
            .field("created", &self.created)
            .finish()
    }
}
