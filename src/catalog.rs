//! Collections ("dataverses") and datasets as an arena
//!
//! Collections point at their parent by index, so walking up a binding chain
//! is a loop over indices rather than a lookup through dynamic properties.
//! The root collection always exists and has no parent.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::PersistentId;

pub const ROOT_ALIAS: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(usize);

impl CollectionId {
    pub const ROOT: CollectionId = CollectionId(0);
}

/// Numeric dataset id as exposed by the API, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either kind of node a driver binding can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Collection(CollectionId),
    Dataset(DatasetId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("collection '{0}' not found")]
    UnknownCollection(String),

    #[error("dataset {0} not found")]
    UnknownDataset(String),

    #[error("collection alias '{0}' is already taken")]
    DuplicateAlias(String),

    #[error("dataset {0} already exists")]
    DuplicatePersistentId(String),

    #[error("invalid collection alias '{0}'")]
    InvalidAlias(String),
}

impl From<CatalogError> for crate::Error {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownCollection(_) | CatalogError::UnknownDataset(_) => {
                crate::Error::NotFound(err.to_string())
            }
            CatalogError::DuplicateAlias(_) | CatalogError::DuplicatePersistentId(_) => {
                crate::Error::Conflict(err.to_string())
            }
            CatalogError::InvalidAlias(_) => crate::Error::Validation(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub id: CollectionId,
    pub alias: String,
    pub parent: Option<CollectionId>,
    /// Explicit driver id bound at this node
    pub driver: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: DatasetId,
    pub collection: CollectionId,
    pub persistent_id: PersistentId,
    pub driver: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    collections: Vec<Collection>,
    datasets: Vec<Dataset>,
    aliases: HashMap<String, CollectionId>,
    persistent_ids: HashMap<PersistentId, DatasetId>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let root = Collection {
            id: CollectionId::ROOT,
            alias: ROOT_ALIAS.to_string(),
            parent: None,
            driver: None,
        };
        Self {
            collections: vec![root],
            datasets: Vec::new(),
            aliases: HashMap::from([(ROOT_ALIAS.to_string(), CollectionId::ROOT)]),
            persistent_ids: HashMap::new(),
        }
    }

    pub fn root(&self) -> CollectionId {
        CollectionId::ROOT
    }

    pub fn create_collection(
        &mut self,
        alias: &str,
        parent: CollectionId,
    ) -> Result<CollectionId, CatalogError> {
        let valid = !alias.is_empty()
            && alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(CatalogError::InvalidAlias(alias.to_string()));
        }
        if self.aliases.contains_key(alias) {
            return Err(CatalogError::DuplicateAlias(alias.to_string()));
        }
        self.collection(parent)?;

        let id = CollectionId(self.collections.len());
        self.collections.push(Collection {
            id,
            alias: alias.to_string(),
            parent: Some(parent),
            driver: None,
        });
        self.aliases.insert(alias.to_string(), id);
        Ok(id)
    }

    pub fn create_dataset(
        &mut self,
        collection: CollectionId,
        persistent_id: PersistentId,
    ) -> Result<DatasetId, CatalogError> {
        self.collection(collection)?;
        if self.persistent_ids.contains_key(&persistent_id) {
            return Err(CatalogError::DuplicatePersistentId(persistent_id.to_string()));
        }

        let id = DatasetId(self.datasets.len() as u64 + 1);
        self.datasets.push(Dataset {
            id,
            collection,
            persistent_id: persistent_id.clone(),
            driver: None,
        });
        self.persistent_ids.insert(persistent_id, id);
        Ok(id)
    }

    pub fn collection(&self, id: CollectionId) -> Result<&Collection, CatalogError> {
        self.collections
            .get(id.0)
            .ok_or_else(|| CatalogError::UnknownCollection(format!("#{}", id.0)))
    }

    pub fn collection_by_alias(&self, alias: &str) -> Result<&Collection, CatalogError> {
        self.aliases
            .get(alias)
            .and_then(|id| self.collections.get(id.0))
            .ok_or_else(|| CatalogError::UnknownCollection(alias.to_string()))
    }

    pub fn dataset(&self, id: DatasetId) -> Result<&Dataset, CatalogError> {
        id.0
            .checked_sub(1)
            .and_then(|index| self.datasets.get(index as usize))
            .ok_or_else(|| CatalogError::UnknownDataset(id.to_string()))
    }

    pub fn dataset_by_persistent_id(&self, pid: &PersistentId) -> Result<&Dataset, CatalogError> {
        self.persistent_ids
            .get(pid)
            .and_then(|id| self.dataset(*id).ok())
            .ok_or_else(|| CatalogError::UnknownDataset(pid.to_string()))
    }

    pub fn set_collection_driver(
        &mut self,
        id: CollectionId,
        driver: Option<String>,
    ) -> Result<(), CatalogError> {
        let collection = self
            .collections
            .get_mut(id.0)
            .ok_or_else(|| CatalogError::UnknownCollection(format!("#{}", id.0)))?;
        collection.driver = driver;
        Ok(())
    }

    pub fn set_dataset_driver(
        &mut self,
        id: DatasetId,
        driver: Option<String>,
    ) -> Result<(), CatalogError> {
        let dataset = id
            .0
            .checked_sub(1)
            .and_then(|index| self.datasets.get_mut(index as usize))
            .ok_or_else(|| CatalogError::UnknownDataset(id.to_string()))?;
        dataset.driver = driver;
        Ok(())
    }

    /// Explicit bindings from `node` up to the root, nearest first. Entries
    /// are `None` where a node has no binding of its own.
    pub fn binding_chain(&self, node: NodeRef) -> Result<Vec<Option<&str>>, CatalogError> {
        let mut chain = Vec::new();
        let mut current = match node {
            NodeRef::Dataset(id) => {
                let dataset = self.dataset(id)?;
                chain.push(dataset.driver.as_deref());
                Some(dataset.collection)
            }
            NodeRef::Collection(id) => Some(id),
        };

        // Parents always have lower indices than their children, so this terminates.
        while let Some(id) = current {
            let collection = self.collection(id)?;
            chain.push(collection.driver.as_deref());
            current = collection.parent;
        }
        Ok(chain)
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.iter()
    }
}
