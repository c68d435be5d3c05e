//! Binding resolution over the catalog
//!
//! Precedence, nearest first: dataset binding, its collection's binding,
//! each ancestor collection's binding, then the global default driver.

use std::sync::Arc;

use super::registry::DriverRegistry;
use super::types::{Binding, Driver, Principal};
use crate::catalog::{Catalog, CollectionId, DatasetId, NodeRef};
use crate::identifier::{self, PersistentId, StorageIdentifier};
use crate::{Error, Result};

/// A dataset together with the driver that owns it, resolved up front so
/// backend calls need no access to the catalog
#[derive(Debug, Clone)]
pub struct DatasetTarget {
    pub dataset: DatasetId,
    pub persistent_id: PersistentId,
    pub driver: Arc<Driver>,
}

impl DatasetTarget {
    /// Physical key of `key` under this dataset's prefix.
    pub fn object_key(&self, key: &str) -> String {
        identifier::object_key(self.persistent_id.dataset_prefix(), key)
    }

    /// Identifier for a new file `key` on this dataset's driver.
    pub fn identifier(&self, key: &str) -> Result<StorageIdentifier> {
        let id = match self.driver.config.bucket() {
            Some(bucket) => StorageIdentifier::object_store(self.driver.id(), bucket, key)?,
            None => StorageIdentifier::local(self.driver.id(), key)?,
        };
        Ok(id)
    }

    /// Reject identifiers that point at another driver or bucket.
    pub fn check_owns(&self, identifier: &StorageIdentifier) -> Result<()> {
        if identifier.driver_id() != self.driver.id() {
            return Err(Error::Conflict(format!(
                "storage identifier {identifier} names driver '{}', but dataset {} uses '{}'",
                identifier.driver_id(),
                self.dataset,
                self.driver.id()
            )));
        }
        if identifier.bucket() != self.driver.config.bucket() {
            return Err(Error::Conflict(format!(
                "storage identifier {identifier} names bucket {:?}, but driver '{}' uses {:?}",
                identifier.bucket(),
                self.driver.id(),
                self.driver.config.bucket()
            )));
        }
        Ok(())
    }
}

impl DriverRegistry {
    /// Driver that owns `node`. Always succeeds for a well-formed catalog;
    /// a binding to an unregistered driver id is a configuration error.
    pub fn resolve(&self, catalog: &Catalog, node: NodeRef) -> Result<Arc<Driver>> {
        let chain = catalog.binding_chain(node)?;

        match chain.into_iter().flatten().next() {
            Some(id) => self.get(id).map_err(|_| {
                Error::Configuration(format!(
                    "{node:?} is bound to storage driver '{id}', which is not registered"
                ))
            }),
            None => self.default_driver(),
        }
    }

    /// Resolve a dataset's driver and capture what backend calls need.
    pub fn dataset_target(&self, catalog: &Catalog, dataset: DatasetId) -> Result<DatasetTarget> {
        let persistent_id = catalog.dataset(dataset)?.persistent_id.clone();
        let driver = self.resolve(catalog, NodeRef::Dataset(dataset))?;
        Ok(DatasetTarget {
            dataset,
            persistent_id,
            driver,
        })
    }

    /// Binding stored at `node` itself, ignoring inheritance.
    pub fn binding(&self, catalog: &Catalog, node: NodeRef) -> Result<Binding> {
        let own = match node {
            NodeRef::Collection(id) => catalog.collection(id)?.driver.clone(),
            NodeRef::Dataset(id) => catalog.dataset(id)?.driver.clone(),
        };
        Ok(own.map_or(Binding::Undefined, Binding::Explicit))
    }

    /// Bind a collection to the driver with `label`, returning the driver id.
    pub fn set_collection_binding(
        &self,
        principal: &Principal,
        catalog: &mut Catalog,
        collection: CollectionId,
        label: &str,
    ) -> Result<String> {
        principal.require_superuser("setting a storage driver")?;
        let driver = self.by_label(label)?;
        catalog.set_collection_driver(collection, Some(driver.id().to_string()))?;

        tracing::info!(collection = ?collection, driver = %driver.id(), label, "Bound collection to storage driver");
        Ok(driver.id().to_string())
    }

    /// Remove a collection's own binding so it inherits again.
    pub fn clear_collection_binding(
        &self,
        principal: &Principal,
        catalog: &mut Catalog,
        collection: CollectionId,
    ) -> Result<()> {
        principal.require_superuser("resetting a storage driver")?;
        catalog.set_collection_driver(collection, None)?;

        tracing::info!(collection = ?collection, "Cleared collection storage driver");
        Ok(())
    }

    /// Bind a dataset to the driver with `label`, overriding its collection.
    pub fn set_dataset_binding(
        &self,
        principal: &Principal,
        catalog: &mut Catalog,
        dataset: DatasetId,
        label: &str,
    ) -> Result<String> {
        principal.require_superuser("setting a storage driver")?;
        let driver = self.by_label(label)?;
        catalog.set_dataset_driver(dataset, Some(driver.id().to_string()))?;

        tracing::info!(dataset = %dataset, driver = %driver.id(), label, "Bound dataset to storage driver");
        Ok(driver.id().to_string())
    }

    /// Remove a dataset's own binding so it follows its collection again.
    pub fn clear_dataset_binding(
        &self,
        principal: &Principal,
        catalog: &mut Catalog,
        dataset: DatasetId,
    ) -> Result<()> {
        principal.require_superuser("resetting a storage driver")?;
        catalog.set_dataset_driver(dataset, None)?;

        tracing::info!(dataset = %dataset, "Cleared dataset storage driver");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverConfig;
    use crate::storage::MemoryObjectClient;
    use crate::ErrorKind;

    fn registry() -> DriverRegistry {
        let memory = |id: &str, label: &str| {
            (
                DriverConfig::memory(id, label, "mybucket"),
                Arc::new(MemoryObjectClient::new("mybucket")),
            )
        };
        let mut registry = DriverRegistry::new("local");
        for (config, client) in [
            memory("local", "Local"),
            memory("minio1", "MinIO"),
            memory("localstack1", "LocalStack"),
            memory("file1", "Filesystem"),
        ] {
            registry = registry.with_driver(config, client);
        }
        registry
    }

    #[test]
    fn test_unbound_nodes_use_default() {
        let registry = registry();
        let mut catalog = Catalog::new();
        let c = catalog.create_collection("c", catalog.root()).unwrap();
        let d = catalog
            .create_dataset(c, "doi:10.5072/FK2/D".parse().unwrap())
            .unwrap();

        assert_eq!(registry.resolve(&catalog, NodeRef::Dataset(d)).unwrap().id(), "local");
        assert_eq!(
            registry.binding(&catalog, NodeRef::Collection(c)).unwrap(),
            Binding::Undefined
        );
    }

    #[test]
    fn test_three_level_precedence() {
        let registry = registry();
        let admin = Principal::Superuser;
        let mut catalog = Catalog::new();
        let grandparent = catalog.create_collection("gp", catalog.root()).unwrap();
        let parent = catalog.create_collection("p", grandparent).unwrap();
        let child = catalog.create_collection("ch", parent).unwrap();
        let dataset = catalog
            .create_dataset(child, "doi:10.5072/FK2/P".parse().unwrap())
            .unwrap();

        registry
            .set_collection_binding(&admin, &mut catalog, grandparent, "MinIO")
            .unwrap();
        assert_eq!(
            registry.resolve(&catalog, NodeRef::Dataset(dataset)).unwrap().id(),
            "minio1"
        );

        registry
            .set_collection_binding(&admin, &mut catalog, child, "LocalStack")
            .unwrap();
        assert_eq!(
            registry.resolve(&catalog, NodeRef::Dataset(dataset)).unwrap().id(),
            "localstack1"
        );
        assert_eq!(
            registry.resolve(&catalog, NodeRef::Collection(parent)).unwrap().id(),
            "minio1"
        );

        registry
            .set_dataset_binding(&admin, &mut catalog, dataset, "Filesystem")
            .unwrap();
        assert_eq!(
            registry.resolve(&catalog, NodeRef::Dataset(dataset)).unwrap().id(),
            "file1"
        );

        registry
            .clear_collection_binding(&admin, &mut catalog, child)
            .unwrap();
        assert_eq!(
            registry.binding(&catalog, NodeRef::Collection(child)).unwrap(),
            Binding::Undefined
        );
        assert_eq!(
            registry.resolve(&catalog, NodeRef::Collection(child)).unwrap().id(),
            "minio1"
        );
    }

    #[test]
    fn test_set_binding_errors() {
        let registry = registry();
        let mut catalog = Catalog::new();
        let c = catalog.create_collection("c", catalog.root()).unwrap();

        let err = registry
            .set_collection_binding(&Principal::Superuser, &mut catalog, c, "Nope")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = registry
            .set_collection_binding(&Principal::User("alice".into()), &mut catalog, c, "MinIO")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(
            registry.binding(&catalog, NodeRef::Collection(c)).unwrap(),
            Binding::Undefined
        );
    }

    #[test]
    fn test_dataset_target_keys_and_ownership() {
        let registry = registry();
        let mut catalog = Catalog::new();
        let c = catalog.create_collection("c", catalog.root()).unwrap();
        let d = catalog
            .create_dataset(c, "doi:10.5072/FK2/ABC123".parse().unwrap())
            .unwrap();
        registry
            .set_collection_binding(&Principal::Superuser, &mut catalog, c, "MinIO")
            .unwrap();

        let target = registry.dataset_target(&catalog, d).unwrap();
        assert_eq!(target.object_key("k1"), "10.5072/FK2/ABC123/k1");

        let sid = target.identifier("k1").unwrap();
        assert_eq!(sid.to_string(), "minio1://mybucket:k1");
        assert!(target.check_owns(&sid).is_ok());

        let foreign: StorageIdentifier = "localstack1://mybucket:k1".parse().unwrap();
        assert_eq!(target.check_owns(&foreign).unwrap_err().kind(), ErrorKind::Conflict);
        let other_bucket: StorageIdentifier = "minio1://otherbucket:k1".parse().unwrap();
        assert_eq!(
            target.check_owns(&other_bucket).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_stale_binding_is_configuration_error() {
        let registry = registry();
        let mut catalog = Catalog::new();
        let c = catalog.create_collection("c", catalog.root()).unwrap();
        catalog.set_collection_driver(c, Some("retired".into())).unwrap();

        let err = registry.resolve(&catalog, NodeRef::Collection(c)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
