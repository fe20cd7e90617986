//! Per-tenant reference namespace over a shared store.
//!
//! A rooted container hosts several repositories ("tenants") in one object
//! and reference store. Each tenant's references live under its own prefix:
//!
//! ```text
//! logical (tenant view)      physical (shared store)
//! HEAD                  <->  refs/remotes/<tenant>/HEAD
//! refs/heads/main       <->  refs/remotes/<tenant>/refs/heads/main
//! refs/tags/v1          <->  refs/remotes/<tenant>/refs/tags/v1
//! ```
//!
//! Objects and config are shared as they are; content addressing already
//! deduplicates history common to several tenants.

use git2::Oid;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::{HEAD, REFS_PREFIX};
use crate::storage::traits::{ConfigStorer, Finalizer, ObjectStorer, ReferenceStorer, Storer};
use crate::storage::types::{CommitOutcome, Config, EncodedObject, Reference};

const REMOTES_PREFIX: &str = "refs/remotes/";

/// Physical prefix holding every reference of `tenant`.
pub fn tenant_prefix(tenant: &str) -> String {
    format!("{}{}/", REMOTES_PREFIX, tenant)
}

/// Map a tenant-local reference name to its physical name.
pub fn physical_name(tenant: &str, logical: &str) -> StorageResult<String> {
    if logical != HEAD && !logical.starts_with(REFS_PREFIX) {
        return Err(StorageError::InvalidReferenceName(logical.to_string()));
    }
    Ok(format!("{}{}", tenant_prefix(tenant), logical))
}

/// Map a physical reference name back into the namespace of `tenant`.
///
/// Returns `None` for names that do not belong to the tenant.
pub fn logical_name(tenant: &str, physical: &str) -> Option<String> {
    let logical = physical.strip_prefix(&tenant_prefix(tenant))?;
    if logical == HEAD || logical.starts_with(REFS_PREFIX) {
        Some(logical.to_string())
    } else {
        None
    }
}

/// A [`Storer`] exposing one tenant's slice of a shared store.
pub struct RootedStorage {
    inner: Box<dyn Storer>,
    tenant: String,
    prefix: String,
}

impl RootedStorage {
    pub fn new(inner: Box<dyn Storer>, tenant: impl Into<String>) -> Self {
        let tenant = tenant.into();
        Self {
            prefix: tenant_prefix(&tenant),
            inner,
            tenant,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The shared store underneath.
    pub fn inner(&self) -> &dyn Storer {
        self.inner.as_ref()
    }

    fn to_physical(&self, reference: &Reference) -> StorageResult<Reference> {
        let name = physical_name(&self.tenant, reference.name())?;
        match reference {
            Reference::Hash { target, .. } => Ok(Reference::hash(name, *target)),
            Reference::Symbolic { target, .. } => {
                let target = physical_name(&self.tenant, target).map_err(|_| {
                    StorageError::InvalidReferenceType {
                        name: reference.name().to_string(),
                        reason: format!("symbolic target {} is outside the tenant namespace", target),
                    }
                })?;
                Ok(Reference::symbolic(name, target))
            }
        }
    }

    fn to_logical(&self, reference: &Reference) -> StorageResult<Reference> {
        let untranslatable = |what: &str| StorageError::InvalidReferenceType {
            name: reference.name().to_string(),
            reason: format!("{} is outside the namespace of {}", what, self.tenant),
        };

        let name = logical_name(&self.tenant, reference.name()).ok_or_else(|| untranslatable("name"))?;
        match reference {
            Reference::Hash { target, .. } => Ok(Reference::hash(name, *target)),
            Reference::Symbolic { target, .. } => {
                let target = logical_name(&self.tenant, target)
                    .ok_or_else(|| untranslatable("symbolic target"))?;
                Ok(Reference::symbolic(name, target))
            }
        }
    }

    /// Prefixes of other tenants nested inside this tenant's prefix.
    fn nested_prefixes(&self) -> StorageResult<Vec<String>> {
        let config = self.inner.config()?;
        Ok(config
            .remotes
            .keys()
            .filter(|name| name.as_str() != self.tenant)
            .map(|name| tenant_prefix(name))
            .filter(|prefix| prefix.starts_with(&self.prefix))
            .collect())
    }
}

impl ObjectStorer for RootedStorage {
    fn set_encoded_object(&self, object: &EncodedObject) -> StorageResult<Oid> {
        self.inner.set_encoded_object(object)
    }

    fn encoded_object(&self, id: Oid) -> StorageResult<EncodedObject> {
        self.inner.encoded_object(id)
    }

    fn has_encoded_object(&self, id: Oid) -> StorageResult<bool> {
        self.inner.has_encoded_object(id)
    }

    fn encoded_object_ids(&self) -> StorageResult<Vec<Oid>> {
        self.inner.encoded_object_ids()
    }
}

impl ReferenceStorer for RootedStorage {
    fn set_reference(&self, reference: &Reference) -> StorageResult<()> {
        self.inner.set_reference(&self.to_physical(reference)?)
    }

    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> StorageResult<()> {
        let new = self.to_physical(new)?;
        let old = old.map(|old| self.to_physical(old)).transpose()?;
        self.inner.check_and_set_reference(&new, old.as_ref())
    }

    fn reference(&self, name: &str) -> StorageResult<Reference> {
        let physical = physical_name(&self.tenant, name)?;
        let reference = self.inner.reference(&physical).map_err(|e| match e {
            StorageError::ReferenceNotFound(_) => StorageError::ReferenceNotFound(name.to_string()),
            other => other,
        })?;
        self.to_logical(&reference)
    }

    fn references(&self) -> StorageResult<Vec<Reference>> {
        let nested = self.nested_prefixes()?;
        let mut references = Vec::new();

        for reference in self.inner.references()? {
            let name = reference.name();
            if !name.starts_with(&self.prefix) {
                continue;
            }
            if nested.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                continue;
            }
            if logical_name(&self.tenant, name).is_none() {
                continue;
            }
            references.push(self.to_logical(&reference)?);
        }

        references.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(references)
    }

    fn remove_reference(&self, name: &str) -> StorageResult<()> {
        self.inner
            .remove_reference(&physical_name(&self.tenant, name)?)
    }
}

impl ConfigStorer for RootedStorage {
    fn config(&self) -> StorageResult<Config> {
        self.inner.config()
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        self.inner.set_config(config)
    }
}

impl Finalizer for RootedStorage {
    fn commit(&self) -> StorageResult<CommitOutcome> {
        match self.inner.finalizer() {
            Some(finalizer) => finalizer.commit(),
            None => Ok(CommitOutcome::Empty),
        }
    }

    fn close(&self) -> StorageResult<()> {
        match self.inner.finalizer() {
            Some(finalizer) => finalizer.close(),
            None => Ok(()),
        }
    }
}

impl Storer for RootedStorage {
    fn finalizer(&self) -> Option<&dyn Finalizer> {
        Some(self)
    }
}
