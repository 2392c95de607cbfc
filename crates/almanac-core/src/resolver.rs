//! Default-resource resolution.
//!
//! The default resource of a kind is resolved once per unset slot, trying
//! each tier in order and stopping at the first hit:
//!
//! 0. the id recorded in the user's default preference, looked up among the
//!    resources the user can access;
//! 1. the user's own id in the memoised `shared` partition;
//! 2. the user's own id in the memoised `owned` partition;
//! 3. the backend's dedicated default lookup;
//! 4. the user's own id in a freshly populated `owned` partition.
//!
//! Finding nothing is a valid outcome and is memoised as [`Slot::Empty`].

use std::sync::Arc;

use crate::{
  Error, Result,
  backend::DirectoryBackend,
  collection::ResourceCollection,
  resource::{Resource, ResourceMap},
  slot::Slot,
};

/// The tier a default resource was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
  Preference,
  Shared,
  Owned,
  Backend,
  OwnedFetched,
}

pub struct DefaultResolver;

impl DefaultResolver {
  /// Walk the fallback chain for `collection`. Never touches the default slot.
  pub async fn resolve<D: DirectoryBackend>(
    collection: &mut ResourceCollection,
    store: &D,
    uid: &str,
    preferred: Option<&str>,
  ) -> Result<Option<(Arc<Resource>, Tier)>> {
    let kind = collection.kind();
    collection.revalidate_owned(uid);
    collection.revalidate_shared(uid);

    if let Some(preferred) = preferred.filter(|p| !p.is_empty()) {
      if let Some(hit) = lookup(&collection.owned, preferred) {
        return Ok(Some((hit, Tier::Preference)));
      }
      let shared = collection.get_shared(store, uid).await?;
      if let Some(hit) = shared.get(preferred) {
        return Ok(Some((Arc::clone(hit), Tier::Preference)));
      }
      tracing::debug!(%kind, uid, preferred, "preferred default is not accessible");
    }

    if let Some(hit) = lookup(&collection.shared, uid) {
      return Ok(Some((hit, Tier::Shared)));
    }
    if let Some(hit) = lookup(&collection.owned, uid) {
      return Ok(Some((hit, Tier::Owned)));
    }

    tracing::debug!(%kind, uid, "querying backend for default resource");
    let record = store.fetch_default(kind, uid).await.map_err(Error::backend)?;
    if let Some(record) = record {
      let resource = lookup(&collection.shared, &record.id)
        .or_else(|| lookup(&collection.owned, &record.id))
        .unwrap_or_else(|| Arc::new(Resource::bind(kind, record)));
      resource.attach_user(uid);
      return Ok(Some((resource, Tier::Backend)));
    }

    let owned = collection.get_owned(store, uid).await?;
    Ok(owned.get(uid).map(|r| (Arc::clone(r), Tier::OwnedFetched)))
  }
}

fn lookup(partition: &Slot<ResourceMap>, id: &str) -> Option<Arc<Resource>> {
  partition.value().and_then(|m| m.get(id)).cloned()
}

impl ResourceCollection {
  /// The user's default resource of this kind, resolved on first use.
  ///
  /// `preferred` is the id stored in the user's default preference, if any.
  pub async fn get_default<D: DirectoryBackend>(
    &mut self,
    store: &D,
    uid: &str,
    preferred: Option<&str>,
  ) -> Result<Option<Arc<Resource>>> {
    match &self.default {
      Slot::Value(resource) if resource.is_live() => {
        tracing::trace!(kind = %self.kind(), uid, "default resource hit");
        resource.attach_user(uid);
        return Ok(Some(Arc::clone(resource)));
      }
      Slot::Value(_) => {
        tracing::warn!(kind = %self.kind(), uid, "stale default resource, resolving again");
      }
      Slot::Empty => return Ok(None),
      Slot::Unset => {}
    }

    let resolved = DefaultResolver::resolve(self, store, uid, preferred).await?;
    if let Some((resource, tier)) = &resolved {
      tracing::debug!(kind = %self.kind(), uid, id = resource.id(), ?tier, "resolved default resource");
    }
    let resource = resolved.map(|(r, _)| r);
    self.default = resource.clone().into();
    self.changed = true;
    Ok(resource)
  }
}
