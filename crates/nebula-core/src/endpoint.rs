use std::sync::{Arc, RwLock};

use url::Url;

/// Transport scheme an [`Endpoint`] was reached over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Plain,
    Tls,
}

impl Scheme {
    fn from_url(url: &Url) -> Self {
        match url.scheme() {
            "https" | "ssl" | "tls" => Scheme::Tls,
            _ => Scheme::Plain,
        }
    }
}

/// The role a cluster member plays. Used only by topology-aware selection;
/// the endpoint set itself is role-agnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ServerRole {
    Single,
    Coordinator,
    DbServer,
    Agent,
    #[default]
    Undefined,
}

/// A fully-qualified server URL plus the role it was last observed playing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
    scheme: Scheme,
    role: ServerRole,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(raw)?;
        Ok(Self {
            scheme: Scheme::from_url(&url),
            url,
            role: ServerRole::Undefined,
        })
    }

    pub fn with_role(mut self, role: ServerRole) -> Self {
        self.role = role;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// An ordered, atomically-swappable set of endpoints.
///
/// Position 0 is "preferred". Readers observe a consistent snapshot: a
/// dispatch that began against list `L` completes against `L` even if
/// [`EndpointSet::update`] races it, because `snapshot()` hands out an
/// `Arc` clone rather than a reference into the guarded list. The set is
/// never empty once constructed; [`EndpointSet::new`] rejects an empty
/// input list.
#[derive(Debug)]
pub struct EndpointSet {
    inner: RwLock<Arc<Vec<Endpoint>>>,
    pinned: RwLock<Option<Endpoint>>,
}

#[derive(Debug, thiserror::Error)]
#[error("endpoint set must contain at least one endpoint")]
pub struct EmptyEndpointSet;

impl EndpointSet {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, EmptyEndpointSet> {
        if endpoints.is_empty() {
            return Err(EmptyEndpointSet);
        }
        Ok(Self {
            inner: RwLock::new(Arc::new(endpoints)),
            pinned: RwLock::new(None),
        })
    }

    /// A point-in-time snapshot, safe to iterate without holding any lock.
    pub fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.inner.read().expect("endpoint set lock poisoned").clone()
    }

    /// Replace the endpoint list wholesale. Does not affect in-flight
    /// dispatches that already captured a snapshot.
    pub fn update(&self, endpoints: Vec<Endpoint>) -> Result<(), EmptyEndpointSet> {
        if endpoints.is_empty() {
            return Err(EmptyEndpointSet);
        }
        *self.inner.write().expect("endpoint set lock poisoned") = Arc::new(endpoints);
        Ok(())
    }

    /// Force subsequent dispatches (until [`EndpointSet::unpin`]) to a
    /// specific URL, independent of whether it still appears in the set.
    pub fn pin(&self, endpoint: Endpoint) {
        *self.pinned.write().expect("endpoint set lock poisoned") = Some(endpoint);
    }

    pub fn unpin(&self) {
        *self.pinned.write().expect("endpoint set lock poisoned") = None;
    }

    pub fn pinned(&self) -> Option<Endpoint> {
        self.pinned.read().expect("endpoint set lock poisoned").clone()
    }

    pub fn preferred(&self) -> Option<Endpoint> {
        self.snapshot().first().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        Endpoint::parse(s).unwrap()
    }

    #[test]
    fn rejects_empty_construction() {
        assert!(EndpointSet::new(vec![]).is_err());
    }

    #[test]
    fn preferred_is_position_zero() {
        let set = EndpointSet::new(vec![ep("http://a:8529"), ep("http://b:8529")]).unwrap();
        assert_eq!(set.preferred().unwrap().as_str(), "http://a:8529/");
    }

    #[test]
    fn update_rejects_empty_but_keeps_prior_list() {
        let set = EndpointSet::new(vec![ep("http://a:8529")]).unwrap();
        assert!(set.update(vec![]).is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_is_stable_across_concurrent_update() {
        let set = EndpointSet::new(vec![ep("http://a:8529")]).unwrap();
        let before = set.snapshot();
        set.update(vec![ep("http://b:8529")]).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].as_str(), "http://a:8529/");
        assert_eq!(set.snapshot()[0].as_str(), "http://b:8529/");
    }

    #[test]
    fn pin_overrides_independent_of_set_membership() {
        let set = EndpointSet::new(vec![ep("http://a:8529")]).unwrap();
        set.pin(ep("http://pinned:9999"));
        assert_eq!(set.pinned().unwrap().as_str(), "http://pinned:9999/");
        set.unpin();
        assert!(set.pinned().is_none());
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(ep("https://a").scheme(), Scheme::Tls);
        assert_eq!(ep("http://a").scheme(), Scheme::Plain);
    }
}
