//! Provider registry.
//!
//! Providers are constructed lazily on first demand for a
//! `(profile, region, service)` triple and cached for the life of the
//! mount. Construction loads SDK configuration, so it happens outside any
//! lock held by readers; a construction mutex keeps concurrent first
//! lookups from building the same provider twice.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::provider::{
    Ec2Provider, IamProvider, LambdaProvider, Provider, S3Provider, SsmProvider, VpcProvider,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProviderKey {
    profile: String,
    region: String,
    service: String,
}

impl ProviderKey {
    fn new(profile: &str, region: &str, service: &str) -> Self {
        Self {
            profile: profile.to_string(),
            region: region.to_string(),
            service: service.to_string(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    providers: RwLock<HashMap<ProviderKey, Arc<dyn Provider>>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up or construct the provider for a triple.
    ///
    /// Fast path is a shared read; on miss the construction mutex is taken,
    /// the map re-checked, and only then is the provider built. Failures
    /// propagate and are not cached, so the next lookup retries.
    pub(crate) async fn provider(
        &self,
        profile: &str,
        region: &str,
        service: &str,
    ) -> Result<Arc<dyn Provider>> {
        let key = ProviderKey::new(profile, region, service);

        if let Some(provider) = self.providers.read().unwrap().get(&key) {
            return Ok(Arc::clone(provider));
        }

        let _guard = self.build_lock.lock().await;
        if let Some(provider) = self.providers.read().unwrap().get(&key) {
            return Ok(Arc::clone(provider));
        }

        // "default" means the SDK's default credential chain rather than a
        // literal profile section of that name.
        let profile_arg = (profile != "default").then_some(profile);
        let provider = build_provider(service, profile_arg, region).await?;
        self.providers
            .write()
            .unwrap()
            .insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    /// Pre-seed a provider instance; used by tests to route a triple to a
    /// fake backend.
    pub(crate) fn insert(
        &self,
        profile: &str,
        region: &str,
        service: &str,
        provider: Arc<dyn Provider>,
    ) {
        let key = ProviderKey::new(profile, region, service);
        self.providers.write().unwrap().insert(key, provider);
    }
}

async fn build_provider(
    service: &str,
    profile: Option<&str>,
    region: &str,
) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match service {
        "s3" => Arc::new(S3Provider::new(profile, region).await?),
        "ssm" => Arc::new(SsmProvider::new(profile, region).await?),
        "iam" => Arc::new(IamProvider::new(profile, region).await?),
        "ec2" => Arc::new(Ec2Provider::new(profile, region).await?),
        "vpc" => Arc::new(VpcProvider::new(profile, region).await?),
        "lambda" => Arc::new(LambdaProvider::new(profile, region).await?),
        _ => return Err(Error::not_found(service.to_string())),
    };
    tracing::debug!(service, region, "constructed provider");
    Ok(provider)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::Entry;
    use async_trait::async_trait;

    struct Fake(&'static str);

    #[async_trait]
    impl Provider for Fake {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn read_dir(&self, _path: &str) -> Result<Vec<Entry>> {
            Ok(vec![])
        }
        async fn read(&self, _path: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn stat(&self, _path: &str) -> Result<Entry> {
            Ok(Entry::dir(""))
        }
    }

    #[tokio::test]
    async fn returns_seeded_instance_for_matching_triple() {
        let registry = Registry::new();
        registry.insert("prod", "us-east-1", "ssm", Arc::new(Fake("ssm")));

        let first = registry.provider("prod", "us-east-1", "ssm").await.unwrap();
        let second = registry.provider("prod", "us-east-1", "ssm").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "ssm");
    }

    #[tokio::test]
    async fn distinct_triples_are_distinct_instances() {
        let registry = Registry::new();
        registry.insert("prod", "us-east-1", "ssm", Arc::new(Fake("ssm")));
        registry.insert("prod", "eu-west-1", "ssm", Arc::new(Fake("ssm")));

        let a = registry.provider("prod", "us-east-1", "ssm").await.unwrap();
        let b = registry.provider("prod", "eu-west-1", "ssm").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let registry = Registry::new();
        assert!(matches!(
            registry.provider("default", "us-east-1", "dynamodb").await,
            Err(Error::NotFound(_))
        ));
    }
}
