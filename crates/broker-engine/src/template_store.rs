use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use broker_domain::{ImageReference, Template, TemplateId};
use broker_store::Repository;
use tokio::sync::RwLock;

use crate::error::EngineError;

/// Resolves an [`ImageReference::Alias`] (e.g. an SSM parameter path) to a
/// concrete `ami-...` id. Left pluggable since the core has no opinion on
/// how an alias is backed — SSM, a static map, a sidecar service.
#[async_trait]
pub trait ImageAliasResolver: Send + Sync {
    async fn resolve(&self, alias: &str) -> Result<String, EngineError>;
}

/// Static alias table, useful for tests and for deployments that pin a
/// fixed set of aliases in configuration rather than querying SSM live.
pub struct StaticAliasResolver(HashMap<String, String>);

impl StaticAliasResolver {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self(aliases)
    }
}

#[async_trait]
impl ImageAliasResolver for StaticAliasResolver {
    async fn resolve(&self, alias: &str) -> Result<String, EngineError> {
        self.0
            .get(alias)
            .cloned()
            .ok_or_else(|| EngineError::Validation(format!("unresolvable image alias '{alias}'")))
    }
}

/// Read-mostly template catalog (§5: "load-once-cache-indefinitely, with
/// explicit reload on configuration-change event"). Backed by the same
/// `Repository`/`StorageStrategy` plumbing as requests and machines, so a
/// deployment can keep templates in the same file/Postgres/cloud-KV store
/// rather than a separate config format.
pub struct TemplateStore {
    repository: Repository<Template>,
    alias_resolver: Option<Arc<dyn ImageAliasResolver>>,
    cache: RwLock<Option<HashMap<String, Template>>>,
}

impl TemplateStore {
    pub fn new(repository: Repository<Template>, alias_resolver: Option<Arc<dyn ImageAliasResolver>>) -> Self {
        Self {
            repository,
            alias_resolver,
            cache: RwLock::new(None),
        }
    }

    /// Forces the next read to reload from storage. Called when the broker
    /// observes a configuration-change event (§5).
    pub async fn reload(&self) -> Result<(), EngineError> {
        let all = self.repository.find_all().await?;
        let map = all
            .into_iter()
            .map(|t| (t.template_id.as_str().to_string(), t))
            .collect();
        *self.cache.write().await = Some(map);
        Ok(())
    }

    async fn ensure_loaded(&self) -> Result<(), EngineError> {
        if self.cache.read().await.is_none() {
            self.reload().await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Template>, EngineError> {
        self.ensure_loaded().await?;
        Ok(self
            .cache
            .read()
            .await
            .as_ref()
            .expect("just loaded")
            .values()
            .cloned()
            .collect())
    }

    pub async fn get(&self, template_id: &TemplateId) -> Result<Template, EngineError> {
        self.ensure_loaded().await?;
        self.cache
            .read()
            .await
            .as_ref()
            .expect("just loaded")
            .get(template_id.as_str())
            .cloned()
            .ok_or_else(|| EngineError::TemplateNotFound(template_id.to_string()))
    }

    /// Resolves `template.image` to a direct id, following the alias
    /// indirection described in §3 and validated as a prerequisite in §4.6.
    pub async fn resolve_image(&self, template: &Template) -> Result<String, EngineError> {
        match &template.image {
            ImageReference::Direct(id) => Ok(id.clone()),
            ImageReference::Alias(alias) => match &self.alias_resolver {
                Some(resolver) => resolver.resolve(alias).await,
                None => Err(EngineError::Validation(format!(
                    "image alias '{alias}' requires an alias resolver, none configured"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::{MachineTypeSpec, NetworkPlacement, ProviderStrategy, TemplateFields};
    use broker_store::InMemoryStorageStrategy;

    fn sample(id: &str) -> Template {
        Template::new(TemplateFields {
            template_id: TemplateId::new(id).unwrap(),
            provider_strategy: ProviderStrategy::DirectLaunch,
            max_number: 4,
            image: ImageReference::Direct("ami-0123".into()),
            network: NetworkPlacement::SingleSubnet("subnet-1".into()),
            machine_type: MachineTypeSpec::Single("m5.large".into()),
            security_group_ids: vec!["sg-1".into()],
            key_name: None,
            user_data: None,
            spot_role: None,
            max_price: None,
            allocation_strategy: None,
        })
        .unwrap()
    }

    async fn seeded_store() -> TemplateStore {
        let strategy = Arc::new(InMemoryStorageStrategy::new());
        let repo: Repository<Template> = Repository::new(strategy);
        let t = sample("t1");
        repo.save(t.template_id.as_str(), &t).await.unwrap();
        TemplateStore::new(repo, None)
    }

    #[tokio::test]
    async fn get_loads_on_first_access() {
        let store = seeded_store().await;
        let t = store.get(&TemplateId::new("t1").unwrap()).await.unwrap();
        assert_eq!(t.template_id.as_str(), "t1");
    }

    #[tokio::test]
    async fn get_missing_template_is_not_found() {
        let store = seeded_store().await;
        let err = store.get(&TemplateId::new("nonexistent").unwrap()).await.unwrap_err();
        assert!(matches!(err, EngineError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn resolve_image_passes_through_direct_ids() {
        let store = seeded_store().await;
        let t = store.get(&TemplateId::new("t1").unwrap()).await.unwrap();
        assert_eq!(store.resolve_image(&t).await.unwrap(), "ami-0123");
    }

    #[tokio::test]
    async fn resolve_image_alias_without_resolver_is_validation_error() {
        let strategy = Arc::new(InMemoryStorageStrategy::new());
        let repo: Repository<Template> = Repository::new(strategy);
        let mut t = sample("t2");
        t.image = ImageReference::Alias("latest-base".into());
        repo.save(t.template_id.as_str(), &t).await.unwrap();
        let store = TemplateStore::new(repo, None);
        let loaded = store.get(&TemplateId::new("t2").unwrap()).await.unwrap();
        assert!(matches!(store.resolve_image(&loaded).await, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn resolve_image_alias_with_resolver_resolves() {
        let strategy = Arc::new(InMemoryStorageStrategy::new());
        let repo: Repository<Template> = Repository::new(strategy);
        let mut t = sample("t3");
        t.image = ImageReference::Alias("latest-base".into());
        repo.save(t.template_id.as_str(), &t).await.unwrap();
        let mut aliases = HashMap::new();
        aliases.insert("latest-base".to_string(), "ami-resolved".to_string());
        let store = TemplateStore::new(repo, Some(Arc::new(StaticAliasResolver::new(aliases))));
        let loaded = store.get(&TemplateId::new("t3").unwrap()).await.unwrap();
        assert_eq!(store.resolve_image(&loaded).await.unwrap(), "ami-resolved");
    }
}
