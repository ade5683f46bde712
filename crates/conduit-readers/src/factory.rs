use crate::registry::{ReaderEntry, ReaderRegistry};
use conduit_query::secrets::display_value;
use conduit_query::{
    filter, merge_overrides, BackendKind, EnvironmentDocument, FilteredConfig, Reader,
    ReaderConfig, Result, RuntimeOverrides, Writer,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns (backend kind, environment, overrides) into a constructed reader or writer.
///
/// Building never opens a connection; both connect lazily.
pub struct ConnectionFactory {
    document: Arc<EnvironmentDocument>,
    registry: Arc<ReaderRegistry>,
}

impl ConnectionFactory {
    pub fn new(document: EnvironmentDocument) -> Self {
        Self::with_registry(document, ReaderRegistry::new())
    }

    pub fn with_registry(document: EnvironmentDocument, registry: ReaderRegistry) -> Self {
        Self {
            document: Arc::new(document),
            registry: Arc::new(registry),
        }
    }

    /// Load the configuration document once for this factory
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(EnvironmentDocument::load(path)?))
    }

    pub fn document(&self) -> &EnvironmentDocument {
        &self.document
    }

    pub fn registry(&self) -> &ReaderRegistry {
        &self.registry
    }

    /// Filtered, validated settings of `kind` in `environment`
    pub fn resolve(&self, kind: BackendKind, environment: &str) -> Result<FilteredConfig> {
        let entry = self.registry.get(kind)?;
        filter::resolve(&self.document, environment, entry.filter.as_ref())
    }

    /// Resolve, then merge the whitelisted overrides on top
    fn merged(
        &self,
        kind: BackendKind,
        environment: &str,
        overrides: &RuntimeOverrides,
    ) -> Result<(&ReaderEntry, ReaderConfig)> {
        let entry = self.registry.get(kind)?;
        let filtered = filter::resolve(&self.document, environment, entry.filter.as_ref())?;

        let overrides = entry.filter.filter_overrides(overrides);
        for (key, value) in overrides.values() {
            if !value.is_null() {
                debug!("Override {} = {}", key, display_value(key, value));
            }
        }
        let merged = merge_overrides(&filtered.values, &overrides);
        Ok((entry, ReaderConfig::new(kind, merged)))
    }

    /// Resolve, merge overrides on top, then construct
    pub fn build(
        &self,
        kind: BackendKind,
        environment: &str,
        overrides: &RuntimeOverrides,
    ) -> Result<Box<dyn Reader>> {
        let (entry, config) = self.merged(kind, environment, overrides)?;
        info!("Creating {} reader for environment '{}'", kind, environment);
        (entry.constructor)(config)
    }

    /// Same resolution as `build`, constructing the kind's writer
    pub fn build_writer(
        &self,
        kind: BackendKind,
        environment: &str,
        overrides: &RuntimeOverrides,
    ) -> Result<Box<dyn Writer>> {
        let constructor = self.registry.get(kind)?.writer(kind)?;
        let (_, config) = self.merged(kind, environment, overrides)?;
        info!("Creating {} writer for environment '{}'", kind, environment);
        constructor(config)
    }

    /// `build` with a backend name; unknown names fail with `UnsupportedBackend`
    pub fn build_by_name(
        &self,
        backend: &str,
        environment: &str,
        overrides: &RuntimeOverrides,
    ) -> Result<Box<dyn Reader>> {
        let kind = self.registry.lookup(backend)?;
        self.build(kind, environment, overrides)
    }
}
