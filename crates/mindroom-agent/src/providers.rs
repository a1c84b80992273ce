//! Maps a `RawModel.provider` id (spec.md §3's model config) to the
//! concrete [`LlmProvider`] that serves it. Mirrors
//! `mindroom_dispatch::router::RouterSuggester`'s "contract in one crate,
//! wiring in the orchestrator" shape: this crate only needs to resolve a
//! provider by name, not construct one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::LlmProvider;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }
}
