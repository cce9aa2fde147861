use std::collections::HashMap;
use std::sync::RwLock;

use stockhold_core::ProductId;

/// Read-only view of the product catalog owned by another service.
pub trait ProductCatalog: Send + Sync {
    fn product_name(&self, product_id: ProductId) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    names: RwLock<HashMap<ProductId, String>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product_id: ProductId, name: impl Into<String>) {
        if let Ok(mut names) = self.names.write() {
            names.insert(product_id, name.into());
        }
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn product_name(&self, product_id: ProductId) -> Option<String> {
        self.names.read().ok()?.get(&product_id).cloned()
    }
}
