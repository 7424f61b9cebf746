use crate::config::Config;
use crate::domain::ids::{AdminId, CompanyId, ProductType};
use crate::domain::ports::{Admin, Authenticator, MasterData};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Company and product master data held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMasterData {
    companies: HashSet<CompanyId>,
    products: HashSet<ProductType>,
}

impl InMemoryMasterData {
    pub fn new(
        companies: impl IntoIterator<Item = CompanyId>,
        products: impl IntoIterator<Item = ProductType>,
    ) -> Self {
        Self {
            companies: companies.into_iter().collect(),
            products: products.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.companies.iter().map(|c| c.id),
            config.products.iter().map(|p| ProductType::new(p.as_str())),
        )
    }
}

#[async_trait]
impl MasterData for InMemoryMasterData {
    async fn company_exists(&self, id: CompanyId) -> Result<bool> {
        Ok(self.companies.contains(&id))
    }

    async fn product_exists(&self, product: &ProductType) -> Result<bool> {
        Ok(self.products.contains(product))
    }
}

/// Resolves opaque tokens to admin identities from a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, AdminId>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = (String, AdminId)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.admins.iter().map(|a| (a.token.clone(), a.id)))
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Admin> {
        self.tokens
            .get(credential)
            .map(|id| Admin { id: *id })
            .ok_or_else(|| LedgerError::Unauthorized("unknown or missing token".to_string()))
    }
}
