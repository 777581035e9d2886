//! Business entities known to the client.
//!
//! Each entity maps 1:1 to a local table and to a remote REST resource at
//! `/api/<entity>`.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::RecordId;

/// Prefix shared by every remote resource.
pub const API_PREFIX: &str = "/api/";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Products,
    Categories,
    Customers,
    Suppliers,
    Invoices,
    Purchases,
    Payments,
    StockMovements,
}

impl Entity {
    pub const ALL: [Entity; 8] = [
        Entity::Products,
        Entity::Categories,
        Entity::Customers,
        Entity::Suppliers,
        Entity::Invoices,
        Entity::Purchases,
        Entity::Payments,
        Entity::StockMovements,
    ];

    /// Table / resource name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Products => "products",
            Entity::Categories => "categories",
            Entity::Customers => "customers",
            Entity::Suppliers => "suppliers",
            Entity::Invoices => "invoices",
            Entity::Purchases => "purchases",
            Entity::Payments => "payments",
            Entity::StockMovements => "stock_movements",
        }
    }

    /// `/api/<entity>`
    pub fn collection_path(&self) -> String {
        format!("{API_PREFIX}{}", self.as_str())
    }

    /// `/api/<entity>/<id>`
    pub fn item_path(&self, id: &RecordId) -> String {
        format!("{API_PREFIX}{}/{}", self.as_str(), id)
    }

    /// Derive the entity from an endpoint path such as `/api/customers/c1?x=1`.
    ///
    /// Returns the entity plus the item id segment, if present.
    pub fn from_endpoint(endpoint: &str) -> Result<(Entity, Option<RecordId>), DomainError> {
        let path = endpoint.split(['?', '#']).next().unwrap_or_default();
        let rest = path
            .strip_prefix(API_PREFIX)
            .or_else(|| path.strip_prefix("api/"))
            .unwrap_or(path)
            .trim_matches('/');

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let entity = segments
            .next()
            .ok_or_else(|| DomainError::unknown_entity(endpoint))?
            .parse::<Entity>()?;
        let id = segments.next().map(|s| s.parse::<RecordId>()).transpose()?;

        Ok((entity, id))
    }
}

impl core::fmt::Display for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entity::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| DomainError::unknown_entity(s))
    }
}
