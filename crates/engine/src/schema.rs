//! Versioned local schema: one table per entity plus the sync bookkeeping tables.
//!
//! Entity tables store each record as a JSON document keyed by its id.
//! Secondary indexes are expression indexes over JSON paths, so they can be
//! queried through [`crate::store::LocalStore::get_by_index`] by name.

use tokosync_core::Entity;

/// Bump whenever a statement in [`statements`] changes.
pub const SCHEMA_VERSION: i64 = 2;

pub const QUEUE_TABLE: &str = "sync_queue";
pub const METADATA_TABLE: &str = "sync_metadata";

/// A declared secondary index over a JSON field of an entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    /// Name used by callers, e.g. `"category"`.
    pub name: &'static str,
    /// JSON path of the indexed field.
    pub path: &'static str,
    pub unique: bool,
}

const fn index(name: &'static str, path: &'static str) -> IndexDef {
    IndexDef {
        name,
        path,
        unique: false,
    }
}

const fn unique(name: &'static str, path: &'static str) -> IndexDef {
    IndexDef {
        name,
        path,
        unique: true,
    }
}

const SYNC_STATUS: IndexDef = index("syncStatus", "$.syncStatus");

const PRODUCTS: &[IndexDef] = &[
    unique("sku", "$.sku"),
    index("category", "$.category"),
    SYNC_STATUS,
];
const CATEGORIES: &[IndexDef] = &[index("name", "$.name"), SYNC_STATUS];
const CUSTOMERS: &[IndexDef] = &[index("name", "$.name"), index("phone", "$.phone"), SYNC_STATUS];
const SUPPLIERS: &[IndexDef] = &[index("name", "$.name"), SYNC_STATUS];
const INVOICES: &[IndexDef] = &[
    unique("invoiceNumber", "$.invoiceNumber"),
    index("customerId", "$.customerId"),
    index("date", "$.date"),
    index("status", "$.status"),
    SYNC_STATUS,
];
const PURCHASES: &[IndexDef] = &[
    unique("purchaseNumber", "$.purchaseNumber"),
    index("supplierId", "$.supplierId"),
    index("date", "$.date"),
    SYNC_STATUS,
];
const PAYMENTS: &[IndexDef] = &[
    index("invoiceId", "$.invoiceId"),
    index("customerId", "$.customerId"),
    index("date", "$.date"),
    SYNC_STATUS,
];
const STOCK_MOVEMENTS: &[IndexDef] = &[
    index("productId", "$.productId"),
    index("date", "$.date"),
    SYNC_STATUS,
];

/// Secondary indexes declared on an entity's table.
pub fn indexes(entity: Entity) -> &'static [IndexDef] {
    match entity {
        Entity::Products => PRODUCTS,
        Entity::Categories => CATEGORIES,
        Entity::Customers => CUSTOMERS,
        Entity::Suppliers => SUPPLIERS,
        Entity::Invoices => INVOICES,
        Entity::Purchases => PURCHASES,
        Entity::Payments => PAYMENTS,
        Entity::StockMovements => STOCK_MOVEMENTS,
    }
}

pub fn find_index(entity: Entity, name: &str) -> Option<&'static IndexDef> {
    indexes(entity).iter().find(|idx| idx.name == name)
}

/// SQL expression an index is built on; queries must use the same expression.
pub fn index_expr(def: &IndexDef) -> String {
    format!("json_extract(data, '{}')", def.path)
}

fn index_name(entity: Entity, def: &IndexDef) -> String {
    format!("idx_{}_{}", entity.as_str(), def.name)
}

/// Every DDL statement of the current schema. All are idempotent.
pub fn statements() -> Vec<String> {
    let mut stmts = Vec::new();

    for entity in Entity::ALL {
        let table = entity.as_str();
        stmts.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                id         TEXT PRIMARY KEY NOT NULL,
                data       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#
        ));

        for def in indexes(entity) {
            stmts.push(format!(
                r#"CREATE {unique}INDEX IF NOT EXISTS "{name}" ON "{table}" ({expr})"#,
                unique = if def.unique { "UNIQUE " } else { "" },
                name = index_name(entity, def),
                expr = index_expr(def),
            ));
        }
    }

    stmts.push(format!(
        r#"
        CREATE TABLE IF NOT EXISTS {QUEUE_TABLE} (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            operation  TEXT NOT NULL,
            entity     TEXT NOT NULL,
            entity_id  TEXT NOT NULL,
            data       TEXT NOT NULL,
            timestamp  TEXT NOT NULL,
            retries    INTEGER NOT NULL DEFAULT 0,
            status     TEXT NOT NULL,
            error      TEXT NULL
        )
        "#
    ));
    stmts.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_{QUEUE_TABLE}_status ON {QUEUE_TABLE} (status)"
    ));
    stmts.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_{QUEUE_TABLE}_entity ON {QUEUE_TABLE} (entity, entity_id)"
    ));
    stmts.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_{QUEUE_TABLE}_timestamp ON {QUEUE_TABLE} (timestamp)"
    ));

    stmts.push(format!(
        r#"
        CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
            key   TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        )
        "#
    ));

    stmts
}
