//! Column families
//!
//! Every registered data model owns one table per column family. A
//! `TableId` pairs the model id with the family, so families of different
//! models never share a key space.

use serde::{Deserialize, Serialize};

/// Kind of table within a model namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnFamily {
    /// rowKey → creation version
    Keys,
    /// rowKey ++ qualifier → version ++ cell
    Table,
    /// rowKey ++ qualifier ++ !version → cell
    HistoricTable,
    /// indexRef ++ value ++ rowKey → version
    Index,
    /// indexRef ++ value ++ rowKey ++ !version → set flag
    HistoricIndex,
    /// qualifier ++ value → version ++ rowKey
    Unique,
    /// qualifier ++ value ++ !version → rowKey, empty when freed
    HistoricUnique,
}

impl ColumnFamily {
    /// Families that hold current state
    pub const CURRENT: [ColumnFamily; 4] = [
        ColumnFamily::Keys,
        ColumnFamily::Table,
        ColumnFamily::Index,
        ColumnFamily::Unique,
    ];

    /// Families that hold append-only history
    pub const HISTORIC: [ColumnFamily; 3] = [
        ColumnFamily::HistoricTable,
        ColumnFamily::HistoricIndex,
        ColumnFamily::HistoricUnique,
    ];

    /// Stable family name
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Keys => "keys",
            ColumnFamily::Table => "table",
            ColumnFamily::HistoricTable => "historic.table",
            ColumnFamily::Index => "index",
            ColumnFamily::HistoricIndex => "historic.index",
            ColumnFamily::Unique => "unique",
            ColumnFamily::HistoricUnique => "historic.unique",
        }
    }

    /// Whether the family is append-only history
    pub fn is_historic(&self) -> bool {
        matches!(
            self,
            ColumnFamily::HistoricTable | ColumnFamily::HistoricIndex | ColumnFamily::HistoricUnique
        )
    }
}

/// One table: a column family of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    /// Model id assigned at registration
    pub model: u32,
    /// Column family
    pub family: ColumnFamily,
}

impl TableId {
    /// Table of `family` for `model`
    pub const fn new(model: u32, family: ColumnFamily) -> Self {
        TableId { model, family }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.model, self.family.name())
    }
}
