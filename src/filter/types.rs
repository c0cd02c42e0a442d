use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    NIn,
    Between,
    Null,
}

/// Query description accepted by `SoftDeleteStore::count` / `fetch_all`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterData {
    #[serde(rename = "where", default)]
    pub where_clause: Option<serde_json::Value>,
    #[serde(default)]
    pub order: Option<serde_json::Value>,
    #[serde(default)]
    pub limit: Option<i32>,
    #[serde(default)]
    pub offset: Option<i32>,
    /// Also return soft-deleted rows
    #[serde(default)]
    pub include_deleted: bool,
    /// Return soft-deleted rows only
    #[serde(default)]
    pub only_deleted: bool,
}

impl FilterData {
    pub fn where_json(conditions: serde_json::Value) -> Self {
        Self { where_clause: Some(conditions), ..Default::default() }
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn only_deleted(mut self) -> Self {
        self.only_deleted = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: serde_json::Value,
}

/// Which side of the soft-delete line a query sees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SoftDeleteScope {
    #[default]
    Live,
    All,
    Deleted,
}

impl SoftDeleteScope {
    pub fn to_sql(&self) -> Option<&'static str> {
        match self {
            SoftDeleteScope::Live => Some("\"deleted_at\" IS NULL"),
            SoftDeleteScope::Deleted => Some("\"deleted_at\" IS NOT NULL"),
            SoftDeleteScope::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<serde_json::Value>,
}
