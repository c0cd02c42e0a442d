use serde_json::Value;
use std::collections::HashMap;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereInfo, SoftDeleteScope};
use super::is_valid_identifier;

/// Translates a JSON where-object into a parameterized SQL predicate.
///
/// Placeholders are numbered from 1 across the whole predicate, nested
/// `$and` / `$or` / `$not` groups included. When column types are known,
/// comparison parameters are cast to the column type (`$1::timestamptz`).
pub struct FilterWhere<'a> {
    param_values: Vec<Value>,
    column_types: Option<&'a HashMap<String, String>>,
}

impl<'a> FilterWhere<'a> {
    fn new(column_types: Option<&'a HashMap<String, String>>) -> Self {
        Self { param_values: vec![], column_types }
    }

    /// Build the full predicate, always prefixed by the soft-delete scope clause
    pub fn generate(
        where_data: Option<&Value>,
        scope: SoftDeleteScope,
        column_types: Option<&'a HashMap<String, String>>,
    ) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(column_types);
        let mut sql_conditions = vec![];
        if let Some(scope_sql) = scope.to_sql() {
            sql_conditions.push(scope_sql.to_string());
        }
        if let Some(data) = where_data {
            if let Some(sql) = filter_where.build_group(data)? {
                sql_conditions.push(sql);
            }
        }
        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, filter_where.param_values))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    /// One object level: every key is ANDed together
    fn build_group(&mut self, where_data: &Value) -> Result<Option<String>, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(None),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut parts = vec![];
        for (key, value) in obj {
            if key.starts_with('$') {
                parts.push(self.build_logical(key, value)?);
            } else {
                for condition in Self::parse_field_condition(key, value)? {
                    parts.push(self.build_sql_condition(&condition)?);
                }
            }
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(parts.join(" AND ")),
        })
    }

    fn build_logical(&mut self, op: &str, value: &Value) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut sql_parts = Vec::new();
                for v in arr {
                    if let Some(sql) = self.build_group(v)? {
                        sql_parts.push(format!("({})", sql));
                    }
                }
                if sql_parts.is_empty() {
                    // Empty AND is vacuously true, empty OR matches nothing
                    return Ok(if op == "$and" { "1=1".to_string() } else { "1=0".to_string() });
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => {
                let inner = self.build_group(value)?.unwrap_or_else(|| "1=1".to_string());
                Ok(format!("NOT ({})", inner))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
        if !is_valid_identifier(field) {
            return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", field)));
        }
        let mut out = vec![];
        match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => {
                for (op_key, op_val) in obj {
                    let operator = Self::map_operator(op_key)?;
                    out.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
                }
            }
            // Implicit equality: { field: value }
            _ => out.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }),
        }
        Ok(out)
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Neq,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$between" => FilterOp::Between,
            "$null" => FilterOp::Null,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", condition.column);
        let cast = self.column_cast(&condition.column)?;
        let data = &condition.data;
        match condition.operator {
            FilterOp::Eq => {
                if data.is_null() { Ok(format!("{} IS NULL", quoted_column)) }
                else { Ok(format!("{} = {}", quoted_column, self.typed_param(data, cast.as_deref())?)) }
            }
            FilterOp::Neq => {
                if data.is_null() { Ok(format!("{} IS NOT NULL", quoted_column)) }
                else { Ok(format!("{} <> {}", quoted_column, self.typed_param(data, cast.as_deref())?)) }
            }
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.typed_param(data, cast.as_deref())?)),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.typed_param(data, cast.as_deref())?)),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.typed_param(data, cast.as_deref())?)),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.typed_param(data, cast.as_deref())?)),
            // Patterns are text whatever the column type
            FilterOp::Like => Ok(format!("{} LIKE {}", quoted_column, self.param(data)?)),
            FilterOp::ILike => Ok(format!("{} ILIKE {}", quoted_column, self.param(data)?)),
            FilterOp::In | FilterOp::NIn => {
                let values = data
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData("$in/$nin require an array".to_string()))?;
                let negate = condition.operator == FilterOp::NIn;
                if values.is_empty() {
                    return Ok(if negate { "1=1".to_string() } else { "1=0".to_string() });
                }
                let params = values.iter().map(|v| self.typed_param(v, cast.as_deref())).collect::<Result<Vec<_>, _>>()?;
                let keyword = if negate { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
            }
            FilterOp::Between => match data.as_array() {
                Some(values) if values.len() == 2 => Ok(format!(
                    "{} BETWEEN {} AND {}",
                    quoted_column,
                    self.typed_param(&values[0], cast.as_deref())?,
                    self.typed_param(&values[1], cast.as_deref())?
                )),
                _ => Err(FilterError::InvalidOperatorData("$between requires exactly 2 values".to_string())),
            },
            FilterOp::Null => match data.as_bool() {
                Some(true) => Ok(format!("{} IS NULL", quoted_column)),
                Some(false) => Ok(format!("{} IS NOT NULL", quoted_column)),
                None => Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        }
    }

    /// Type name to cast parameters to; unknown columns fail once types are known
    fn column_cast(&self, column: &str) -> Result<Option<String>, FilterError> {
        let Some(types) = self.column_types else { return Ok(None) };
        match types.get(column) {
            Some(udt) if is_valid_identifier(udt) => Ok(Some(udt.clone())),
            Some(_) => Ok(None),
            None => Err(FilterError::InvalidColumn(format!("Unknown column: {}", column))),
        }
    }

    fn typed_param(&mut self, value: &Value, cast: Option<&str>) -> Result<String, FilterError> {
        let placeholder = self.param(value)?;
        Ok(match cast {
            Some(udt) => format!("{}::{}", placeholder, udt),
            None => placeholder,
        })
    }

    fn param(&mut self, value: &Value) -> Result<String, FilterError> {
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(FilterError::InvalidOperatorData(format!("Unsupported parameter value: {}", value)));
        }
        self.param_values.push(value.clone());
        Ok(format!("${}", self.param_values.len()))
    }
}
