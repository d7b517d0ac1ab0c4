use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter::validate_identifier;
use super::types::FilterOp;

/// Turns a JSON condition tree into a parameterised SQL predicate.
/// Placeholders are numbered across the whole tree, nested groups included.
pub struct FilterWhere {
    param_values: Vec<Value>,
}

impl FilterWhere {
    pub fn generate(where_data: &Value) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self { param_values: vec![] };
        let sql = filter_where.clause(where_data)?;
        Ok((sql, filter_where.param_values))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn clause(&mut self, where_data: &Value) -> Result<String, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok("1=1".to_string()),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut parts = Vec::new();
        for (key, value) in obj {
            if key.starts_with('$') {
                parts.push(self.logical(key, value)?);
            } else {
                parts.extend(self.field(key, value)?);
            }
        }

        Ok(if parts.is_empty() { "1=1".to_string() } else { parts.join(" AND ") })
    }

    fn logical(&mut self, op: &str, value: &Value) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    return Ok(if op == "$and" { "1=1" } else { "1=0" }.to_string());
                }
                let mut sql_parts = Vec::with_capacity(arr.len());
                for v in arr {
                    sql_parts.push(format!("({})", self.clause(v)?));
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => Ok(format!("NOT ({})", self.clause(value)?)),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn field(&mut self, column: &str, value: &Value) -> Result<Vec<String>, FilterError> {
        validate_identifier(column).map_err(FilterError::InvalidColumn)?;

        match value {
            Value::Object(obj) if is_operator_map(obj) => {
                let mut out = Vec::with_capacity(obj.len());
                for (op_key, op_val) in obj {
                    let operator = FilterOp::parse(op_key)
                        .ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                    out.push(self.condition(column, operator, op_val)?);
                }
                Ok(out)
            }
            // Implicit equality: { field: value }
            _ => Ok(vec![self.condition(column, FilterOp::Eq, value)?]),
        }
    }

    fn condition(&mut self, column: &str, operator: FilterOp, data: &Value) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", column);
        let sql = match operator {
            FilterOp::Eq if data.is_null() => format!("{} IS NULL", quoted_column),
            FilterOp::Ne if data.is_null() => format!("{} IS NOT NULL", quoted_column),
            FilterOp::Eq => format!("{} = {}", quoted_column, self.param(data)),
            FilterOp::Ne => format!("{} <> {}", quoted_column, self.param(data)),
            FilterOp::Gt => format!("{} > {}", quoted_column, self.param(data)),
            FilterOp::Gte => format!("{} >= {}", quoted_column, self.param(data)),
            FilterOp::Lt => format!("{} < {}", quoted_column, self.param(data)),
            FilterOp::Lte => format!("{} <= {}", quoted_column, self.param(data)),
            FilterOp::Like => format!("{} LIKE {}", quoted_column, self.param(data)),
            FilterOp::ILike => format!("{} ILIKE {}", quoted_column, self.param(data)),
            FilterOp::In | FilterOp::NIn => {
                let values = as_list(data);
                let negate = operator == FilterOp::NIn;
                if values.is_empty() {
                    return Ok(if negate { "1=1" } else { "1=0" }.to_string());
                }
                let params: Vec<String> = values.iter().map(|v| self.param(v)).collect();
                let keyword = if negate { "NOT IN" } else { "IN" };
                format!("{} {} ({})", quoted_column, keyword, params.join(", "))
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => {
                    let low = self.param(&values[0]);
                    let high = self.param(&values[1]);
                    format!("{} BETWEEN {} AND {}", quoted_column, low, high)
                }
                _ => {
                    return Err(FilterError::InvalidOperatorData(
                        "$between requires exactly 2 values".to_string(),
                    ))
                }
            },
            FilterOp::Any | FilterOp::All => {
                let values = as_list(data);
                if values.is_empty() {
                    return Ok(if operator == FilterOp::Any { "1=0" } else { "1=1" }.to_string());
                }
                let params: Vec<String> = values.iter().map(|v| self.param(v)).collect();
                let symbol = if operator == FilterOp::Any { "&&" } else { "@>" };
                format!("{} {} ARRAY[{}]", quoted_column, symbol, params.join(", "))
            }
            FilterOp::Size => format!("COALESCE(array_length({}, 1), 0) = {}", quoted_column, self.param(data)),
            FilterOp::Null => match data.as_bool() {
                Some(true) => format!("{} IS NULL", quoted_column),
                Some(false) => format!("{} IS NOT NULL", quoted_column),
                None => return Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        };
        Ok(sql)
    }

    fn param(&mut self, value: &Value) -> String {
        self.param_values.push(value.clone());
        format!("${}", self.param_values.len())
    }
}

fn is_operator_map(obj: &Map<String, Value>) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

fn as_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(values) => values.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn implicit_equality_and_null() {
        let (sql, params) = FilterWhere::generate(&json!({ "assigned_to": null, "status": "APPROVED" })).unwrap();
        assert_eq!(sql, "\"assigned_to\" IS NULL AND \"status\" = $1");
        assert_eq!(params, vec![json!("APPROVED")]);
    }

    #[test]
    fn nested_groups_keep_numbering() {
        let where_data = json!({
            "$and": [
                { "$or": [ { "created_by": 5 }, { "assigned_to": 5 } ] },
                { "$or": [ { "title": { "$ilike": "%vpn%" } }, { "description": { "$ilike": "%vpn%" } } ] }
            ],
            "status": "PENDING_APPROVAL"
        });
        let (sql, params) = FilterWhere::generate(&where_data).unwrap();
        assert_eq!(
            sql,
            "((((\"created_by\" = $1) OR (\"assigned_to\" = $2))) AND (((\"title\" ILIKE $3) OR (\"description\" ILIKE $4)))) AND \"status\" = $5"
        );
        assert_eq!(params.len(), 5);
        assert_eq!(params[4], json!("PENDING_APPROVAL"));
    }

    #[test]
    fn empty_in_matches_nothing() {
        let (sql, params) = FilterWhere::generate(&json!({ "team_id": { "$in": [] } })).unwrap();
        assert_eq!(sql, "1=0");
        assert!(params.is_empty());
    }

    #[test]
    fn in_list_expands_placeholders() {
        let (sql, params) = FilterWhere::generate(&json!({ "id": { "$in": [1, 2, 3] } })).unwrap();
        assert_eq!(sql, "\"id\" IN ($1, $2, $3)");
        assert_eq!(params, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn array_overlap_and_between() {
        let (sql, _) = FilterWhere::generate(&json!({
            "progress": { "$between": [10, 90] },
            "tags": { "$any": ["vpn", "laptop"] }
        }))
        .unwrap();
        assert_eq!(sql, "\"progress\" BETWEEN $1 AND $2 AND \"tags\" && ARRAY[$3, $4]");
    }

    #[test]
    fn rejects_bad_columns_and_operators() {
        assert!(matches!(
            FilterWhere::generate(&json!({ "id; DROP TABLE accounts": 1 })),
            Err(FilterError::InvalidColumn(_))
        ));
        assert!(matches!(
            FilterWhere::generate(&json!({ "id": { "$regex": "x" } })),
            Err(FilterError::UnsupportedOperator(_))
        ));
        assert!(FilterWhere::validate(&json!("1=1")).is_err());
    }
}
