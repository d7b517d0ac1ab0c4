use serde_json::Value;

use super::error::FilterError;
use super::filter::validate_identifier;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let infos = match order {
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                // Expect array of strings like ["created_at desc", "name asc"]
                let mut out = Vec::new();
                for v in arr {
                    if let Value::String(s) = v {
                        out.extend(Self::parse_order_string(s));
                    }
                }
                out
            }
            Value::Object(obj) => {
                // { "created_at": "desc", "name": "asc" }
                obj.iter()
                    .map(|(k, v)| FilterOrderInfo {
                        column: k.clone(),
                        sort: Self::direction(v.as_str().unwrap_or("asc")),
                    })
                    .collect()
            }
            _ => vec![],
        };

        for info in &infos {
            validate_identifier(&info.column).map_err(FilterError::InvalidColumn)?;
        }
        Ok(infos)
    }

    fn direction(raw: &str) -> SortDirection {
        if raw.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    fn parse_order_string(s: &str) -> Vec<FilterOrderInfo> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let mut it = part.split_whitespace();
            if let Some(col) = it.next() {
                let sort = Self::direction(it.next().unwrap_or("asc"));
                out.push(FilterOrderInfo { column: col.to_string(), sort });
            }
        }
        out
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("\"{}\" {}", i.column, i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_and_array_forms() {
        let infos = FilterOrder::validate_and_parse(&json!("created_at desc, id")).unwrap();
        assert_eq!(FilterOrder::generate(&infos), "ORDER BY \"created_at\" DESC, \"id\" ASC");

        let infos = FilterOrder::validate_and_parse(&json!(["name asc", "id DESC"])).unwrap();
        assert_eq!(FilterOrder::generate(&infos), "ORDER BY \"name\" ASC, \"id\" DESC");
    }

    #[test]
    fn rejects_injected_column() {
        let err = FilterOrder::validate_and_parse(&json!("id; DROP TABLE tickets")).unwrap_err();
        assert!(matches!(err, FilterError::InvalidColumn(_)));
    }
}
