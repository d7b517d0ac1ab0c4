pub mod accounts;
pub mod notifications;
pub mod projects;
pub mod resources;
pub mod teams;
pub mod tickets;

pub use accounts::AccountService;
pub use notifications::NotificationService;
pub use projects::ProjectService;
pub use resources::ResourceService;
pub use teams::TeamService;
pub use tickets::TicketService;

use serde_json::{json, Map, Value};

use crate::error::ApiError;

/// `%term%` for ILIKE, with the wildcard characters of `term` escaped
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Case-insensitive substring match on any of `columns`; `None` for a blank term
pub(crate) fn search_clause(columns: &[&str], term: Option<&str>) -> Option<Value> {
    let term = term.map(str::trim).filter(|t| !t.is_empty())?;
    let pattern = like_pattern(term);
    let alternatives: Vec<Value> = columns
        .iter()
        .map(|column| {
            let mut clause = Map::new();
            clause.insert(column.to_string(), json!({ "$ilike": pattern }));
            Value::Object(clause)
        })
        .collect();
    Some(json!({ "$or": alternatives }))
}

/// Conjunction of every clause, skipping empty objects
pub(crate) fn all_of(clauses: Vec<Value>) -> Value {
    let clauses: Vec<Value> = clauses
        .into_iter()
        .filter(|c| !matches!(c, Value::Object(map) if map.is_empty()))
        .collect();
    match clauses.len() {
        0 => json!({}),
        1 => clauses.into_iter().next().unwrap_or_else(|| json!({})),
        _ => json!({ "$and": clauses }),
    }
}

/// Trimmed text, or `None` when blank
pub(crate) fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Fail with a field error unless a row with `id` exists in `table`
pub(crate) async fn ensure_row<'e, E>(executor: E, table: &str, id: i64, field: &str) -> Result<(), ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)", table);
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(executor).await?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::invalid_field(field, format!("No record with id {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("vpn"), "%vpn%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn blank_search_adds_nothing() {
        assert_eq!(search_clause(&["title"], Some("   ")), None);
        assert_eq!(search_clause(&["title"], None), None);
        assert_eq!(
            search_clause(&["title", "description"], Some(" vpn ")),
            Some(json!({ "$or": [
                { "title": { "$ilike": "%vpn%" } },
                { "description": { "$ilike": "%vpn%" } }
            ] }))
        );
    }

    #[test]
    fn all_of_drops_empty_clauses() {
        assert_eq!(all_of(vec![json!({}), json!({})]), json!({}));
        assert_eq!(all_of(vec![json!({}), json!({ "status": "ACTIVE" })]), json!({ "status": "ACTIVE" }));
        assert_eq!(
            all_of(vec![json!({ "a": 1 }), json!({ "b": 2 })]),
            json!({ "$and": [{ "a": 1 }, { "b": 2 }] })
        );
    }
}
