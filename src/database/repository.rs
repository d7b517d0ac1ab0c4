use serde_json::{json, Value};
use sqlx::{self, postgres::PgRow, FromRow, PgPool};

use crate::database::manager::DatabaseError;
use crate::database::query_builder::SelectQuery;
use crate::filter::FilterData;

/// Read access to one table (or view) through the JSON filter language
pub struct Repository<T> {
    table_name: &'static str,
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    pub fn new(table_name: &'static str, pool: PgPool) -> Self {
        Self {
            table_name,
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    pub async fn select_any(&self, filter_data: FilterData) -> Result<Vec<T>, DatabaseError> {
        SelectQuery::<T>::new(self.table_name)?
            .filter(filter_data)?
            .select_all(&self.pool)
            .await
    }

    pub async fn select_one(&self, filter_data: FilterData) -> Result<Option<T>, DatabaseError> {
        SelectQuery::<T>::new(self.table_name)?
            .filter(filter_data)?
            .select_optional(&self.pool)
            .await
    }

    /// Fetch a row by id or fail with `NotFound(message)`
    pub async fn select_404(&self, id: i64, message: &str) -> Result<T, DatabaseError> {
        let filter = FilterData {
            where_clause: Some(json!({ "id": id })),
            ..Default::default()
        };
        self.select_one(filter)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(message.to_string()))
    }

    pub async fn count(&self, filter_data: FilterData) -> Result<i64, DatabaseError> {
        SelectQuery::<T>::new(self.table_name)?
            .filter(filter_data)?
            .count(&self.pool)
            .await
    }

    /// One page of rows plus the total matching count
    pub async fn select_page(
        &self,
        where_clause: Value,
        order: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<T>, i64), DatabaseError> {
        let total = self
            .count(FilterData {
                where_clause: Some(where_clause.clone()),
                ..Default::default()
            })
            .await?;
        let rows = self
            .select_any(FilterData {
                where_clause: Some(where_clause),
                order: Some(json!(order)),
                limit: Some(limit),
                offset: Some(offset),
            })
            .await?;
        Ok((rows, total))
    }
}
