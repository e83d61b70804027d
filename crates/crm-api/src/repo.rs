//! # Typed Table Access
//!
//! [`Repo`] wraps the dynamic [`TableBackend`] with record-typed helpers:
//! rows are decoded into `crm-core` records, new rows are stamped with
//! their generated columns, and updates bump `updated_at`.
//!
//! Related display data (a contact's company, a deal's contact) is fetched
//! in one extra query per relation and joined in memory by id.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use crm_backend_client::Query;
use crm_core::{Record, Table};
use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;
use crate::store::{stamp_new_row, StoreError, TableBackend};

/// Record-typed view of the table backend.
#[derive(Clone, Copy)]
pub struct Repo<'a> {
    tables: &'a dyn TableBackend,
}

impl AppState {
    pub fn repo(&self) -> Repo<'_> {
        Repo::new(self.tables.as_ref())
    }
}

fn decode<T: Record>(row: Value) -> Result<T, StoreError> {
    Ok(serde_json::from_value(row)?)
}

impl<'a> Repo<'a> {
    pub fn new(tables: &'a dyn TableBackend) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &'a dyn TableBackend {
        self.tables
    }

    pub async fn select<T: Record>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        self.tables
            .select(T::TABLE, query)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn find<T: Record>(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        let rows = self.tables.select(T::TABLE, &Query::by_id(id)).await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Insert `row` after filling in `id` and timestamps.
    pub async fn insert<T: Record>(&self, mut row: Value) -> Result<T, StoreError> {
        stamp_new_row(T::TABLE, &mut row);
        decode(self.tables.insert(T::TABLE, row).await?)
    }

    /// Write `patch` to the row with `id`. `None` when no such row exists.
    pub async fn update<T: Record>(&self, id: Uuid, mut patch: Value) -> Result<Option<T>, StoreError> {
        if T::TABLE.has_updated_at() {
            if let Some(obj) = patch.as_object_mut() {
                obj.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
            }
        }
        let rows = self
            .tables
            .update(T::TABLE, &Query::by_id(id), patch)
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Delete the row with `id`. Returns whether a row was removed.
    pub async fn delete(&self, table: Table, id: Uuid) -> Result<bool, StoreError> {
        let removed = self.tables.delete(table, &Query::by_id(id)).await?;
        Ok(!removed.is_empty())
    }

    pub async fn count(&self, table: Table, query: &Query) -> Result<u64, StoreError> {
        self.tables.count(table, query).await
    }

    /// Fetch the records with the given ids and convert each into its
    /// display reference, keyed by id. Duplicate and missing ids are fine.
    pub async fn refs<T, R>(&self, ids: impl IntoIterator<Item = Uuid>) -> Result<HashMap<Uuid, R>, StoreError>
    where
        T: Record,
        R: for<'r> From<&'r T>,
    {
        let ids: BTreeSet<Uuid> = ids.into_iter().collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = Query::new().in_list("id", ids.iter().map(Uuid::to_string));
        Ok(self
            .select::<T>(&query)
            .await?
            .iter()
            .map(|record| (record.id(), R::from(record)))
            .collect())
    }

    /// Like [`refs`](Self::refs) for a single optional id.
    pub async fn one_ref<T, R>(&self, id: Option<Uuid>) -> Result<Option<R>, StoreError>
    where
        T: Record,
        R: for<'r> From<&'r T>,
    {
        match id {
            Some(id) => Ok(self.find::<T>(id).await?.as_ref().map(R::from)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTables;
    use crm_core::{Company, CompanyRef, Contact};
    use serde_json::json;

    #[tokio::test]
    async fn insert_stamps_and_decodes() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let company: Company = repo.insert(json!({"name": "Acme"})).await.unwrap();
        assert_eq!(company.name, "Acme");
        assert_eq!(
            repo.find::<Company>(company.id).await.unwrap().unwrap(),
            company
        );
    }

    #[tokio::test]
    async fn update_bumps_updated_at_and_reports_missing() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let company: Company = repo.insert(json!({"name": "Acme"})).await.unwrap();
        let updated: Company = repo
            .update(company.id, json!({"industry": "Retail"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.industry.as_deref(), Some("Retail"));
        assert!(updated.updated_at >= company.updated_at);

        let missing = repo
            .update::<Company>(Uuid::new_v4(), json!({"name": "x"}))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn refs_join_by_id() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let a: Company = repo.insert(json!({"name": "A"})).await.unwrap();
        let b: Company = repo.insert(json!({"name": "B"})).await.unwrap();
        let refs = repo
            .refs::<Company, CompanyRef>([a.id, a.id, b.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[&b.id].name, "B");

        let none = repo.refs::<Contact, crm_core::ContactRef>([]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let tables = MemoryTables::new();
        let repo = Repo::new(&tables);
        let company: Company = repo.insert(json!({"name": "Acme"})).await.unwrap();
        assert!(repo.delete(Table::Companies, company.id).await.unwrap());
        assert!(!repo.delete(Table::Companies, company.id).await.unwrap());
    }
}
