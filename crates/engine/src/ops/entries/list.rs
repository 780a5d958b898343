use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sea_orm::{
    Condition, QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait, prelude::*,
};

use crate::{
    EngineError, EntryKind, LedgerEntry, LifecycleStatus, ResultEngine, entries,
    util::normalize_category_key,
};

use super::super::{Engine, with_tx};
use super::attach_audit_logs;

/// Filters for listing active entries.
///
/// `from` is inclusive and `to` is exclusive (`[from, to)`), both in UTC and
/// applied to `occurred_at`.
#[derive(Clone, Debug, Default)]
pub struct EntryListFilter {
    pub kind: Option<EntryKind>,
    /// Matched on the normalized category key.
    pub category: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Substring of the description.
    pub search: Option<String>,
}

impl EntryListFilter {
    #[must_use]
    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }
}

/// Sums over the active entries matching a filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTotals {
    pub income_minor: i64,
    pub expense_minor: i64,
    /// `income - expense`.
    pub net_minor: i64,
    pub count: u64,
}

fn validate_list_filter(filter: &EntryListFilter) -> ResultEngine<()> {
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && from >= to
    {
        return Err(EngineError::InvalidAmount(
            "invalid range: from must be < to".to_string(),
        ));
    }
    Ok(())
}

/// The one sanctioned read path: active, non-deleted versions of `owner_id`
/// matching `filter`.
fn active_entries_query(
    owner_id: &str,
    filter: &EntryListFilter,
) -> ResultEngine<Select<entries::Entity>> {
    validate_list_filter(filter)?;
    let mut query = entries::Entity::find()
        .filter(entries::Column::OwnerId.eq(owner_id))
        .filter(entries::Column::LifecycleStatus.eq(LifecycleStatus::Active.as_str()))
        .filter(entries::Column::IsDeleted.eq(false));

    if let Some(kind) = filter.kind {
        query = query.filter(entries::Column::Kind.eq(kind.as_str()));
    }
    if let Some(category) = &filter.category {
        let key = normalize_category_key(category)?;
        query = query.filter(entries::Column::CategoryNorm.eq(key));
    }
    if let Some(from) = filter.from {
        query = query.filter(entries::Column::OccurredAt.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(entries::Column::OccurredAt.lt(to));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim)
        && !search.is_empty()
    {
        query = query.filter(entries::Column::Description.contains(search));
    }
    Ok(query)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EntriesCursor {
    occurred_at: DateTime<Utc>,
    entry_id: String,
}

impl EntriesCursor {
    fn encode(&self) -> ResultEngine<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|_| EngineError::InvalidCursor("invalid entries cursor".to_string()))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    fn decode(input: &str) -> ResultEngine<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(input.as_bytes())
            .map_err(|_| EngineError::InvalidCursor("invalid entries cursor".to_string()))?;
        serde_json::from_slice::<Self>(&bytes)
            .map_err(|_| EngineError::InvalidCursor("invalid entries cursor".to_string()))
    }
}

impl Engine {
    /// Lists the active entries of `owner_id`, newest first.
    pub async fn list_active_entries(
        &self,
        owner_id: &str,
        filter: &EntryListFilter,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        with_tx!(self, |db_tx| {
            let rows = active_entries_query(owner_id, filter)?
                .order_by_desc(entries::Column::OccurredAt)
                .order_by_desc(entries::Column::Id)
                .all(&db_tx)
                .await?;
            let mut out = rows
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<ResultEngine<Vec<_>>>()?;
            attach_audit_logs(&db_tx, &mut out).await?;
            Ok(out)
        })
    }

    /// Lists the active entries of `owner_id` with cursor-based pagination.
    ///
    /// Pagination is newest → older by `(occurred_at DESC, id DESC)`.
    pub async fn list_active_entries_page(
        &self,
        owner_id: &str,
        filter: &EntryListFilter,
        limit: u64,
        cursor: Option<&str>,
    ) -> ResultEngine<(Vec<LedgerEntry>, Option<String>)> {
        with_tx!(self, |db_tx| {
            let limit_plus_one = limit.saturating_add(1);
            let mut query = active_entries_query(owner_id, filter)?
                .order_by_desc(entries::Column::OccurredAt)
                .order_by_desc(entries::Column::Id)
                .limit(limit_plus_one);

            if let Some(cursor) = cursor {
                let cursor = EntriesCursor::decode(cursor)?;
                query = query.filter(
                    Condition::any()
                        .add(entries::Column::OccurredAt.lt(cursor.occurred_at))
                        .add(
                            Condition::all()
                                .add(entries::Column::OccurredAt.eq(cursor.occurred_at))
                                .add(entries::Column::Id.lt(cursor.entry_id)),
                        ),
                );
            }

            let rows = query.all(&db_tx).await?;
            let has_more = rows.len() > limit as usize;

            let mut out = rows
                .into_iter()
                .take(limit as usize)
                .map(LedgerEntry::try_from)
                .collect::<ResultEngine<Vec<_>>>()?;
            attach_audit_logs(&db_tx, &mut out).await?;

            let next_cursor = if has_more {
                out.last()
                    .map(|entry| EntriesCursor {
                        occurred_at: entry.occurred_at,
                        entry_id: entry.id.to_string(),
                    })
                    .map(|c| c.encode())
                    .transpose()?
            } else {
                None
            };

            Ok((out, next_cursor))
        })
    }

    /// Income, expense and net over the active entries matching `filter`.
    pub async fn entry_totals(
        &self,
        owner_id: &str,
        filter: &EntryListFilter,
    ) -> ResultEngine<EntryTotals> {
        let rows = active_entries_query(owner_id, filter)?
            .all(&self.database)
            .await?;

        let mut totals = EntryTotals::default();
        for row in rows {
            match EntryKind::try_from(row.kind.as_str())? {
                EntryKind::Income => totals.income_minor += row.amount_minor,
                EntryKind::Expense => totals.expense_minor += row.amount_minor,
            }
            totals.count += 1;
        }
        totals.net_minor = totals.income_minor - totals.expense_minor;
        Ok(totals)
    }
}
