//! Resolution of change events to full records.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::ChannelBinding;
use crate::error::{Error, Result};
use crate::event::ChangeEvent;

/// Full row data, column name to value, in column order.
pub type Record = serde_json::Map<String, Value>;

/// Outcome of looking up the record behind an event.
#[derive(Debug)]
pub enum Resolution {
    /// The record exists.
    Found(Record),
    /// No row matched. The row may have been deleted since the trigger fired.
    NotFound,
    /// The store could not be queried.
    Failed(Error),
}

impl Resolution {
    /// Whether a record was found.
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Looks up the record a change event refers to.
#[async_trait]
pub trait RecordResolver: Send + Sync {
    /// Whether events on `channel` can be resolved.
    fn handles(&self, channel: &str) -> bool;

    /// Resolve an event. Unhandled channels resolve to [`Resolution::NotFound`].
    async fn resolve(&self, event: &ChangeEvent) -> Resolution;
}

/// Point lookup of a single bound table.
///
/// The key is compared in its text form, matching the payload the trigger
/// sends, so integer and uuid keys resolve the same way text keys do.
#[derive(Debug, Clone)]
struct LookupQuery {
    sql: String,
}

impl LookupQuery {
    fn for_binding(binding: &ChannelBinding) -> Self {
        Self {
            sql: format!(
                r#"SELECT row_to_json(t) FROM "{}" AS t WHERE t."{}"::text = $1 LIMIT 1"#,
                binding.table, binding.key_column
            ),
        }
    }
}

/// Resolves events against PostgreSQL tables.
pub struct PgRecordResolver {
    pool: PgPool,
    lookups: HashMap<String, LookupQuery>,
}

impl PgRecordResolver {
    /// Create a resolver for the given bindings.
    ///
    /// Every binding is validated, so table and column names are safe to
    /// embed in the lookup statement.
    pub fn new(pool: PgPool, bindings: &[ChannelBinding]) -> Result<Self> {
        let mut lookups = HashMap::with_capacity(bindings.len());
        for binding in bindings {
            binding.validate()?;
            lookups.insert(binding.channel.clone(), LookupQuery::for_binding(binding));
        }
        Ok(Self { pool, lookups })
    }

    /// The lookup statement used for `channel`, if bound.
    pub fn lookup_sql(&self, channel: &str) -> Option<&str> {
        self.lookups.get(channel).map(|q| q.sql.as_str())
    }
}

#[async_trait]
impl RecordResolver for PgRecordResolver {
    fn handles(&self, channel: &str) -> bool {
        self.lookups.contains_key(channel)
    }

    async fn resolve(&self, event: &ChangeEvent) -> Resolution {
        let Some(lookup) = self.lookups.get(event.channel()) else {
            return Resolution::NotFound;
        };

        let row = sqlx::query_scalar::<_, Value>(&lookup.sql)
            .bind(event.payload())
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(value)) => into_resolution(event.channel(), value),
            Ok(None) => Resolution::NotFound,
            Err(e) => Resolution::Failed(Error::Database(e)),
        }
    }
}

fn into_resolution(channel: &str, value: Value) -> Resolution {
    match value {
        Value::Object(record) => Resolution::Found(record),
        _ => Resolution::Failed(Error::RecordShape {
            channel: channel.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/txfeed_test")
            .unwrap()
    }

    #[test]
    fn test_lookup_sql() {
        let query = LookupQuery::for_binding(&ChannelBinding::default());
        assert_eq!(
            query.sql,
            r#"SELECT row_to_json(t) FROM "txs" AS t WHERE t."hash"::text = $1 LIMIT 1"#
        );
    }

    #[test]
    fn test_lookup_sql_compares_key_as_text() {
        let query = LookupQuery::for_binding(&ChannelBinding::new("blockCreated", "blocks", "id"));
        assert!(query.sql.ends_with(r#"WHERE t."id"::text = $1 LIMIT 1"#));
    }

    #[test]
    fn test_into_resolution() {
        let found = into_resolution("txCreated", json!({"hash": "abc123", "amount": 5}));
        match found {
            Resolution::Found(record) => {
                assert_eq!(record.get("amount"), Some(&json!(5)));
                let keys: Vec<&String> = record.keys().collect();
                assert_eq!(keys, vec!["hash", "amount"]);
            }
            other => panic!("expected record, got {:?}", other),
        }

        let failed = into_resolution("txCreated", json!([1, 2]));
        assert!(matches!(failed, Resolution::Failed(Error::RecordShape { .. })));
    }

    #[tokio::test]
    async fn test_handles_only_bound_channels() {
        let resolver = PgRecordResolver::new(lazy_pool(), &[ChannelBinding::default()]).unwrap();

        assert!(resolver.handles("txCreated"));
        assert!(!resolver.handles("other"));
        assert!(resolver.lookup_sql("other").is_none());
    }

    #[tokio::test]
    async fn test_unbound_channel_resolves_without_query() {
        let resolver = PgRecordResolver::new(lazy_pool(), &[ChannelBinding::default()]).unwrap();
        let event = ChangeEvent::decode(crate::event::RawNotification::new("other", "abc123"));

        assert!(matches!(resolver.resolve(&event).await, Resolution::NotFound));
    }

    #[tokio::test]
    async fn test_rejects_invalid_binding() {
        let binding = ChannelBinding::new("txCreated", "txs; DROP TABLE txs", "hash");
        assert!(PgRecordResolver::new(lazy_pool(), &[binding]).is_err());
    }
}
