//! Restoration engine
//!
//! Replays captured content against a target instance. Types are visited in
//! [`ContentType::restoration_order`] so referenced objects exist before the
//! objects that point at them. Every foreign reference listed by
//! [`ContentType::references`] is translated through the identifier mappings
//! before the payload is sent; an item whose dependency is not mapped yet is
//! deferred and retried after each type pass.

use cv_common::ContentType;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{id_string, ContentApi};
use crate::config::DEFAULT_SOURCE_INSTANCE;
use crate::error::{EngineError, ErrorScope, Result};
use crate::models::{ContentItem, NewDeadLetter};
use crate::retry::RetryPolicy;
use crate::store::{ContentQuery, Store};

/// `error_type` recorded for items the target refused
pub const RESTORE_ERROR_TYPE: &str = "restore";

/// Destination id recorded in place of an API call during a dry run
const DRY_RUN_PREFIX: &str = "dry-run:";

/// Known `(type, source id) -> destination id` translations
pub type MappingTable = HashMap<(ContentType, String), String>;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Resolve dependencies and count, without API calls or mapping writes
    pub dry_run: bool,
    pub content_types: Vec<ContentType>,
    /// Label the mappings are recorded under
    pub source_instance: String,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            content_types: ContentType::ALL.to_vec(),
            source_instance: DEFAULT_SOURCE_INSTANCE.to_string(),
        }
    }
}

/// A reference that had no mapping when the item was replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReference {
    pub field: String,
    pub target: ContentType,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedItem {
    pub content_type: ContentType,
    pub source_id: String,
    pub missing: Vec<MissingReference>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreSummary {
    pub dry_run: bool,
    pub created: u64,
    pub updated: u64,
    /// Items that waited for a dependency and were restored later
    pub deferred_resolved: u64,
    pub failed: u64,
    pub unresolved: Vec<UnresolvedItem>,
}

impl RestoreSummary {
    fn record(&mut self, outcome: &Outcome, was_deferred: bool) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Deferred(_) => return,
        }
        if was_deferred && !matches!(outcome, Outcome::Failed) {
            self.deferred_resolved += 1;
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Created,
    Updated,
    Failed,
    Deferred(Vec<MissingReference>),
}

pub struct RestorationEngine {
    store: Store,
    api: Arc<dyn ContentApi>,
    retry: RetryPolicy,
    options: RestoreOptions,
}

impl RestorationEngine {
    pub fn new(store: Store, api: Arc<dyn ContentApi>, options: RestoreOptions) -> Self {
        Self {
            store,
            api,
            retry: RetryPolicy::network(),
            options,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    #[tracing::instrument(
        skip(self),
        fields(instance = %self.options.source_instance, dry_run = self.options.dry_run)
    )]
    pub async fn run(&self) -> Result<RestoreSummary> {
        let mut mappings = self.load_mappings().await?;
        let mut summary = RestoreSummary {
            dry_run: self.options.dry_run,
            ..RestoreSummary::default()
        };
        let mut deferred: Vec<(ContentItem, Vec<MissingReference>)> = Vec::new();

        for content_type in ContentType::restoration_order() {
            if !self.options.content_types.contains(&content_type) {
                continue;
            }

            let items = self.load_items(content_type).await?;
            info!(%content_type, items = items.len(), "Restoring content type");

            for item in items {
                match self.restore_item(&item, &mut mappings).await? {
                    Outcome::Deferred(missing) => {
                        debug!(
                            %content_type,
                            source_id = %item.id,
                            missing = missing.len(),
                            "Deferring until dependencies are mapped"
                        );
                        deferred.push((item, missing));
                    },
                    outcome => summary.record(&outcome, false),
                }
            }

            self.retry_deferred(&mut deferred, &mut mappings, &mut summary)
                .await?;
        }

        for (item, missing) in deferred {
            warn!(
                content_type = %item.content_type,
                source_id = %item.id,
                missing = missing.len(),
                "Dependencies never resolved"
            );
            summary.unresolved.push(UnresolvedItem {
                content_type: item.content_type,
                source_id: item.id,
                missing,
            });
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            deferred_resolved = summary.deferred_resolved,
            failed = summary.failed,
            unresolved = summary.unresolved.len(),
            "Restoration finished"
        );
        Ok(summary)
    }

    /// Replay deferred items until a full pass makes no progress
    async fn retry_deferred(
        &self,
        deferred: &mut Vec<(ContentItem, Vec<MissingReference>)>,
        mappings: &mut MappingTable,
        summary: &mut RestoreSummary,
    ) -> Result<()> {
        loop {
            let before = deferred.len();
            for (item, _) in std::mem::take(deferred) {
                match self.restore_item(&item, mappings).await? {
                    Outcome::Deferred(missing) => deferred.push((item, missing)),
                    outcome => summary.record(&outcome, true),
                }
            }
            if deferred.is_empty() || deferred.len() == before {
                return Ok(());
            }
        }
    }

    async fn load_mappings(&self) -> Result<MappingTable> {
        let stored = self
            .store
            .mappings()
            .list(&self.options.source_instance, None)
            .await?;
        Ok(stored
            .into_iter()
            .map(|m| ((m.content_type, m.source_id), m.destination_id))
            .collect())
    }

    async fn load_items(&self, content_type: ContentType) -> Result<Vec<ContentItem>> {
        let content = self.store.content();
        let mut query = ContentQuery::default();
        let mut items = Vec::new();
        loop {
            let page = content.list(content_type, query).await?;
            let exhausted = (page.len() as i64) < query.limit;
            items.extend(page);
            if exhausted {
                return Ok(items);
            }
            query.offset += query.limit;
        }
    }

    async fn restore_item(&self, item: &ContentItem, mappings: &mut MappingTable) -> Result<Outcome> {
        let payload = match item.payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.dead_letter(item, &e).await?;
                return Ok(Outcome::Failed);
            },
        };

        let (mut payload, missing) = rewrite_references(item.content_type, payload, mappings);
        if !missing.is_empty() {
            return Ok(Outcome::Deferred(missing));
        }
        if let Value::Object(fields) = &mut payload {
            fields.remove("id");
        }

        let key = (item.content_type, item.id.clone());
        let existing = mappings.get(&key).cloned();

        if self.options.dry_run {
            let outcome = if existing.is_some() {
                Outcome::Updated
            } else {
                mappings.insert(key, format!("{DRY_RUN_PREFIX}{}", item.id));
                Outcome::Created
            };
            return Ok(outcome);
        }

        let content_type = item.content_type;
        let result = match existing.as_deref() {
            Some(destination) => {
                self.retry
                    .run("update_content", || {
                        self.api.update(content_type, destination, &payload)
                    })
                    .await
            },
            None => {
                self.retry
                    .run("create_content", || self.api.create(content_type, &payload))
                    .await
            },
        };

        match result {
            Ok(destination_id) => {
                self.store
                    .mappings()
                    .upsert(&self.options.source_instance, content_type, &item.id, &destination_id)
                    .await?;
                debug!(%content_type, source_id = %item.id, %destination_id, "Restored item");
                mappings.insert(key, destination_id);
                Ok(if existing.is_some() {
                    Outcome::Updated
                } else {
                    Outcome::Created
                })
            },
            Err(e) => {
                let e = EngineError::from(e);
                if e.scope() == ErrorScope::Session {
                    return Err(e);
                }
                self.dead_letter(item, &e).await?;
                Ok(Outcome::Failed)
            },
        }
    }

    async fn dead_letter(&self, item: &ContentItem, error: &EngineError) -> Result<()> {
        warn!(
            content_type = %item.content_type,
            source_id = %item.id,
            error = %error,
            "Item could not be restored"
        );
        let entry = NewDeadLetter {
            error_type: RESTORE_ERROR_TYPE.to_string(),
            ..NewDeadLetter::for_item(
                None,
                item.content_type,
                Some(item.id.clone()),
                error,
                Some(item.content_data.clone()),
            )
        };
        self.store.dead_letters().record(&entry).await?;
        Ok(())
    }
}

/// Translate every foreign reference of `content_type` found anywhere in the
/// payload. Returns the rewritten payload and the references with no mapping.
pub fn rewrite_references(
    content_type: ContentType,
    payload: Value,
    mappings: &MappingTable,
) -> (Value, Vec<MissingReference>) {
    let mut missing = Vec::new();
    let rewritten = rewrite_value(content_type, payload, mappings, &mut missing);
    (rewritten, missing)
}

fn rewrite_value(
    content_type: ContentType,
    value: Value,
    mappings: &MappingTable,
    missing: &mut Vec<MissingReference>,
) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(key, value)| {
                    let reference = content_type.references().iter().find(|r| r.field == key);
                    let value = match reference {
                        Some(reference) => rewrite_id(&key, reference.target, value, mappings, missing),
                        None => rewrite_value(content_type, value, mappings, missing),
                    };
                    (key, value)
                })
                .collect(),
        ),
        Value::Array(values) => Value::Array(
            values
                .into_iter()
                .map(|value| rewrite_value(content_type, value, mappings, missing))
                .collect(),
        ),
        other => other,
    }
}

fn rewrite_id(
    field: &str,
    target: ContentType,
    value: Value,
    mappings: &MappingTable,
    missing: &mut Vec<MissingReference>,
) -> Value {
    let Some(source_id) = id_string(&value) else {
        return value;
    };

    match mappings.get(&(target, source_id.clone())) {
        // Keep numeric ids numeric when the destination allows it
        Some(destination) if value.is_number() => destination
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(destination.clone())),
        Some(destination) => Value::String(destination.clone()),
        None => {
            missing.push(MissingReference {
                field: field.to_string(),
                target,
                source_id,
            });
            value
        },
    }
}
