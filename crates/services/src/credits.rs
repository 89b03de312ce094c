//! # Credits
//!
//! Points and XP land on `users/{uid}` together with the level they imply.
//! The level is computed from the XP read back from the store, and the batch
//! is guarded on that XP, so a credit that raced another writer is
//! recomputed rather than committing a level for the wrong XP.

use domains::document::{collections, Update, WriteBatch};
use domains::errors::WriteError;
use domains::models::{Identity, Stats};

use crate::backend::{Backend, Rules};
use crate::error::{Result, StoreError};

/// Attempts before a contended credit gives up with `Conflict`.
const CREDIT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credit {
    pub uid: String,
    pub amount: i64,
}

impl Credit {
    pub fn new(uid: impl Into<String>, amount: i64) -> Self {
        Self {
            uid: uid.into(),
            amount,
        }
    }
}

/// `stats` after adding `amount`, with the level recomputed.
pub(crate) fn credited(rules: &Rules, stats: &Stats, amount: i64) -> Stats {
    let xp = stats.xp + amount;
    Stats {
        points: stats.points + amount,
        xp,
        level: rules.level_for(xp),
        streak: stats.streak,
    }
}

/// Commits the writes from `build` together with every credit, all in one
/// batch. `build` runs once per attempt and receives the post-credit stats
/// in `credits` order. Returns those stats as stored.
pub(crate) async fn commit_with_credits<F>(
    backend: &Backend,
    rules: &Rules,
    credits: &[Credit],
    mut build: F,
) -> Result<Vec<Stats>>
where
    F: FnMut(WriteBatch, &[Stats]) -> Result<WriteBatch>,
{
    for attempt in 1..=CREDIT_ATTEMPTS {
        let mut batch = WriteBatch::new();
        let mut after = Vec::with_capacity(credits.len());
        for credit in credits {
            let stored: Identity = backend
                .documents
                .get(collections::USERS, &credit.uid)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("identity {}", credit.uid)))?
                .decode()?;
            batch = batch.expect_field(collections::USERS, credit.uid.clone(), "xp", stored.stats.xp);
            after.push(credited(rules, &stored.stats, credit.amount));
        }

        batch = build(batch, &after)?;
        for (credit, stats) in credits.iter().zip(&after) {
            batch = batch.update(
                collections::USERS,
                credit.uid.clone(),
                Update::new()
                    .increment("points", credit.amount)
                    .increment("xp", credit.amount)
                    .set("level", stats.level),
            );
        }

        match backend.documents.commit(batch).await {
            Ok(()) => return Ok(after),
            Err(WriteError::Conflict(reason)) => {
                tracing::debug!(attempt, reason = %reason, "credit raced another write, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(WriteError::Conflict("identity kept changing while crediting".into()).into())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use domains::document::{Document, Write};
    use domains::ports::{MockClock, MockDocumentStore, MockIdentityProvider, MockKeyValueStore, MockObjectStorage};
    use serde_json::json;

    use super::*;

    fn user(xp: i64) -> Document {
        let fields = json!({ "email": "dad@example.com", "points": xp, "xp": xp, "level": 1 });
        match fields {
            serde_json::Value::Object(fields) => Document::new("u1", fields),
            _ => unreachable!(),
        }
    }

    fn backend(documents: MockDocumentStore) -> Backend {
        Backend {
            documents: Arc::new(documents),
            identity: Arc::new(MockIdentityProvider::new()),
            objects: Arc::new(MockObjectStorage::new()),
            local: Arc::new(MockKeyValueStore::new()),
            clock: Arc::new(MockClock::new()),
        }
    }

    #[test]
    fn credited_recomputes_the_level() {
        let stats = credited(&Rules::default(), &Stats { xp: 200, points: 200, ..Stats::default() }, 60);
        assert_eq!((stats.points, stats.xp, stats.level), (260, 260, 2));
    }

    #[tokio::test]
    async fn a_conflicting_credit_is_recomputed_from_the_new_xp() {
        let reads = Arc::new(AtomicUsize::new(0));
        let mut documents = MockDocumentStore::new();
        let counter = Arc::clone(&reads);
        documents.expect_get().times(2).returning(move |_, _| {
            // The second read sees a concurrent +100.
            let xp = if counter.fetch_add(1, Ordering::SeqCst) == 0 { 0 } else { 100 };
            Ok(Some(user(xp)))
        });
        let mut commits = 0;
        documents.expect_commit().times(2).returning(move |batch| {
            commits += 1;
            if commits == 1 {
                return Err(WriteError::Conflict("users/u1".into()));
            }
            let guarded = batch.writes().iter().any(|w| {
                matches!(w, Write::Expect { field, value, .. } if field == "xp" && *value == json!(100))
            });
            assert!(guarded, "retry must be guarded on the re-read xp");
            Ok(())
        });

        let stats = commit_with_credits(&backend(documents), &Rules::default(), &[Credit::new("u1", 200)], |b, _| {
            Ok(b)
        })
        .await
        .unwrap();
        assert_eq!((stats[0].xp, stats[0].level), (300, 2));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }
}
