//! # Gamification store
//!
//! Points and XP, levels derived from XP, the daily check-in streak, the
//! once-a-day prize spin and the leaderboard.

use std::sync::Arc;

use chrono::NaiveDate;
use domains::document::{collections, Direction, DocumentData, Query, Update};
use domains::errors::{ValidationError, WriteError};
use domains::models::{daily_key, DailyCheckIn, DailySpin, Identity, Stats, Streak};
use rand::Rng;

use crate::backend::{Backend, Rules};
use crate::credits::{self, Credit};
use crate::error::{Result, StoreError};
use crate::live;
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};
use crate::session::{SessionState, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    AlreadyCheckedIn,
    Recorded { streak: u32, points: i64 },
}

/// Streak after checking in on `today`, or `None` when already done today.
pub fn next_streak(previous: &Streak, today: NaiveDate) -> Option<Streak> {
    let current = match previous.last_check_in {
        Some(last) if last == today => return None,
        Some(last) if last.succ_opt() == Some(today) => previous.current + 1,
        _ => 1,
    };
    Some(Streak {
        id: previous.id.clone(),
        current,
        longest: previous.longest.max(current),
        last_check_in: Some(today),
    })
}

#[derive(Clone)]
pub struct GamificationStore {
    backend: Backend,
    session: SessionStore,
    rules: Arc<Rules>,
    leaderboard: Observable<Vec<Identity>>,
}

impl GamificationStore {
    pub fn new(backend: Backend, session: SessionStore, rules: Arc<Rules>) -> Self {
        Self {
            backend,
            session,
            rules,
            leaderboard: Observable::default(),
        }
    }

    pub fn leaderboard_mirror(&self) -> Observable<Vec<Identity>> {
        self.leaderboard.clone()
    }

    /// Replaces the local stats with what was stored.
    fn adopt(&self, mut stats: Stats, streak: Option<u32>) {
        if let Some(streak) = streak {
            stats.streak = streak;
        }
        self.session.update_identity(|i| i.stats = stats);
    }

    /// Credits points and XP to the caller; applied locally first, then
    /// replaced by the stored result.
    pub async fn award_points(&self, amount: i64) -> Result<Stats> {
        if amount <= 0 {
            return Err(ValidationError::new("amount", "must be positive").into());
        }
        let identity = self.session.require_active()?;
        let estimate = credits::credited(&self.rules, &identity.stats, amount);
        let estimate_after = estimate.clone();

        let credit = [Credit::new(identity.id.clone(), amount)];
        let stored = optimistic::apply(
            self.session.state(),
            "award_points",
            move |state: &mut SessionState| -> Option<Compensation<SessionState>> {
                let stats = &mut state.identity.as_mut()?.stats;
                let previous = std::mem::replace(stats, estimate);
                Some(Box::new(move |state: &mut SessionState| {
                    if let Some(identity) = state.identity.as_mut() {
                        identity.stats = previous;
                    }
                }))
            },
            credits::commit_with_credits(&self.backend, &self.rules, &credit, |batch, _| Ok(batch)),
        )
        .await?;

        let stats = stored.into_iter().next().unwrap_or(estimate_after);
        self.adopt(stats.clone(), None);
        Ok(stats)
    }

    /// Records today's check-in, continuing the streak when the last one was
    /// yesterday and restarting it otherwise. The `checkIns/{uid}_{day}`
    /// document is created in the same batch, so only one check-in per day
    /// can land even from several devices.
    pub async fn check_in(&self) -> Result<CheckIn> {
        let identity = self.session.require_active()?;
        let today = self.backend.clock.today();
        let key = daily_key(&identity.id, today);

        if self.backend.documents.get(collections::CHECK_INS, &key).await?.is_some() {
            return Ok(CheckIn::AlreadyCheckedIn);
        }
        let previous = match self.backend.documents.get(collections::STREAKS, &identity.id).await? {
            Some(doc) => doc.decode::<Streak>()?,
            None => Streak {
                id: identity.id.clone(),
                ..Streak::default()
            },
        };
        let Some(streak) = next_streak(&previous, today) else {
            return Ok(CheckIn::AlreadyCheckedIn);
        };

        let points = self.rules.check_in_points;
        let record = DailyCheckIn {
            user_id: identity.id.clone(),
            day: Some(today),
            points,
            ..DailyCheckIn::default()
        };
        let result = credits::commit_with_credits(
            &self.backend,
            &self.rules,
            &[Credit::new(identity.id.clone(), points)],
            |batch, _| {
                Ok(batch
                    .create(
                        collections::CHECK_INS,
                        key.clone(),
                        DocumentData::from_record(&record)?.with_server_timestamp("createdAt"),
                    )
                    .set(collections::STREAKS, identity.id.clone(), DocumentData::from_record(&streak)?)
                    .update(collections::USERS, identity.id.clone(), Update::new().set("streak", streak.current)))
            },
        )
        .await;

        let stored = match result {
            Ok(stored) => stored,
            Err(StoreError::Write(WriteError::AlreadyExists(_))) => return Ok(CheckIn::AlreadyCheckedIn),
            Err(e) => return Err(e),
        };
        if let Some(stats) = stored.into_iter().next() {
            self.adopt(stats, Some(streak.current));
        }
        tracing::info!(uid = %identity.id, streak = streak.current, "checked in");
        Ok(CheckIn::Recorded {
            streak: streak.current,
            points,
        })
    }

    /// Spins the daily wheel. Returns the prize, or `None` when the caller
    /// already spun today. `dailySpins/{uid}_{day}` is created with the
    /// payout, so a second spin the same day is rejected by the store.
    pub async fn spin(&self) -> Result<Option<i64>> {
        let identity = self.session.require_active()?;
        if self.rules.spin_prizes.is_empty() {
            return Err(ValidationError::new("spinPrizes", "no prizes configured").into());
        }
        let today = self.backend.clock.today();
        let key = daily_key(&identity.id, today);

        if self.backend.documents.get(collections::DAILY_SPINS, &key).await?.is_some() {
            return Ok(None);
        }

        let prize = {
            let mut rng = rand::rng();
            self.rules.spin_prizes[rng.random_range(0..self.rules.spin_prizes.len())]
        };
        let spin = DailySpin {
            user_id: identity.id.clone(),
            day: Some(today),
            prize,
            ..DailySpin::default()
        };
        let result = credits::commit_with_credits(
            &self.backend,
            &self.rules,
            &[Credit::new(identity.id.clone(), prize)],
            |batch, _| {
                Ok(batch.create(
                    collections::DAILY_SPINS,
                    key.clone(),
                    DocumentData::from_record(&spin)?.with_server_timestamp("createdAt"),
                ))
            },
        )
        .await;

        let stored = match result {
            Ok(stored) => stored,
            Err(StoreError::Write(WriteError::AlreadyExists(_))) => return Ok(None),
            Err(e) => return Err(e),
        };
        if let Some(stats) = stored.into_iter().next() {
            self.adopt(stats, None);
        }
        tracing::info!(uid = %identity.id, prize, "daily spin");
        Ok(Some(prize))
    }

    /// Top identities by points; banned identities are left out.
    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<Identity>> {
        let query = Query::collection(collections::USERS)
            .where_eq("isBanned", false)
            .order_by("points", Direction::Descending)
            .limit(limit);
        let docs = self.backend.documents.query(&query).await?;
        let top: Vec<Identity> = live::decode_visible(collections::USERS, docs);
        self.leaderboard.replace(top.clone());
        Ok(top)
    }
}
