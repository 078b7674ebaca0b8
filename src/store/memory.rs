use chrono::Utc;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};
use tracing::trace;

use super::{NewReview, RatingStore, ReviewId, ReviewPatch, ReviewStore, StoreError, Vote};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredReview {
    pub id: ReviewId,
    pub entity_code: String,
    pub product_id: String,
    pub status_id: String,
    pub customer_id: Option<String>,
    pub title: String,
    pub nickname: String,
    pub detail: String,
    pub store_id: String,
    pub stores: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredVote {
    pub review_id: ReviewId,
    pub rating_id: String,
    pub customer_id: Option<String>,
    pub option_id: String,
    pub product_id: String,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSummary {
    pub review_id: ReviewId,
    pub product_id: String,
    pub vote_count: u64,
    pub average_score: f64,
}

/// Maps rating option ids to the score (1..=5) they stand for.
///
/// Without overrides, options are laid out five per rating in ascending
/// order, so option 1 scores 1, option 5 scores 5, option 6 scores 1 again.
#[derive(Debug, Clone, Default)]
pub struct RatingOptions {
    overrides: HashMap<String, u8>,
}

impl RatingOptions {
    pub fn with_option(mut self, option_id: impl Into<String>, score: u8) -> Self {
        self.overrides.insert(option_id.into(), score);
        self
    }

    pub fn score(&self, option_id: &str) -> Result<u8, StoreError> {
        if let Some(score) = self.overrides.get(option_id) {
            return Ok(*score);
        }
        match option_id.parse::<u64>() {
            Ok(n) if n >= 1 => Ok(((n - 1) % 5 + 1) as u8),
            _ => Err(StoreError::UnknownOption(option_id.to_string())),
        }
    }
}

#[derive(Debug)]
struct CatalogState {
    reviews: BTreeMap<ReviewId, StoredReview>,
    votes: Vec<StoredVote>,
    summaries: BTreeMap<ReviewId, ReviewSummary>,
    options: RatingOptions,
    next_id: u64,
    clock: fn() -> String,
}

fn utc_now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// In-process catalog backing both store traits.
///
/// Clones share the same state, so one clone can be handed to the pipeline
/// as the review store and another as the rating store. Like the host
/// catalog it stands in for, `create` stamps its own `created_at`.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    state: Rc<RefCell<CatalogState>>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::from_tables(Vec::new(), Vec::new(), Vec::new())
    }

    /// Rebuild a catalog from previously persisted rows. New ids continue
    /// after the highest existing one.
    pub fn from_tables(
        reviews: Vec<StoredReview>,
        votes: Vec<StoredVote>,
        summaries: Vec<ReviewSummary>,
    ) -> Self {
        let next_id = reviews.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        let state = CatalogState {
            reviews: reviews.into_iter().map(|r| (r.id, r)).collect(),
            votes,
            summaries: summaries.into_iter().map(|s| (s.review_id, s)).collect(),
            options: RatingOptions::default(),
            next_id,
            clock: utc_now,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn with_options(self, options: RatingOptions) -> Self {
        self.state.borrow_mut().options = options;
        self
    }

    /// Replace the creation clock, mostly so tests can pin it.
    pub fn with_clock(self, clock: fn() -> String) -> Self {
        self.state.borrow_mut().clock = clock;
        self
    }

    pub fn review(&self, id: ReviewId) -> Option<StoredReview> {
        self.state.borrow().reviews.get(&id).cloned()
    }

    pub fn reviews(&self) -> Vec<StoredReview> {
        self.state.borrow().reviews.values().cloned().collect()
    }

    pub fn votes(&self) -> Vec<StoredVote> {
        self.state.borrow().votes.clone()
    }

    pub fn summary(&self, id: ReviewId) -> Option<ReviewSummary> {
        self.state.borrow().summaries.get(&id).cloned()
    }

    pub fn summaries(&self) -> Vec<ReviewSummary> {
        self.state.borrow().summaries.values().cloned().collect()
    }
}

impl ReviewStore for MemoryCatalog {
    fn create(&mut self, review: &NewReview) -> Result<ReviewId, StoreError> {
        let mut state = self.state.borrow_mut();
        let id = ReviewId(state.next_id);
        state.next_id += 1;

        let created_at = (state.clock)();
        state.reviews.insert(
            id,
            StoredReview {
                id,
                entity_code: review.entity_code.clone(),
                product_id: review.product_id.clone(),
                status_id: review.status_id.clone(),
                customer_id: review.customer_id.clone(),
                title: review.title.clone(),
                nickname: review.nickname.clone(),
                detail: review.detail.clone(),
                store_id: review.store_id.clone(),
                stores: review.stores.clone(),
                created_at,
            },
        );
        trace!(%id, product_id = %review.product_id, "created review");
        Ok(id)
    }

    fn update(&mut self, id: ReviewId, patch: &ReviewPatch) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        let stored = state
            .reviews
            .get_mut(&id)
            .ok_or(StoreError::ReviewNotFound(id))?;
        if let Some(created_at) = &patch.created_at {
            stored.created_at = created_at.clone();
        }
        Ok(())
    }

    fn aggregate(&mut self, id: ReviewId) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        let product_id = state
            .reviews
            .get(&id)
            .map(|r| r.product_id.clone())
            .ok_or(StoreError::ReviewNotFound(id))?;

        let (count, total) = state
            .votes
            .iter()
            .filter(|v| v.review_id == id)
            .fold((0u64, 0u64), |(n, sum), v| (n + 1, sum + u64::from(v.score)));
        let average_score = if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        };

        state.summaries.insert(
            id,
            ReviewSummary {
                review_id: id,
                product_id,
                vote_count: count,
                average_score,
            },
        );
        trace!(%id, count, average_score, "aggregated review");
        Ok(())
    }

    fn discard(&mut self, id: ReviewId) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        state
            .reviews
            .remove(&id)
            .ok_or(StoreError::ReviewNotFound(id))?;
        state.votes.retain(|v| v.review_id != id);
        state.summaries.remove(&id);
        trace!(%id, "discarded review");
        Ok(())
    }
}

impl RatingStore for MemoryCatalog {
    fn record_vote(&mut self, vote: &Vote) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if !state.reviews.contains_key(&vote.review_id) {
            return Err(StoreError::ReviewNotFound(vote.review_id));
        }
        let score = state.options.score(&vote.option_id)?;
        state.votes.push(StoredVote {
            review_id: vote.review_id,
            rating_id: vote.rating_id.clone(),
            customer_id: vote.customer_id.clone(),
            option_id: vote.option_id.clone(),
            product_id: vote.product_id.clone(),
            score,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PRODUCT_ENTITY;

    fn fixed_clock() -> String {
        "2030-01-01 00:00:00".to_string()
    }

    fn new_review(created_at: &str) -> NewReview {
        NewReview {
            entity_code: PRODUCT_ENTITY.into(),
            product_id: "42".into(),
            status_id: "1".into(),
            customer_id: None,
            title: "Solid".into(),
            nickname: "bo".into(),
            detail: "Does the job".into(),
            store_id: "1".into(),
            stores: vec!["1".into()],
            created_at: created_at.into(),
        }
    }

    #[test]
    fn create_ignores_caller_timestamp_until_updated() {
        let mut catalog = MemoryCatalog::new().with_clock(fixed_clock);
        let id = catalog.create(&new_review("2012-05-06 07:08:09")).unwrap();
        assert_eq!(id, ReviewId(1));
        assert_eq!(catalog.review(id).unwrap().created_at, "2030-01-01 00:00:00");

        catalog
            .update(
                id,
                &ReviewPatch {
                    created_at: Some("2012-05-06 07:08:09".into()),
                },
            )
            .unwrap();
        let stored = catalog.review(id).unwrap();
        assert_eq!(stored.created_at, "2012-05-06 07:08:09");
        assert_eq!(stored.status_id, "1");
    }

    #[test]
    fn aggregate_averages_scores() {
        let mut catalog =
            MemoryCatalog::new().with_options(RatingOptions::default().with_option("x", 2));
        let id = catalog.create(&new_review("")).unwrap();
        for option_id in ["5", "9", "x"] {
            catalog
                .record_vote(&Vote {
                    rating_id: "1".into(),
                    review_id: id,
                    customer_id: None,
                    option_id: option_id.into(),
                    product_id: "42".into(),
                })
                .unwrap();
        }
        catalog.aggregate(id).unwrap();

        let summary = catalog.summary(id).unwrap();
        assert_eq!(summary.vote_count, 3);
        // 5 + 4 + 2
        assert!((summary.average_score - 11.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.product_id, "42");
    }

    #[test]
    fn votes_need_a_review_and_a_known_option() {
        let mut catalog = MemoryCatalog::new();
        let vote = Vote {
            rating_id: "1".into(),
            review_id: ReviewId(9),
            customer_id: None,
            option_id: "1".into(),
            product_id: "1".into(),
        };
        assert_eq!(
            catalog.record_vote(&vote),
            Err(StoreError::ReviewNotFound(ReviewId(9)))
        );

        let id = catalog.create(&new_review("")).unwrap();
        let bad = Vote {
            review_id: id,
            option_id: "0".into(),
            ..vote
        };
        assert_eq!(
            catalog.record_vote(&bad),
            Err(StoreError::UnknownOption("0".into()))
        );
    }

    #[test]
    fn ids_continue_after_loaded_reviews() {
        let mut first = MemoryCatalog::new();
        first.create(&new_review("")).unwrap();
        first.create(&new_review("")).unwrap();

        let mut reloaded =
            MemoryCatalog::from_tables(first.reviews(), first.votes(), first.summaries());
        assert_eq!(reloaded.create(&new_review("")).unwrap(), ReviewId(3));
    }

    #[test]
    fn discard_removes_review_votes_and_summary() {
        let mut catalog = MemoryCatalog::new();
        let kept = catalog.create(&new_review("")).unwrap();
        let dropped = catalog.create(&new_review("")).unwrap();
        for id in [kept, dropped] {
            catalog
                .record_vote(&Vote {
                    rating_id: "1".into(),
                    review_id: id,
                    customer_id: None,
                    option_id: "3".into(),
                    product_id: "42".into(),
                })
                .unwrap();
            catalog.aggregate(id).unwrap();
        }

        catalog.discard(dropped).unwrap();

        assert!(catalog.review(dropped).is_none());
        assert!(catalog.summary(dropped).is_none());
        assert!(catalog.votes().iter().all(|v| v.review_id == kept));
        assert_eq!(catalog.votes().len(), 1);
        assert!(catalog.summary(kept).is_some());
        assert_eq!(
            catalog.discard(dropped),
            Err(StoreError::ReviewNotFound(dropped))
        );
    }

    #[test]
    fn clones_share_state() {
        let catalog = MemoryCatalog::new();
        let mut reviews = catalog.clone();
        let id = reviews.create(&new_review("")).unwrap();
        assert!(catalog.review(id).is_some());
    }
}
