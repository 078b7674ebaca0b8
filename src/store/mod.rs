// src/store/mod.rs
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod persist;

pub use memory::{MemoryCatalog, RatingOptions};

/// Identifier the local review store assigns on creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ReviewId(pub u64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity type code reviews are attached to.
pub const PRODUCT_ENTITY: &str = "product";

/// Fields handed to the review store when a review is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub entity_code: String,
    pub product_id: String,
    pub status_id: String,
    pub customer_id: Option<String>,
    pub title: String,
    pub nickname: String,
    pub detail: String,
    pub store_id: String,
    pub stores: Vec<String>,
    /// Passed through for completeness; stores may overwrite it on create.
    pub created_at: String,
}

/// Partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewPatch {
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub rating_id: String,
    pub review_id: ReviewId,
    pub customer_id: Option<String>,
    pub option_id: String,
    pub product_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("review {0} does not exist")]
    ReviewNotFound(ReviewId),

    #[error("rating option `{0}` is not known")]
    UnknownOption(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence for review entities.
pub trait ReviewStore {
    /// Create a review and return its new id. Implementations are free to
    /// replace `created_at` with their own clock.
    fn create(&mut self, review: &NewReview) -> Result<ReviewId, StoreError>;

    fn update(&mut self, id: ReviewId, patch: &ReviewPatch) -> Result<(), StoreError>;

    /// Recompute the summary statistics for a review from its recorded votes.
    fn aggregate(&mut self, id: ReviewId) -> Result<(), StoreError>;

    /// Remove a review together with its votes and summary. Used to roll back
    /// a review whose import failed after it was created.
    fn discard(&mut self, id: ReviewId) -> Result<(), StoreError>;
}

/// Persistence for scored option votes attached to reviews.
pub trait RatingStore {
    fn record_vote(&mut self, vote: &Vote) -> Result<(), StoreError>;
}
