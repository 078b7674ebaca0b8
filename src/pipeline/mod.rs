// src/pipeline/mod.rs
use tracing::{debug, error, info, warn};

use crate::{
    error::{store_failure, ImportError},
    join::join,
    model::{ImportResult, OrphanRating, RatingVote, ReviewImport, RowFailure},
    parse::{
        mapping::{resolve, IdMapping},
        RawRecord,
    },
    store::{
        NewReview, RatingStore, ReviewId, ReviewPatch, ReviewStore, StoreError, Vote,
        PRODUCT_ENTITY,
    },
};

/// What to do when writing one review fails part way through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RowErrorPolicy {
    /// Stop the run at the first failing review.
    #[default]
    Abort,
    /// Log the failure, list it in `ImportResult::skipped` and carry on.
    SkipAndReport,
}

/// A review whose product ids have all been resolved, ready to write.
struct PreparedReview {
    review: ReviewImport,
    product_id: String,
    votes: Vec<(RatingVote, String)>,
}

pub struct ImportPipeline<R: ReviewStore, V: RatingStore> {
    reviews: R,
    ratings: V,
    policy: RowErrorPolicy,
}

impl<R: ReviewStore, V: RatingStore> ImportPipeline<R, V> {
    pub fn new(reviews: R, ratings: V) -> Self {
        Self {
            reviews,
            ratings,
            policy: RowErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RowErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Import every review row, in order, with its ratings.
    ///
    /// Everything that can be checked without touching the stores (row
    /// shape, mapping lookups) is checked first, so a bad export or an
    /// incomplete mapping fails before the first write.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(reviews = review_rows.len(), ratings = rating_rows.len(), mapped = mapping.is_some())
    )]
    pub fn run(
        &mut self,
        review_rows: &[RawRecord],
        rating_rows: &[RawRecord],
        mapping: Option<&IdMapping>,
    ) -> Result<ImportResult, ImportError> {
        let Prepared {
            reviews: prepared,
            orphans: orphaned_ratings,
        } = prepare(review_rows, rating_rows, mapping)?;

        let mut result = ImportResult {
            orphaned_ratings,
            ..Default::default()
        };

        for item in &prepared {
            match self.import_one(item) {
                Ok((id, votes)) => {
                    result.imported += 1;
                    result.votes_recorded += votes;
                    debug!(row = item.review.row, %id, votes, "imported review");
                }
                Err(e) => match self.policy {
                    RowErrorPolicy::Abort => {
                        return Err(store_failure(item.review.row, &item.review.review_id, e))
                    }
                    RowErrorPolicy::SkipAndReport => {
                        warn!(row = item.review.row, review_id = %item.review.review_id, error = %e, "skipping review");
                        result.skipped.push(RowFailure {
                            row: item.review.row,
                            review_id: item.review.review_id.clone(),
                            message: e.to_string(),
                        });
                    }
                },
            }
        }

        if result.imported == 0 {
            return Err(ImportError::NoRowsImported);
        }

        info!(
            imported = result.imported,
            votes = result.votes_recorded,
            orphans = result.orphaned_ratings.len(),
            skipped = result.skipped.len(),
            "import finished"
        );
        Ok(result)
    }

    /// Create the review, restore its timestamp, record its votes, then aggregate.
    ///
    /// If anything fails after the review was created, the review is
    /// discarded again so a skipped row leaves nothing behind in the store.
    fn import_one(&mut self, item: &PreparedReview) -> Result<(ReviewId, usize), StoreError> {
        let review = &item.review;
        let id = self.reviews.create(&NewReview {
            entity_code: PRODUCT_ENTITY.to_string(),
            product_id: item.product_id.clone(),
            status_id: review.status_id.clone(),
            customer_id: None,
            title: review.title.clone(),
            nickname: review.nickname.clone(),
            detail: review.detail.clone(),
            store_id: review.store_id.clone(),
            stores: vec![review.store_id.clone()],
            created_at: review.created_at.clone(),
        })?;

        if let Err(e) = self.complete(id, item) {
            if let Err(rollback) = self.reviews.discard(id) {
                error!(%id, error = %rollback, "failed to discard partially imported review");
            }
            return Err(e);
        }
        Ok((id, item.votes.len()))
    }

    fn complete(&mut self, id: ReviewId, item: &PreparedReview) -> Result<(), StoreError> {
        // creation stamps its own time; put the exported one back
        self.reviews.update(
            id,
            &ReviewPatch {
                created_at: Some(item.review.created_at.clone()),
            },
        )?;

        for (rating, product_id) in &item.votes {
            self.ratings.record_vote(&Vote {
                rating_id: rating.rating_id.clone(),
                review_id: id,
                customer_id: Some(rating.customer_id.clone()).filter(|c| !c.is_empty()),
                option_id: rating.option_id.clone(),
                product_id: product_id.clone(),
            })?;
        }

        self.reviews.aggregate(id)
    }
}

struct Prepared {
    reviews: Vec<PreparedReview>,
    orphans: Vec<OrphanRating>,
}

fn prepare(
    review_rows: &[RawRecord],
    rating_rows: &[RawRecord],
    mapping: Option<&IdMapping>,
) -> Result<Prepared, ImportError> {
    let reviews = review_rows
        .iter()
        .map(ReviewImport::from_raw)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ImportError::malformed("reviews"))?;
    let ratings = rating_rows
        .iter()
        .map(RatingVote::from_raw)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ImportError::malformed("ratings"))?;

    let joined = join(&reviews, ratings);

    let mut prepared = Vec::with_capacity(reviews.len());
    for review in &reviews {
        let product_id = resolve(mapping, &review.entity_pk_value).map_err(|e| {
            ImportError::UnmappedId {
                table: "reviews",
                row: review.row,
                id: e.0,
            }
        })?;

        let votes = joined
            .group(&review.review_id)
            .iter()
            .map(|rating| {
                resolve(mapping, &rating.entity_pk_value)
                    .map(|pid| (rating.clone(), pid))
                    .map_err(|e| ImportError::UnmappedId {
                        table: "ratings",
                        row: rating.row,
                        id: e.0,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        prepared.push(PreparedReview {
            review: review.clone(),
            product_id,
            votes,
        });
    }

    Ok(Prepared {
        reviews: prepared,
        orphans: joined.orphan_report(),
    })
}
