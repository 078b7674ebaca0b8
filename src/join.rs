use std::collections::HashMap;
use tracing::{debug, warn};

use crate::model::{OrphanRating, RatingVote, ReviewImport};

/// Ratings grouped under the legacy `review_id` of the review they belong to.
#[derive(Debug, Default)]
pub struct JoinedRatings {
    groups: HashMap<String, Vec<RatingVote>>,
    orphans: Vec<RatingVote>,
}

impl JoinedRatings {
    /// Ratings for `review_id`, in file order. Unknown keys give an empty slice.
    pub fn group(&self, review_id: &str) -> &[RatingVote] {
        self.groups
            .get(review_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn orphans(&self) -> &[RatingVote] {
        &self.orphans
    }

    pub fn orphan_report(&self) -> Vec<OrphanRating> {
        self.orphans
            .iter()
            .map(|r| OrphanRating {
                row: r.row,
                review_id: r.review_id.clone(),
            })
            .collect()
    }
}

/// Group `ratings` by review key. Keys are compared as exact strings on both
/// sides; a rating whose key matches no review is kept aside as an orphan.
pub fn join(reviews: &[ReviewImport], ratings: Vec<RatingVote>) -> JoinedRatings {
    let mut groups: HashMap<String, Vec<RatingVote>> = reviews
        .iter()
        .map(|r| (r.review_id.clone(), Vec::new()))
        .collect();
    let mut orphans = Vec::new();

    for rating in ratings {
        match groups.get_mut(&rating.review_id) {
            Some(group) => group.push(rating),
            None => {
                warn!(row = rating.row, review_id = %rating.review_id, "orphaned rating, no review with this id");
                orphans.push(rating);
            }
        }
    }

    debug!(
        groups = groups.len(),
        orphans = orphans.len(),
        "joined ratings to reviews"
    );
    JoinedRatings { groups, orphans }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(review_id: &str) -> ReviewImport {
        ReviewImport {
            row: 1,
            review_id: review_id.into(),
            entity_pk_value: "1".into(),
            status_id: "1".into(),
            title: "t".into(),
            nickname: "n".into(),
            detail: "d".into(),
            store_id: "1".into(),
            created_at: "2015-01-01 00:00:00".into(),
        }
    }

    fn rating(row: usize, review_id: &str, option_id: &str) -> RatingVote {
        RatingVote {
            row,
            review_id: review_id.into(),
            rating_id: "1".into(),
            customer_id: "".into(),
            option_id: option_id.into(),
            entity_pk_value: "1".into(),
        }
    }

    #[test]
    fn groups_by_review_in_file_order() {
        let reviews = vec![review("10"), review("11")];
        let joined = join(
            &reviews,
            vec![rating(1, "10", "3"), rating(2, "11", "4"), rating(3, "10", "5")],
        );

        let options: Vec<_> = joined
            .group("10")
            .iter()
            .map(|r| r.option_id.as_str())
            .collect();
        assert_eq!(options, vec!["3", "5"]);
        assert_eq!(joined.group("11").len(), 1);
        assert!(joined.orphans().is_empty());
    }

    #[test]
    fn review_without_ratings_has_empty_group() {
        let joined = join(&[review("10")], Vec::new());
        assert!(joined.group("10").is_empty());
        assert!(joined.group("nope").is_empty());
    }

    #[test]
    fn unmatched_ratings_are_orphans() {
        let joined = join(
            &[review("10")],
            vec![rating(1, "10", "1"), rating(2, "99", "2"), rating(3, "010", "3")],
        );
        assert_eq!(joined.group("10").len(), 1);
        assert_eq!(
            joined.orphan_report(),
            vec![
                OrphanRating {
                    row: 2,
                    review_id: "99".into()
                },
                OrphanRating {
                    row: 3,
                    review_id: "010".into()
                },
            ]
        );
    }
}
