use serde::Serialize;

use crate::error::MalformedInput;
use crate::parse::RawRecord;

pub const REVIEW_COLUMNS: [&str; 8] = [
    "entity_pk_value",
    "status_id",
    "title",
    "nickname",
    "detail",
    "store_id",
    "created_at",
    "review_id",
];

pub const RATING_COLUMNS: [&str; 5] = [
    "review_id",
    "rating_id",
    "customer_id",
    "option_id",
    "entity_pk_value",
];

/// A review row from the legacy export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewImport {
    pub row: usize,
    /// Key from the legacy catalog, used only to find this review's ratings.
    pub review_id: String,
    pub entity_pk_value: String,
    pub status_id: String,
    pub title: String,
    pub nickname: String,
    pub detail: String,
    pub store_id: String,
    pub created_at: String,
}

impl ReviewImport {
    pub fn from_raw(rec: &RawRecord) -> Result<Self, MalformedInput> {
        let field = |c: &str| rec.require(c).map(str::to_string);
        Ok(Self {
            row: rec.row,
            review_id: field("review_id")?,
            entity_pk_value: field("entity_pk_value")?,
            status_id: field("status_id")?,
            title: field("title")?,
            nickname: field("nickname")?,
            detail: field("detail")?,
            store_id: field("store_id")?,
            created_at: field("created_at")?,
        })
    }
}

/// A single option vote from the legacy ratings export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingVote {
    pub row: usize,
    pub review_id: String,
    pub rating_id: String,
    pub customer_id: String,
    pub option_id: String,
    pub entity_pk_value: String,
}

impl RatingVote {
    pub fn from_raw(rec: &RawRecord) -> Result<Self, MalformedInput> {
        let field = |c: &str| rec.require(c).map(str::to_string);
        Ok(Self {
            row: rec.row,
            review_id: field("review_id")?,
            rating_id: field("rating_id")?,
            customer_id: field("customer_id")?,
            option_id: field("option_id")?,
            entity_pk_value: field("entity_pk_value")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRating {
    pub row: usize,
    pub review_id: String,
}

/// A review row that was not imported under the skip-and-report policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: usize,
    pub review_id: String,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    /// Reviews fully persisted (create, timestamp fix, votes, aggregate).
    pub imported: usize,
    pub votes_recorded: usize,
    pub orphaned_ratings: Vec<OrphanRating>,
    pub skipped: Vec<RowFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::CsvTable;

    #[test]
    fn builds_typed_rows_and_ignores_extra_columns() {
        let table = CsvTable::parse(
            b"review_id,entity_pk_value,status_id,title,nickname,detail,store_id,created_at,extra\n\
              12,5,1,Nice,ann,Good,1,2014-03-02 10:11:12,ignored\n",
        )
        .unwrap();
        let review = ReviewImport::from_raw(&table.records()[0]).unwrap();
        assert_eq!(review.row, 1);
        assert_eq!(review.review_id, "12");
        assert_eq!(review.entity_pk_value, "5");
        assert_eq!(review.created_at, "2014-03-02 10:11:12");
    }

    #[test]
    fn missing_column_is_malformed() {
        let table = CsvTable::parse(b"review_id,rating_id\n1,2\n").unwrap();
        assert_eq!(
            RatingVote::from_raw(&table.records()[0]),
            Err(MalformedInput::MissingColumn("customer_id".into()))
        );
    }
}
