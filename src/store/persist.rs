use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Array, StringArray, UInt64Array, UInt8Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

use super::{
    memory::{ReviewSummary, StoredReview, StoredVote},
    MemoryCatalog, ReviewId,
};

/// A row type stored as one Parquet file in the catalog directory.
pub trait CatalogTable: Sized {
    const FILE_NAME: &'static str;
    /// Arrow schema for this table
    fn schema() -> ArrowSchema;
    /// Convert rows into column arrays matching the schema
    fn to_arrays(rows: &[Self]) -> Vec<ArrayRef>;
    /// Rebuild rows from a batch read back from disk
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    batch
        .column_by_name(name)
        .with_context(|| format!("missing column `{}`", name))?
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| format!("column `{}` has an unexpected type", name))
}

fn optional(arr: &StringArray, i: usize) -> Option<String> {
    if arr.is_null(i) {
        None
    } else {
        Some(arr.value(i).to_string())
    }
}

impl CatalogTable for StoredReview {
    const FILE_NAME: &'static str = "reviews.parquet";

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("review_id", ArrowDataType::UInt64, false),
            Field::new("entity_code", ArrowDataType::Utf8, false),
            Field::new("product_id", ArrowDataType::Utf8, false),
            Field::new("status_id", ArrowDataType::Utf8, false),
            Field::new("customer_id", ArrowDataType::Utf8, true),
            Field::new("title", ArrowDataType::Utf8, false),
            Field::new("nickname", ArrowDataType::Utf8, false),
            Field::new("detail", ArrowDataType::Utf8, false),
            Field::new("store_id", ArrowDataType::Utf8, false),
            // comma separated store ids
            Field::new("stores", ArrowDataType::Utf8, false),
            Field::new("created_at", ArrowDataType::Utf8, false),
        ])
    }

    fn to_arrays(rows: &[Self]) -> Vec<ArrayRef> {
        let strings = |f: fn(&Self) -> String| -> ArrayRef {
            Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
        };
        vec![
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.id.0).collect::<Vec<_>>(),
            )),
            strings(|r| r.entity_code.clone()),
            strings(|r| r.product_id.clone()),
            strings(|r| r.status_id.clone()),
            Arc::new(StringArray::from(
                rows.iter()
                    .map(|r| r.customer_id.clone())
                    .collect::<Vec<_>>(),
            )),
            strings(|r| r.title.clone()),
            strings(|r| r.nickname.clone()),
            strings(|r| r.detail.clone()),
            strings(|r| r.store_id.clone()),
            strings(|r| r.stores.join(",")),
            strings(|r| r.created_at.clone()),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let ids = column::<UInt64Array>(batch, "review_id")?;
        let entity = column::<StringArray>(batch, "entity_code")?;
        let product = column::<StringArray>(batch, "product_id")?;
        let status = column::<StringArray>(batch, "status_id")?;
        let customer = column::<StringArray>(batch, "customer_id")?;
        let title = column::<StringArray>(batch, "title")?;
        let nickname = column::<StringArray>(batch, "nickname")?;
        let detail = column::<StringArray>(batch, "detail")?;
        let store = column::<StringArray>(batch, "store_id")?;
        let stores = column::<StringArray>(batch, "stores")?;
        let created = column::<StringArray>(batch, "created_at")?;

        Ok((0..batch.num_rows())
            .map(|i| StoredReview {
                id: ReviewId(ids.value(i)),
                entity_code: entity.value(i).to_string(),
                product_id: product.value(i).to_string(),
                status_id: status.value(i).to_string(),
                customer_id: optional(customer, i),
                title: title.value(i).to_string(),
                nickname: nickname.value(i).to_string(),
                detail: detail.value(i).to_string(),
                store_id: store.value(i).to_string(),
                stores: stores
                    .value(i)
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                created_at: created.value(i).to_string(),
            })
            .collect())
    }
}

impl CatalogTable for StoredVote {
    const FILE_NAME: &'static str = "votes.parquet";

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("review_id", ArrowDataType::UInt64, false),
            Field::new("rating_id", ArrowDataType::Utf8, false),
            Field::new("customer_id", ArrowDataType::Utf8, true),
            Field::new("option_id", ArrowDataType::Utf8, false),
            Field::new("product_id", ArrowDataType::Utf8, false),
            Field::new("score", ArrowDataType::UInt8, false),
        ])
    }

    fn to_arrays(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.review_id.0).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.rating_id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter()
                    .map(|r| r.customer_id.clone())
                    .collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.option_id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.product_id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(UInt8Array::from(
                rows.iter().map(|r| r.score).collect::<Vec<_>>(),
            )),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let review = column::<UInt64Array>(batch, "review_id")?;
        let rating = column::<StringArray>(batch, "rating_id")?;
        let customer = column::<StringArray>(batch, "customer_id")?;
        let option = column::<StringArray>(batch, "option_id")?;
        let product = column::<StringArray>(batch, "product_id")?;
        let score = column::<UInt8Array>(batch, "score")?;

        Ok((0..batch.num_rows())
            .map(|i| StoredVote {
                review_id: ReviewId(review.value(i)),
                rating_id: rating.value(i).to_string(),
                customer_id: optional(customer, i),
                option_id: option.value(i).to_string(),
                product_id: product.value(i).to_string(),
                score: score.value(i),
            })
            .collect())
    }
}

impl CatalogTable for ReviewSummary {
    const FILE_NAME: &'static str = "summaries.parquet";

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("review_id", ArrowDataType::UInt64, false),
            Field::new("product_id", ArrowDataType::Utf8, false),
            Field::new("vote_count", ArrowDataType::UInt64, false),
            Field::new("average_score", ArrowDataType::Float64, false),
        ])
    }

    fn to_arrays(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.review_id.0).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.product_id.clone()).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.vote_count).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.average_score).collect::<Vec<_>>(),
            )),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let review = column::<UInt64Array>(batch, "review_id")?;
        let product = column::<StringArray>(batch, "product_id")?;
        let count = column::<UInt64Array>(batch, "vote_count")?;
        let average = column::<Float64Array>(batch, "average_score")?;

        Ok((0..batch.num_rows())
            .map(|i| ReviewSummary {
                review_id: ReviewId(review.value(i)),
                product_id: product.value(i).to_string(),
                vote_count: count.value(i),
                average_score: average.value(i),
            })
            .collect())
    }
}

/// A table written next to its final location, waiting to be renamed into place.
pub struct StagedTable {
    tmp: PathBuf,
    final_path: PathBuf,
}

impl StagedTable {
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.tmp, &self.final_path)
            .with_context(|| format!("moving {:?} into place", &self.final_path))
    }
}

/// Write `rows` to `<dir>/<FILE_NAME>.tmp`. Nothing is replaced until the
/// returned table is committed.
pub fn stage_table<T: CatalogTable>(dir: &Path, rows: &[T]) -> Result<StagedTable> {
    let schema = Arc::new(T::schema());
    let final_path = dir.join(T::FILE_NAME);
    let tmp = dir.join(format!("{}.tmp", T::FILE_NAME));

    let batch = RecordBatch::try_new(schema.clone(), T::to_arrays(rows))
        .with_context(|| format!("building record batch for {}", T::FILE_NAME))?;
    let file =
        File::create(&tmp).with_context(|| format!("creating catalog file {:?}", &tmp))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), schema, Some(props))
        .context("creating Arrow writer for catalog")?;
    writer.write(&batch).context("writing catalog batch")?;
    writer.close().context("closing catalog writer")?;

    debug!(file = T::FILE_NAME, rows = rows.len(), "staged catalog table");
    Ok(StagedTable { tmp, final_path })
}

/// Read every row of `<dir>/<FILE_NAME>`; a missing file is an empty table.
pub fn read_table<T: CatalogTable>(dir: &Path) -> Result<Vec<T>> {
    let path = dir.join(T::FILE_NAME);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(1024)
        .build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading `{}`", path.display()))?;
        rows.extend(T::from_batch(&batch)?);
    }
    Ok(rows)
}

/// Load the catalog kept in `dir`, or an empty one if nothing is there yet.
#[tracing::instrument(level = "info", skip(dir), fields(dir = %dir.as_ref().display()))]
pub fn open<P: AsRef<Path>>(dir: P) -> Result<MemoryCatalog> {
    let dir = dir.as_ref();
    let reviews: Vec<StoredReview> = read_table(dir)?;
    let votes: Vec<StoredVote> = read_table(dir)?;
    let summaries: Vec<ReviewSummary> = read_table(dir)?;
    info!(
        reviews = reviews.len(),
        votes = votes.len(),
        "opened catalog"
    );
    Ok(MemoryCatalog::from_tables(reviews, votes, summaries))
}

/// Persist the whole catalog into `dir`, creating it if needed.
///
/// All three tables are staged before any of them is moved into place, so a
/// failed write leaves the previous catalog files untouched.
#[tracing::instrument(level = "info", skip(catalog, dir), fields(dir = %dir.as_ref().display()))]
pub fn save<P: AsRef<Path>>(catalog: &MemoryCatalog, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("creating catalog directory {:?}", dir))?;
    let staged = [
        stage_table(dir, &catalog.reviews())?,
        stage_table(dir, &catalog.votes())?,
        stage_table(dir, &catalog.summaries())?,
    ];
    for table in staged {
        table.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewReview, RatingStore, ReviewPatch, ReviewStore, Vote, PRODUCT_ENTITY};
    use tempfile::tempdir;

    fn seed(catalog: &mut MemoryCatalog, product_id: &str, options: &[&str]) -> ReviewId {
        let id = catalog
            .create(&NewReview {
                entity_code: PRODUCT_ENTITY.into(),
                product_id: product_id.into(),
                status_id: "1".into(),
                customer_id: None,
                title: "Title, with comma".into(),
                nickname: "kim".into(),
                detail: "Detail".into(),
                store_id: "2".into(),
                stores: vec!["2".into()],
                created_at: String::new(),
            })
            .unwrap();
        catalog
            .update(
                id,
                &ReviewPatch {
                    created_at: Some("2011-11-11 11:11:11".into()),
                },
            )
            .unwrap();
        for option_id in options {
            catalog
                .record_vote(&Vote {
                    rating_id: "3".into(),
                    review_id: id,
                    customer_id: Some("77".into()),
                    option_id: option_id.to_string(),
                    product_id: product_id.into(),
                })
                .unwrap();
        }
        catalog.aggregate(id).unwrap();
        id
    }

    #[test]
    fn save_and_reopen_round_trips_catalog() -> Result<()> {
        let tmp = tempdir()?;
        let mut catalog = MemoryCatalog::new();
        seed(&mut catalog, "100", &["11", "12"]);
        seed(&mut catalog, "200", &[]);

        save(&catalog, tmp.path())?;
        let reopened = open(tmp.path())?;

        assert_eq!(reopened.reviews(), catalog.reviews());
        assert_eq!(reopened.votes(), catalog.votes());
        assert_eq!(reopened.summaries(), catalog.summaries());
        assert_eq!(
            reopened.review(ReviewId(1)).unwrap().created_at,
            "2011-11-11 11:11:11"
        );
        Ok(())
    }

    #[test]
    fn reopened_catalog_continues_ids() -> Result<()> {
        let tmp = tempdir()?;
        let mut catalog = MemoryCatalog::new();
        seed(&mut catalog, "1", &["1"]);
        save(&catalog, tmp.path())?;

        let mut reopened = open(tmp.path())?;
        let id = seed(&mut reopened, "2", &["2"]);
        assert_eq!(id, ReviewId(2));
        assert_eq!(reopened.votes().len(), 2);
        Ok(())
    }

    #[test]
    fn missing_directory_opens_empty() -> Result<()> {
        let tmp = tempdir()?;
        let catalog = open(tmp.path().join("not-there"))?;
        assert!(catalog.reviews().is_empty());
        assert!(catalog.summaries().is_empty());
        Ok(())
    }

    #[test]
    fn staged_tables_leave_saved_catalog_alone_until_committed() -> Result<()> {
        let tmp = tempdir()?;
        let mut catalog = MemoryCatalog::new();
        seed(&mut catalog, "1", &["1"]);
        save(&catalog, tmp.path())?;

        seed(&mut catalog, "2", &["2"]);
        let reviews = stage_table(tmp.path(), &catalog.reviews())?;
        let votes = stage_table(tmp.path(), &catalog.votes())?;

        // a save that dies here must not have touched the saved tables
        let before = open(tmp.path())?;
        assert_eq!(before.reviews().len(), 1);
        assert_eq!(before.votes().len(), 1);
        assert!(tmp.path().join("reviews.parquet.tmp").exists());

        reviews.commit()?;
        votes.commit()?;
        let after = open(tmp.path())?;
        assert_eq!(after.reviews().len(), 2);
        assert_eq!(after.votes().len(), 2);
        assert!(!tmp.path().join("votes.parquet.tmp").exists());
        Ok(())
    }

    #[test]
    fn save_leaves_no_temp_files() -> Result<()> {
        let tmp = tempdir()?;
        save(&MemoryCatalog::new(), tmp.path())?;
        let mut names: Vec<_> = fs::read_dir(tmp.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["reviews.parquet", "summaries.parquet", "votes.parquet"]
        );
        Ok(())
    }
}
