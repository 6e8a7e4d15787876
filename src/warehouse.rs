use crate::error::Error;
use crate::transform::{NormalizedRecord, BATCHED_AT, NATURAL_KEY};
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::json::ReaderBuilder;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::error::{DataFusionError, Result as DataFusionResult};
use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::prelude::{DataFrame, ParquetReadOptions, SessionConfig, SessionContext};
use log::info;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Appends `records` to `table`, creating the table if it does not exist.
    ///
    /// The append is all-or-nothing: if any record does not fit the table
    /// schema nothing is written.
    /// # Returns
    /// The number of rows appended, or [`Error::Load`].
    async fn load(
        &self,
        table: &TableSpec,
        records: &[NormalizedRecord],
    ) -> Result<LoadResult, Error>;

    /// Rewrites `table` so that each natural key keeps only its most recently
    /// ingested row. The replace is atomic; on failure the previous contents
    /// are left in place and [`Error::Reconcile`] is returned.
    async fn reconcile(&self, table: &TableSpec) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub rows_written: usize,
}

/// A warehouse table: where it lives, its configured schema and how its
/// duplicates are resolved.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub dataset: String,
    pub name: String,
    pub schema: SchemaRef,
    pub natural_key: Vec<String>,
    pub version_column: String,
}

impl TableSpec {
    pub fn new(dataset: &str, name: &str, schema: SchemaRef) -> Self {
        TableSpec {
            dataset: dataset.to_string(),
            name: name.to_string(),
            schema,
            natural_key: NATURAL_KEY.iter().map(|c| c.to_string()).collect(),
            version_column: BATCHED_AT.to_string(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.dataset, self.name)
    }
}

const ROW_NUM: &str = "row_num";

/// Warehouse backed by one Parquet file per table under
/// `<root>/<dataset>/<table>.parquet`.
///
/// Every mutation writes a complete new file next to the table and renames it
/// over the old one, so readers only ever see a whole table version.
pub struct ParquetWarehouse {
    ctx: SessionContext,
    root: PathBuf,
}

impl ParquetWarehouse {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;

        let config = SessionConfig::new()
            .set_bool("datafusion.execution.parquet.schema_force_view_types", false);

        info!("Opened warehouse at {}", root.display());

        Ok(ParquetWarehouse {
            ctx: SessionContext::new_with_config(config),
            root,
        })
    }

    fn dataset_dir(&self, table: &TableSpec) -> PathBuf {
        self.root.join(&table.dataset)
    }

    fn table_path(&self, table: &TableSpec) -> PathBuf {
        self.dataset_dir(table).join(format!("{}.parquet", table.name))
    }

    fn staging_path(&self, table: &TableSpec) -> PathBuf {
        self.dataset_dir(table)
            .join(format!(".{}.{}.staging.parquet", table.name, uuid::Uuid::new_v4()))
    }

    pub(crate) async fn read_table(&self, table: &TableSpec) -> DataFusionResult<DataFrame> {
        let path = self.table_path(table);
        if !path.exists() {
            return Err(DataFusionError::Execution(format!(
                "table {} does not exist",
                table.qualified_name()
            )));
        }

        self.ctx
            .read_parquet(
                path_str(&path)?,
                ParquetReadOptions::new().schema(&table.schema),
            )
            .await
    }

    async fn append(
        &self,
        table: &TableSpec,
        records: &[NormalizedRecord],
    ) -> DataFusionResult<usize> {
        let batch = records_to_batch(table.schema.clone(), records)?;
        let rows = batch.num_rows();

        fs::create_dir_all(self.dataset_dir(table))?;

        let new_rows = self.ctx.read_batch(batch)?;

        let df = if self.table_path(table).exists() {
            check_stored_schema(&self.table_path(table), &table.schema)?;
            self.read_table(table).await?.union(new_rows)?
        } else {
            info!("Creating table {}", table.qualified_name());
            new_rows
        };

        self.replace_with(df, table).await?;

        Ok(rows)
    }

    async fn deduplicate(&self, table: &TableSpec) -> DataFusionResult<()> {
        let df = self.read_table(table).await?;
        let latest = latest_per_key(df, &table.natural_key, &table.version_column)?;

        self.replace_with(latest, table).await
    }

    async fn replace_with(&self, df: DataFrame, table: &TableSpec) -> DataFusionResult<()> {
        let staging = self.staging_path(table);
        let schema = SchemaRef::new(df.schema().as_arrow().clone());

        let written = df
            .write_parquet(
                path_str(&staging)?,
                DataFrameWriteOptions::new().with_single_file_output(true),
                None,
            )
            .await
            .and_then(|_| {
                // Empty results may not produce a file
                if staging.exists() {
                    Ok(())
                } else {
                    write_empty(&staging, schema)
                }
            });

        if let Err(err) = written {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        fs::rename(&staging, self.table_path(table))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Warehouse for ParquetWarehouse {
    async fn load(
        &self,
        table: &TableSpec,
        records: &[NormalizedRecord],
    ) -> Result<LoadResult, Error> {
        let rows_written = self
            .append(table, records)
            .await
            .map_err(|source| Error::Load {
                table: table.qualified_name(),
                source,
            })?;

        info!("Appended {} rows to {}", rows_written, table.qualified_name());

        Ok(LoadResult { rows_written })
    }

    async fn reconcile(&self, table: &TableSpec) -> Result<(), Error> {
        self.deduplicate(table)
            .await
            .map_err(|source| Error::Reconcile {
                table: table.qualified_name(),
                source,
            })?;

        info!("Reconciled {}", table.qualified_name());

        Ok(())
    }
}

/// Keeps the first row of every `natural_key` partition, ordered by
/// `version_column` descending. Ties on the version are broken by the
/// remaining columns, also descending, in schema order.
pub fn latest_per_key(
    df: DataFrame,
    natural_key: &[String],
    version_column: &str,
) -> DataFusionResult<DataFrame> {
    use datafusion::functions_window::expr_fn::row_number;
    use datafusion::logical_expr::ExprFunctionExt;
    use datafusion::prelude::{ident, lit};

    let columns: Vec<String> = df
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    if !columns.iter().any(|c| c == version_column) {
        return Err(DataFusionError::Plan(format!(
            "version column '{}' not found",
            version_column
        )));
    }

    let mut order_by = vec![ident(version_column).sort(false, false)];
    order_by.extend(
        columns
            .iter()
            .filter(|c| !natural_key.contains(*c) && c.as_str() != version_column)
            .map(|c| ident(c.as_str()).sort(false, false)),
    );

    let row_num = row_number()
        .partition_by(natural_key.iter().map(|c| ident(c.as_str())).collect())
        .order_by(order_by)
        .build()?
        .alias(ROW_NUM);

    df.window(vec![row_num])?
        .filter(ident(ROW_NUM).eq(lit(1u64)))?
        .drop_columns(&[ROW_NUM])
}

/// Decodes records against `schema`. Unknown fields, missing required fields
/// and type mismatches are errors.
fn records_to_batch(
    schema: SchemaRef,
    records: &[NormalizedRecord],
) -> DataFusionResult<RecordBatch> {
    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(records.len().max(1))
        .with_strict_mode(true)
        .build_decoder()?;

    decoder.serialize(records)?;

    Ok(decoder
        .flush()?
        .unwrap_or_else(|| RecordBatch::new_empty(schema)))
}

fn check_stored_schema(path: &Path, expected: &Schema) -> DataFusionResult<()> {
    let stored = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?
        .schema()
        .clone();

    let compatible = stored.fields().len() == expected.fields().len()
        && stored
            .fields()
            .iter()
            .zip(expected.fields().iter())
            .all(|(s, e)| s.name() == e.name() && s.data_type() == e.data_type());

    if !compatible {
        return Err(DataFusionError::Execution(format!(
            "stored schema [{}] does not match configured schema [{}]",
            describe(&stored),
            describe(expected)
        )));
    }

    Ok(())
}

fn describe(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_empty(path: &Path, schema: SchemaRef) -> DataFusionResult<()> {
    let writer = ArrowWriter::try_new(File::create(path)?, schema, None)?;
    writer.close()?;
    Ok(())
}

fn path_str(path: &Path) -> DataFusionResult<&str> {
    path.to_str().ok_or_else(|| {
        DataFusionError::Execution(format!("path {} is not valid UTF-8", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_table_schema;
    use datafusion::common::cast::{as_int64_array, as_string_array};
    use datafusion::prelude::ident;
    use tempfile::TempDir;

    const SCHEMA: &str = include_str!("../configs/CampaignPerformanceReport.json");

    fn table() -> TableSpec {
        let schema = parse_table_schema("CampaignPerformanceReport", SCHEMA).unwrap();
        TableSpec::new("BingAds", "CampaignPerformanceReport", schema)
    }

    fn record(campaign_id: i64, day: &str, impressions: i64, batched_at: &str) -> NormalizedRecord {
        NormalizedRecord {
            account_name: "Acme".to_string(),
            account_id: 180518526,
            time_period: day.to_string(),
            campaign_id,
            campaign_name: format!("Campaign {}", campaign_id),
            impressions,
            clicks: impressions / 10,
            conversions: 1,
            spend: impressions as f64 / 100.0,
            batched_at: batched_at.to_string(),
        }
    }

    /// (CampaignId, TimePeriod, Impressions, _batched_at) sorted by key.
    async fn rows(
        warehouse: &ParquetWarehouse,
        table: &TableSpec,
    ) -> Vec<(i64, String, i64, String)> {
        let batches = warehouse
            .read_table(table)
            .await
            .unwrap()
            .sort(vec![
                ident("CampaignId").sort(true, false),
                ident("TimePeriod").sort(true, false),
            ])
            .unwrap()
            .collect()
            .await
            .unwrap();

        let mut out = Vec::new();
        for batch in batches {
            let campaign = as_int64_array(batch.column_by_name("CampaignId").unwrap()).unwrap();
            let day = as_string_array(batch.column_by_name("TimePeriod").unwrap()).unwrap();
            let impressions = as_int64_array(batch.column_by_name("Impressions").unwrap()).unwrap();
            let batched_at = as_string_array(batch.column_by_name(BATCHED_AT).unwrap()).unwrap();
            for i in 0..batch.num_rows() {
                out.push((
                    campaign.value(i),
                    day.value(i).to_string(),
                    impressions.value(i),
                    batched_at.value(i).to_string(),
                ));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_load_creates_table() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        let result = warehouse
            .load(
                &table,
                &[
                    record(1, "2024-01-01", 100, "2024-01-03T00:00:00"),
                    record(2, "2024-01-01", 200, "2024-01-03T00:00:00"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.rows_written, 2);
        assert!(temp_dir
            .path()
            .join("BingAds/CampaignPerformanceReport.parquet")
            .exists());
        assert_eq!(rows(&warehouse, &table).await.len(), 2);
    }

    #[tokio::test]
    async fn test_load_appends_without_deduplicating() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        warehouse
            .load(&table, &[record(1, "2024-01-01", 100, "2024-01-03T00:00:00")])
            .await
            .unwrap();
        let result = warehouse
            .load(&table, &[record(1, "2024-01-01", 150, "2024-01-04T00:00:00")])
            .await
            .unwrap();

        assert_eq!(result.rows_written, 1);
        assert_eq!(rows(&warehouse, &table).await.len(), 2);
    }

    #[tokio::test]
    async fn test_load_rejects_fields_missing_from_schema() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();
        warehouse
            .load(&table, &[record(1, "2024-01-01", 100, "2024-01-03T00:00:00")])
            .await
            .unwrap();

        // Same table, but the configured schema lacks Spend
        let narrow = parse_table_schema(
            "CampaignPerformanceReport",
            &SCHEMA.replace(r#"{ "name": "Spend", "type": "FLOAT", "mode": "NULLABLE" },"#, ""),
        )
        .unwrap();
        let narrow_table = TableSpec::new("BingAds", "CampaignPerformanceReport", narrow);

        let result = warehouse
            .load(
                &narrow_table,
                &[record(2, "2024-01-01", 100, "2024-01-04T00:00:00")],
            )
            .await;

        assert!(matches!(
            result,
            Err(Error::Load { table, .. }) if table == "BingAds.CampaignPerformanceReport"
        ));
        assert_eq!(rows(&warehouse, &table).await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_rejects_schema_drift() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();
        warehouse
            .load(&table, &[record(1, "2024-01-01", 100, "2024-01-03T00:00:00")])
            .await
            .unwrap();

        let wider = parse_table_schema(
            "CampaignPerformanceReport",
            &SCHEMA.replace(
                r#"{ "name": "_batched_at""#,
                r#"{ "name": "Revenue", "type": "FLOAT" }, { "name": "_batched_at""#,
            ),
        )
        .unwrap();
        let wider_table = TableSpec::new("BingAds", "CampaignPerformanceReport", wider);

        let result = warehouse
            .load(
                &wider_table,
                &[record(2, "2024-01-01", 100, "2024-01-04T00:00:00")],
            )
            .await;

        assert!(matches!(result, Err(Error::Load { .. })));
        assert_eq!(rows(&warehouse, &table).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_latest_version() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        warehouse
            .load(&table, &[record(1, "2024-01-01", 100, "2024-01-03T00:00:01")])
            .await
            .unwrap();
        warehouse
            .load(&table, &[record(1, "2024-01-01", 999, "2024-01-03T00:00:02")])
            .await
            .unwrap();

        warehouse.reconcile(&table).await.unwrap();

        assert_eq!(
            rows(&warehouse, &table).await,
            vec![(1, "2024-01-01".to_string(), 999, "2024-01-03T00:00:02".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        warehouse
            .load(
                &table,
                &[
                    record(1, "2024-01-01", 100, "2024-01-03T00:00:00"),
                    record(2, "2024-01-01", 100, "2024-01-03T00:00:00"),
                ],
            )
            .await
            .unwrap();
        warehouse
            .load(&table, &[record(1, "2024-01-01", 300, "2024-01-05T00:00:00")])
            .await
            .unwrap();

        warehouse.reconcile(&table).await.unwrap();
        let once = rows(&warehouse, &table).await;
        warehouse.reconcile(&table).await.unwrap();
        let twice = rows(&warehouse, &table).await;

        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_append_then_reconcile_counts_distinct_keys() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        let existing: Vec<_> = (1..=4)
            .map(|id| record(id, "2024-01-01", 100, "2024-01-02T00:00:00"))
            .collect();
        warehouse.load(&table, &existing).await.unwrap();
        warehouse.reconcile(&table).await.unwrap();

        // Overlaps campaigns 3 and 4, adds 5 and a new day for 1
        let incoming = vec![
            record(3, "2024-01-01", 300, "2024-01-03T00:00:00"),
            record(4, "2024-01-01", 400, "2024-01-03T00:00:00"),
            record(5, "2024-01-01", 500, "2024-01-03T00:00:00"),
            record(1, "2024-01-02", 100, "2024-01-03T00:00:00"),
        ];
        warehouse.load(&table, &incoming).await.unwrap();
        assert_eq!(rows(&warehouse, &table).await.len(), 8);

        warehouse.reconcile(&table).await.unwrap();
        let reconciled = rows(&warehouse, &table).await;

        assert_eq!(reconciled.len(), 6);
        let campaign_3 = reconciled.iter().find(|r| r.0 == 3).unwrap();
        assert_eq!(campaign_3.2, 300);
        let campaign_2 = reconciled.iter().find(|r| r.0 == 2).unwrap();
        assert_eq!(campaign_2.3, "2024-01-02T00:00:00");
    }

    #[tokio::test]
    async fn test_reconcile_breaks_timestamp_ties_deterministically() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        warehouse
            .load(
                &table,
                &[
                    record(1, "2024-01-01", 100, "2024-01-03T00:00:00"),
                    record(1, "2024-01-01", 500, "2024-01-03T00:00:00"),
                    record(1, "2024-01-01", 200, "2024-01-03T00:00:00"),
                ],
            )
            .await
            .unwrap();

        warehouse.reconcile(&table).await.unwrap();

        let reconciled = rows(&warehouse, &table).await;
        assert_eq!(reconciled.len(), 1);
        assert_eq!(reconciled[0].2, 500);
    }

    #[tokio::test]
    async fn test_latest_per_key_resolves_mixed_case_columns() {
        use datafusion::arrow::array::{Int64Array, StringArray};
        use datafusion::arrow::datatypes::{DataType, Field};
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![
            Field::new("CampaignId", DataType::Int64, false),
            Field::new("Clicks", DataType::Int64, false),
            Field::new(BATCHED_AT, DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![7, 7, 8])),
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![
                    "2024-01-03T00:00:00",
                    "2024-01-04T00:00:00",
                    "2024-01-03T00:00:00",
                ])),
            ],
        )
        .unwrap();
        let df = SessionContext::new().read_batch(batch).unwrap();

        let batches = latest_per_key(df, &["CampaignId".to_string()], BATCHED_AT)
            .unwrap()
            .sort(vec![ident("CampaignId").sort(true, false)])
            .unwrap()
            .collect()
            .await
            .unwrap();

        let batch = &batches[0];
        assert_eq!(batch.schema().field(0).name(), "CampaignId");
        assert_eq!(batch.num_rows(), 2);
        let clicks = as_int64_array(batch.column_by_name("Clicks").unwrap()).unwrap();
        assert_eq!(clicks.values().to_vec(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_reconcile_missing_table() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();

        let result = warehouse.reconcile(&table()).await;

        assert!(matches!(
            result,
            Err(Error::Reconcile { table, .. }) if table == "BingAds.CampaignPerformanceReport"
        ));
    }

    #[tokio::test]
    async fn test_load_empty_creates_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let warehouse = ParquetWarehouse::open(temp_dir.path()).unwrap();
        let table = table();

        let result = warehouse.load(&table, &[]).await.unwrap();

        assert_eq!(result.rows_written, 0);
        assert!(rows(&warehouse, &table).await.is_empty());
    }

    #[test]
    fn test_records_to_batch_rejects_type_mismatch() {
        let schema = parse_table_schema(
            "CampaignPerformanceReport",
            &SCHEMA.replace(
                r#""name": "Spend", "type": "FLOAT""#,
                r#""name": "Spend", "type": "BOOLEAN""#,
            ),
        )
        .unwrap();

        let result = records_to_batch(
            schema,
            &[record(1, "2024-01-01", 100, "2024-01-03T00:00:00")],
        );

        assert!(result.is_err());
    }
}
