//! Merchant CSV Import
//!
//! Bulk creation of merchants from a CSV upload, with optional background
//! geocoding of every imported address.
//!
//! Header cells are matched against a column dictionary (machine key or
//! display label, case-insensitive). Rows are validated independently: a bad
//! row is reported and skipped, it never aborts the import.

use crate::application::geocode_dispatcher::GeocodeDispatcher;
use crate::application::geocode_service::GeocodeJob;
use crate::application::merchant_service::MerchantService;
use crate::domain::entities::{Merchant, MerchantDraft, Principal};
use crate::domain::errors::DomainError;
use crate::domain::ports::MerchantTagRepository;
use crate::domain::value_objects::{
    MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE,
};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Source tag of points created by import geocoding.
pub const CSV_IMPORT_SOURCE: &str = "csv_import";

const SAMPLE_ROW: [&str; 9] = [
    "示例商户",
    "北京市朝阳区建国门外大街1号",
    "010-12345678",
    "北京",
    "朝阳区",
    "这是一个示例商户",
    "餐饮,服务",
    "116.397128",
    "39.916527",
];

/// Importable merchant columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportColumn {
    Title,
    Address,
    Phone,
    City,
    Area,
    Description,
    Tags,
    Lng,
    Lat,
}

impl ImportColumn {
    /// Template column order.
    pub const ALL: [ImportColumn; 9] = [
        Self::Title,
        Self::Address,
        Self::Phone,
        Self::City,
        Self::Area,
        Self::Description,
        Self::Tags,
        Self::Lng,
        Self::Lat,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Address => "address",
            Self::Phone => "phone",
            Self::City => "city",
            Self::Area => "area",
            Self::Description => "description",
            Self::Tags => "tags",
            Self::Lng => "lng",
            Self::Lat => "lat",
        }
    }

    pub fn default_label(self) -> &'static str {
        match self {
            Self::Title => "商户名称",
            Self::Address => "地址",
            Self::Phone => "电话",
            Self::City => "城市",
            Self::Area => "区域",
            Self::Description => "描述",
            Self::Tags => "标签",
            Self::Lng => "经度",
            Self::Lat => "纬度",
        }
    }
}

/// Display labels accepted as header cells, next to the machine keys.
#[derive(Debug, Clone)]
pub struct ColumnDictionary {
    labels: HashMap<ImportColumn, String>,
}

impl Default for ColumnDictionary {
    fn default() -> Self {
        Self {
            labels: ImportColumn::ALL
                .iter()
                .map(|c| (*c, c.default_label().to_string()))
                .collect(),
        }
    }
}

impl ColumnDictionary {
    pub fn with_label(mut self, column: ImportColumn, label: impl Into<String>) -> Self {
        self.labels.insert(column, label.into());
        self
    }

    pub fn label(&self, column: ImportColumn) -> &str {
        self.labels
            .get(&column)
            .map(String::as_str)
            .unwrap_or_else(|| column.default_label())
    }

    /// Column named by a header cell, if any.
    pub fn resolve(&self, header: &str) -> Option<ImportColumn> {
        let header = header.trim().to_lowercase();
        ImportColumn::ALL
            .iter()
            .copied()
            .find(|c| header == c.key() || header == self.label(*c).to_lowercase())
    }
}

/// A rejected cell or row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvImportError {
    /// 1-based line number, header included
    pub row: usize,
    pub column: String,
    pub message: String,
    pub value: String,
}

impl CsvImportError {
    fn new(row: usize, column: &str, message: impl Into<String>, value: &str) -> Self {
        Self {
            row,
            column: column.to_string(),
            message: message.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub import_id: Uuid,
    pub total_processed: usize,
    pub successful_imports: usize,
    pub failed_imports: usize,
    pub geocoding_enabled: bool,
    pub import_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub imported_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CsvImportResult {
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<CsvImportError>,
    pub imported_items: Vec<Merchant>,
    pub summary: ImportSummary,
}

struct ParsedRow {
    draft: MerchantDraft,
    tag_names: Vec<String>,
    errors: Vec<CsvImportError>,
}

pub struct MerchantCsvImporter {
    merchants: Arc<MerchantService>,
    tags: Arc<dyn MerchantTagRepository>,
    dispatcher: Option<GeocodeDispatcher>,
    columns: ColumnDictionary,
}

impl MerchantCsvImporter {
    pub fn new(merchants: Arc<MerchantService>, tags: Arc<dyn MerchantTagRepository>) -> Self {
        Self {
            merchants,
            tags,
            dispatcher: None,
            columns: ColumnDictionary::default(),
        }
    }

    /// Enable background geocoding of imported addresses.
    pub fn with_dispatcher(mut self, dispatcher: GeocodeDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_columns(mut self, columns: ColumnDictionary) -> Self {
        self.columns = columns;
        self
    }

    /// Import merchants owned by `principal` from CSV text.
    ///
    /// Fails as a whole only on unreadable CSV, a missing data row or a
    /// missing title column. Row problems end up in the result.
    pub async fn import<R: io::Read>(
        &self,
        principal: &Principal,
        input: R,
        auto_geocode: bool,
    ) -> Result<CsvImportResult, DomainError> {
        let started = Instant::now();
        let records = read_records(input)?;
        if records.len() < 2 {
            return Err(DomainError::validation(
                "CSV file must contain at least a header row and one data row",
            ));
        }
        let columns = self.map_columns(&records[0])?;

        let geocoding_enabled = auto_geocode && self.dispatcher.is_some();
        if auto_geocode && !geocoding_enabled {
            tracing::warn!("auto geocoding requested but no geocoder is configured");
        }

        let total_rows = records.len() - 1;
        let mut errors = Vec::new();
        let mut imported = Vec::new();
        let mut error_count = 0;

        for (index, record) in records[1..].iter().enumerate() {
            let row = index + 2;
            let ParsedRow {
                mut draft,
                tag_names,
                errors: row_errors,
            } = self.parse_row(record, &columns, row);

            if !row_errors.is_empty() {
                tracing::debug!("skipping CSV row {}: {} invalid cells", row, row_errors.len());
                errors.extend(row_errors);
                error_count += 1;
                continue;
            }

            if !tag_names.is_empty() {
                match self.tags.find_tags_by_names(principal.id, &tag_names).await {
                    Ok(tags) => draft.tag_ids = tags.into_iter().map(|t| t.id).collect(),
                    Err(e) => {
                        tracing::warn!("tag lookup failed for CSV row {}: {}", row, e);
                        errors.push(CsvImportError::new(
                            row,
                            "tags",
                            format!("Failed to resolve tags: {}", e),
                            &tag_names.join(","),
                        ));
                        error_count += 1;
                        continue;
                    }
                }
            }

            let title = draft.fields.title.clone();
            match self.merchants.create(principal, draft).await {
                Ok(merchant) => {
                    if geocoding_enabled && !merchant.address.trim().is_empty() {
                        self.submit_geocode(&merchant);
                    }
                    tracing::debug!("imported merchant: {} (ID: {})", merchant.title, merchant.id);
                    imported.push(merchant);
                }
                Err(e) => {
                    tracing::warn!("failed to save CSV row {}: {}", row, e);
                    errors.push(CsvImportError::new(
                        row,
                        "general",
                        format!("Failed to save merchant: {}", e),
                        &title,
                    ));
                    error_count += 1;
                }
            }
        }

        let success_count = imported.len();
        tracing::info!(
            "CSV import completed: {} successful, {} failed out of {} total rows",
            success_count,
            error_count,
            total_rows
        );

        Ok(CsvImportResult {
            total_rows,
            success_count,
            error_count,
            errors,
            imported_items: imported,
            summary: ImportSummary {
                import_id: Uuid::new_v4(),
                total_processed: total_rows,
                successful_imports: success_count,
                failed_imports: error_count,
                geocoding_enabled,
                import_time: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
                imported_by: principal.username.clone(),
            },
        })
    }

    /// A CSV with the display-label header and one sample row.
    pub fn generate_template(&self) -> Result<String, DomainError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(ImportColumn::ALL.iter().map(|c| self.columns.label(*c)))?;
        writer.write_record(SAMPLE_ROW)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Header position of each recognised column. The first match wins.
    fn map_columns(&self, header: &StringRecord) -> Result<Vec<(usize, ImportColumn)>, DomainError> {
        let mut columns: Vec<(usize, ImportColumn)> = Vec::new();
        for (index, cell) in header.iter().enumerate() {
            let cell = if index == 0 {
                cell.trim_start_matches('\u{feff}')
            } else {
                cell
            };
            if let Some(column) = self.columns.resolve(cell) {
                if columns.iter().all(|(_, c)| *c != column) {
                    columns.push((index, column));
                }
            }
        }

        if columns.iter().all(|(_, c)| *c != ImportColumn::Title) {
            return Err(DomainError::validation(format!(
                "invalid headers: required column '{}' ({}) not found",
                ImportColumn::Title.key(),
                self.columns.label(ImportColumn::Title)
            )));
        }
        Ok(columns)
    }

    fn parse_row(
        &self,
        record: &StringRecord,
        columns: &[(usize, ImportColumn)],
        row: usize,
    ) -> ParsedRow {
        let mut draft = MerchantDraft::default();
        let mut tag_names = Vec::new();
        let mut errors = Vec::new();

        for (index, column) in columns {
            let value = match record.get(*index) {
                Some(v) if !v.trim().is_empty() => v.trim(),
                _ => continue,
            };

            let fields = &mut draft.fields;
            match column {
                ImportColumn::Title => fields.title = value.to_string(),
                ImportColumn::Address => fields.address = value.to_string(),
                ImportColumn::Phone => fields.phone = value.to_string(),
                ImportColumn::City => fields.city = value.to_string(),
                ImportColumn::Area => fields.area = value.to_string(),
                ImportColumn::Description => fields.description = value.to_string(),
                ImportColumn::Tags => {
                    tag_names = value
                        .split([',', '，'])
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                ImportColumn::Lng => match value.parse::<f64>() {
                    Ok(lng) if (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lng) => {
                        fields.lng = Some(lng)
                    }
                    Ok(_) => errors.push(CsvImportError::new(
                        row,
                        "lng",
                        "Longitude must be between -180 and 180",
                        value,
                    )),
                    Err(_) => errors.push(CsvImportError::new(
                        row,
                        "lng",
                        "Invalid longitude format",
                        value,
                    )),
                },
                ImportColumn::Lat => match value.parse::<f64>() {
                    Ok(lat) if (MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) => {
                        fields.lat = Some(lat)
                    }
                    Ok(_) => errors.push(CsvImportError::new(
                        row,
                        "lat",
                        "Latitude must be between -90 and 90",
                        value,
                    )),
                    Err(_) => errors.push(CsvImportError::new(
                        row,
                        "lat",
                        "Invalid latitude format",
                        value,
                    )),
                },
            }
        }

        if draft.fields.title.is_empty() {
            errors.push(CsvImportError::new(
                row,
                "title",
                "Merchant title is required",
                "",
            ));
        }

        ParsedRow {
            draft,
            tag_names,
            errors,
        }
    }

    fn submit_geocode(&self, merchant: &Merchant) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };

        let mut metadata = Map::new();
        metadata.insert("merchant_id".to_string(), Value::from(merchant.id));
        metadata.insert("import_type".to_string(), Value::from("csv"));

        dispatcher.submit(GeocodeJob {
            merchant_id: Some(merchant.id),
            address: merchant.address.clone(),
            source: CSV_IMPORT_SOURCE.to_string(),
            metadata: Some(metadata),
        });
    }
}

/// Every record of the input, header included. Rows may differ in length.
fn read_records<R: io::Read>(input: R) -> Result<Vec<StringRecord>, DomainError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapStore;
    use crate::application::geocode_service::GeocodeService;
    use crate::application::test_support::{FakeProvider, RecordingPublisher};
    use crate::application::Repositories;
    use crate::domain::entities::{MerchantTag, MerchantTagDraft, MerchantTagRelation};
    use crate::domain::ports::{GeoPointRepository, TagFilter};
    use crate::application::MerchantTagService;
    use std::time::Duration;

    struct Fixture {
        importer: MerchantCsvImporter,
        store: Arc<DashMapStore>,
        dispatcher: GeocodeDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(DashMapStore::new());
        let events = Arc::new(RecordingPublisher::default());
        let geocoder = Arc::new(GeocodeService::new(
            vec![Arc::new(FakeProvider::resolving("nominatim", 116.4, 39.9))],
            store.clone(),
        ));
        let dispatcher = GeocodeDispatcher::new(geocoder, 2);
        let merchants = Arc::new(MerchantService::new(
            Repositories::from_store(store.clone()),
            events,
        ));
        let importer =
            MerchantCsvImporter::new(merchants, store.clone()).with_dispatcher(dispatcher.clone());
        Fixture {
            importer,
            store,
            dispatcher,
        }
    }

    fn alice() -> Principal {
        Principal::new(1, "alice")
    }

    // ===== Column Tests =====

    #[test]
    fn test_resolve_key_or_label() {
        let dict = ColumnDictionary::default();
        assert_eq!(dict.resolve("title"), Some(ImportColumn::Title));
        assert_eq!(dict.resolve("  TITLE "), Some(ImportColumn::Title));
        assert_eq!(dict.resolve("商户名称"), Some(ImportColumn::Title));
        assert_eq!(dict.resolve("纬度"), Some(ImportColumn::Lat));
        assert_eq!(dict.resolve("unknown"), None);
    }

    #[test]
    fn test_custom_labels() {
        let dict = ColumnDictionary::default().with_label(ImportColumn::Title, "Name");
        assert_eq!(dict.resolve("name"), Some(ImportColumn::Title));
        assert_eq!(dict.resolve("商户名称"), None);
        assert_eq!(dict.resolve("title"), Some(ImportColumn::Title));
    }

    // ===== Import Tests =====

    #[tokio::test]
    async fn test_import_mixed_rows() {
        let f = fixture();
        let csv = "title,address,lng,lat\n\
                   Shop A,Addr 1,116.4,39.9\n\
                   ,Addr 2,,\n\
                   Shop C,Addr 3,200,30\n";

        let result = f.importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        assert_eq!(result.total_rows, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 2);
        assert_eq!(
            result.errors,
            vec![
                CsvImportError::new(3, "title", "Merchant title is required", ""),
                CsvImportError::new(4, "lng", "Longitude must be between -180 and 180", "200"),
            ]
        );
        assert_eq!(result.imported_items[0].title, "Shop A");
        assert_eq!(result.imported_items[0].lng, Some(116.4));
        assert_eq!(result.summary.imported_by, "alice");
        assert!(!result.summary.geocoding_enabled);
    }

    #[tokio::test]
    async fn test_import_chinese_headers_and_invalid_formats() {
        let f = fixture();
        let csv = "商户名称,经度,纬度\n店铺,abc,95\n";

        let result = f.importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].message, "Invalid longitude format");
        assert_eq!(result.errors[0].row, 2);
        assert_eq!(result.errors[1].message, "Latitude must be between -90 and 90");
    }

    #[tokio::test]
    async fn test_import_requires_title_column() {
        let f = fixture();
        let err = f
            .importer
            .import(&alice(), "address,phone\nA,1\n".as_bytes(), false)
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("required column 'title' (商户名称) not found"));
    }

    #[tokio::test]
    async fn test_import_requires_data_row() {
        let f = fixture();
        for input in ["", "title,address\n"] {
            let err = f
                .importer
                .import(&alice(), input.as_bytes(), false)
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "CSV file must contain at least a header row and one data row"
            );
        }
    }

    #[tokio::test]
    async fn test_import_tolerates_short_rows() {
        let f = fixture();
        let csv = "title,address,phone,city\nOnly Title\nFull,Addr,123,Beijing\n";

        let result = f.importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(result.imported_items[1].city, "Beijing");
    }

    #[tokio::test]
    async fn test_import_create_failure_is_general_error() {
        let f = fixture();
        let long_title = "x".repeat(101);
        let csv = format!("title\n{}\n", long_title);

        let result = f.importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors[0].column, "general");
        assert!(result.errors[0].message.starts_with("Failed to save merchant:"));
        assert_eq!(result.errors[0].value, long_title);
    }

    #[tokio::test]
    async fn test_import_resolves_tag_names() {
        let f = fixture();
        let tags = MerchantTagService::new(f.store.clone(), Arc::new(RecordingPublisher::default()));
        let food = tags.create(&alice(), MerchantTagDraft::new("Food")).await.unwrap();
        let csv = "title,tags\nShop,\"food，unknown\"\n";

        let result = f.importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        let merchant = &result.imported_items[0];
        assert_eq!(merchant.tags.len(), 1);
        assert_eq!(merchant.tags[0].id, food.id);
    }

    #[tokio::test]
    async fn test_import_auto_geocode_links_points() {
        let f = fixture();
        let csv = "title,address\nShop A,Addr 1\nShop B,\n";

        let result = f.importer.import(&alice(), csv.as_bytes(), true).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), f.dispatcher.wait_idle())
            .await
            .unwrap();

        assert!(result.summary.geocoding_enabled);
        let point = f
            .store
            .find_by_address_and_source("Addr 1", CSV_IMPORT_SOURCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(point.merchant_id, Some(result.imported_items[0].id));
        let meta = point.metadata_map().unwrap();
        assert_eq!(meta["import_type"], "csv");
        assert_eq!(meta["merchant_id"], result.imported_items[0].id);
    }

    #[tokio::test]
    async fn test_import_invalid_utf8_fails() {
        let f = fixture();
        let err = f
            .importer
            .import(&alice(), &b"title\n\xff\xfe\n"[..], false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Csv(_)));
    }

    /// Tag store whose name lookup fails for names containing "boom".
    struct FlakyTags(Arc<DashMapStore>);

    #[async_trait::async_trait]
    impl MerchantTagRepository for FlakyTags {
        async fn insert_tag(&self, tag: MerchantTag) -> anyhow::Result<MerchantTag> {
            self.0.insert_tag(tag).await
        }

        async fn get_tag(&self, id: i64) -> anyhow::Result<Option<MerchantTag>> {
            self.0.get_tag(id).await
        }

        async fn update_tag(&self, tag: &MerchantTag) -> anyhow::Result<bool> {
            self.0.update_tag(tag).await
        }

        async fn delete_tag(&self, id: i64) -> anyhow::Result<bool> {
            self.0.delete_tag(id).await
        }

        async fn find_tags(&self, filter: &TagFilter) -> anyhow::Result<(Vec<MerchantTag>, u64)> {
            self.0.find_tags(filter).await
        }

        async fn find_tags_by_names(
            &self,
            owner_id: i64,
            names: &[String],
        ) -> anyhow::Result<Vec<MerchantTag>> {
            if names.iter().any(|n| n.contains("boom")) {
                anyhow::bail!("tag store unavailable");
            }
            self.0.find_tags_by_names(owner_id, names).await
        }

        async fn add_relation(&self, relation: MerchantTagRelation) -> anyhow::Result<()> {
            self.0.add_relation(relation).await
        }

        async fn relations_for_merchants(
            &self,
            merchant_ids: &[i64],
        ) -> anyhow::Result<Vec<MerchantTagRelation>> {
            self.0.relations_for_merchants(merchant_ids).await
        }

        async fn delete_relations_for_merchant(&self, merchant_id: i64) -> anyhow::Result<usize> {
            self.0.delete_relations_for_merchant(merchant_id).await
        }

        async fn delete_relations_for_tag(&self, tag_id: i64) -> anyhow::Result<usize> {
            self.0.delete_relations_for_tag(tag_id).await
        }
    }

    #[tokio::test]
    async fn test_tag_lookup_failure_only_rejects_its_row() {
        let store = Arc::new(DashMapStore::new());
        let merchants = Arc::new(MerchantService::new(
            Repositories::from_store(store.clone()),
            Arc::new(RecordingPublisher::default()),
        ));
        let importer = MerchantCsvImporter::new(merchants, Arc::new(FlakyTags(store.clone())));

        let csv = "title,tags\n\
                   Shop A,food\n\
                   Shop B,boom\n\
                   Shop C,\n";
        let result = importer.import(&alice(), csv.as_bytes(), false).await.unwrap();

        assert_eq!(result.total_rows, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row, 3);
        assert_eq!(result.errors[0].column, "tags");
        assert_eq!(result.errors[0].value, "boom");

        let titles: Vec<&str> = result.imported_items.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Shop A", "Shop C"]);
    }

    // ===== Template Tests =====

    #[test]
    fn test_template() {
        let f = fixture();
        let template = f.importer.generate_template().unwrap();
        let mut lines = template.lines();

        assert_eq!(
            lines.next(),
            Some("商户名称,地址,电话,城市,区域,描述,标签,经度,纬度")
        );
        let sample = lines.next().unwrap();
        assert!(sample.starts_with("示例商户,"));
        assert!(sample.contains("\"餐饮,服务\""));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_template_reimports() {
        let f = fixture();
        let template = f.importer.generate_template().unwrap();

        let result = f
            .importer
            .import(&alice(), template.as_bytes(), false)
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.imported_items[0].title, "示例商户");
        assert_eq!(result.imported_items[0].lat, Some(39.916527));
    }
}
