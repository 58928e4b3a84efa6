//! Spreadsheet-backed data source: Excel workbooks and CSV files.
//!
//! Both backends reduce to the same row-yielding contract: a header row
//! naming the columns, then one code pair per data row. Cells are
//! stringified conservatively; a row with an empty identifier or empty
//! generated cell is logged and skipped.

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, DataSourceError};
use crate::models::{CodePair, SourceInfo};
use crate::sources::{sample_items, validate_sample_percentage, DataSource, SourceParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Workbook,
    Csv,
}

#[derive(Debug, Clone)]
struct SheetConfig {
    file: PathBuf,
    format: Format,
    /// Resolved sheet name (workbooks only).
    sheet: Option<String>,
    identifier_index: usize,
    generated_index: usize,
    expected_index: Option<usize>,
    /// Data rows counted at configure time, before any skipping.
    total_rows: usize,
}

/// Data source over one sheet of a workbook or one CSV file.
pub struct SpreadsheetSource {
    config: Option<SheetConfig>,
}

impl SpreadsheetSource {
    pub fn new() -> Self {
        Self { config: None }
    }

    fn sheet_config(&self) -> Result<&SheetConfig, DataSourceError> {
        self.config.as_ref().ok_or(DataSourceError::NotConfigured)
    }

    fn row_to_pair(config: &SheetConfig, cells: &[Option<String>]) -> Option<CodePair> {
        let identifier = cells.get(config.identifier_index).cloned().flatten()?;
        let generated_code = cells.get(config.generated_index).cloned().flatten()?;
        let expected_code = config
            .expected_index
            .and_then(|index| cells.get(index).cloned().flatten());

        let mut source_info = SourceInfo::new();
        source_info.insert("source_type".into(), "spreadsheet".into());
        source_info
            .insert("file".into(), config.file.to_string_lossy().into_owned().into());
        if let Some(sheet) = &config.sheet {
            source_info.insert("sheet".into(), sheet.clone().into());
        }

        Some(CodePair { identifier, expected_code, generated_code, source_info })
    }

    fn load_rows(config: &SheetConfig) -> Result<Vec<Vec<Option<String>>>, DataSourceError> {
        match config.format {
            Format::Workbook => {
                let mut workbook = open_workbook_auto(&config.file)
                    .map_err(|e| DataSourceError::Spreadsheet(e.to_string()))?;
                let sheet = config.sheet.as_deref().unwrap_or_default();
                let range = workbook
                    .worksheet_range(sheet)
                    .map_err(|e| DataSourceError::Spreadsheet(e.to_string()))?;
                Ok(range
                    .rows()
                    .skip(1)
                    .map(|row| row.iter().map(cell_to_string).collect())
                    .collect())
            }
            Format::Csv => {
                let mut reader = csv::Reader::from_path(&config.file)?;
                let mut rows = Vec::new();
                for record in reader.records() {
                    let record = record?;
                    rows.push(
                        record
                            .iter()
                            .map(|cell| {
                                let cell = cell.to_owned();
                                if cell.is_empty() {
                                    None
                                } else {
                                    Some(cell)
                                }
                            })
                            .collect(),
                    );
                }
                Ok(rows)
            }
        }
    }
}

impl Default for SpreadsheetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for SpreadsheetSource {
    fn configure(&mut self, params: &SourceParams) -> Result<(), ConfigError> {
        let SourceParams::Spreadsheet {
            file,
            sheet,
            identifier_column,
            generated_column,
            expected_column,
        } = params
        else {
            return Err(ConfigError::WrongParams {
                expected: "spreadsheet",
                actual: params.kind(),
            });
        };

        if !file.exists() {
            return Err(ConfigError::PathNotFound(file.clone()));
        }
        let format = detect_format(file)?;

        let (resolved_sheet, header, total_rows) = match format {
            Format::Workbook => {
                let mut workbook = open_workbook_auto(file)
                    .map_err(|e| ConfigError::Spreadsheet(e.to_string()))?;
                let names = workbook.sheet_names();
                let resolved = match sheet {
                    Some(name) => {
                        if !names.iter().any(|n| n == name) {
                            return Err(ConfigError::SheetNotFound(name.clone()));
                        }
                        name.clone()
                    }
                    None => names
                        .first()
                        .cloned()
                        .ok_or_else(|| ConfigError::SheetNotFound("<first>".to_owned()))?,
                };
                let range = workbook
                    .worksheet_range(&resolved)
                    .map_err(|e| ConfigError::Spreadsheet(e.to_string()))?;
                let header: Vec<String> = range
                    .rows()
                    .next()
                    .map(|row| {
                        row.iter().map(|cell| cell_to_string(cell).unwrap_or_default()).collect()
                    })
                    .unwrap_or_default();
                let total_rows = range.rows().count().saturating_sub(1);
                (Some(resolved), header, total_rows)
            }
            Format::Csv => {
                let mut reader = csv::Reader::from_path(file)?;
                let header: Vec<String> =
                    reader.headers()?.iter().map(str::to_owned).collect();
                let total_rows = reader.records().filter(Result::is_ok).count();
                (None, header, total_rows)
            }
        };

        let find = |column: &str| -> Result<usize, ConfigError> {
            header
                .iter()
                .position(|name| name.trim() == column)
                .ok_or_else(|| ConfigError::ColumnNotFound {
                    column: column.to_owned(),
                    location: format!("header of {}", file.display()),
                })
        };
        let identifier_index = find(identifier_column)?;
        let generated_index = find(generated_column)?;
        let expected_index = match expected_column {
            Some(column) => Some(find(column)?),
            None => None,
        };

        info!(
            file = %file.display(),
            sheet = resolved_sheet.as_deref().unwrap_or("-"),
            rows = total_rows,
            "spreadsheet source configured"
        );
        self.config = Some(SheetConfig {
            file: file.clone(),
            format,
            sheet: resolved_sheet,
            identifier_index,
            generated_index,
            expected_index,
            total_rows,
        });
        Ok(())
    }

    fn get_total_count(&self) -> Result<usize, DataSourceError> {
        Ok(self.sheet_config()?.total_rows)
    }

    fn load_data(&mut self, sample_percentage: f64) -> Result<Vec<CodePair>, DataSourceError> {
        validate_sample_percentage(sample_percentage)?;
        let config = self.sheet_config()?.clone();

        let rows = Self::load_rows(&config)?;
        let mut pairs = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for (row_number, cells) in rows.iter().enumerate() {
            match Self::row_to_pair(&config, cells) {
                Some(pair) if pair.validate().is_ok() => pairs.push(pair),
                Some(pair) => {
                    skipped += 1;
                    warn!(
                        row = row_number + 2,
                        identifier = %pair.identifier,
                        "skipping row with unusable identifier"
                    );
                }
                None => {
                    skipped += 1;
                    debug!(row = row_number + 2, "skipping row with empty identifier or code");
                }
            }
        }
        if pairs.is_empty() {
            return Err(DataSourceError::NoUsableItems);
        }

        let loaded = sample_items(pairs, sample_percentage);
        info!(loaded = loaded.len(), skipped, file = %config.file.display(), "sheet load complete");
        Ok(loaded)
    }
}

fn detect_format(file: &Path) -> Result<Format, ConfigError> {
    match file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("xlsx") | Some("xls") | Some("xlsm") | Some("xlsb") | Some("ods") => {
            Ok(Format::Workbook)
        }
        Some("csv") => Ok(Format::Csv),
        _ => Err(ConfigError::UnsupportedFormat(file.to_owned())),
    }
}

/// Conservative cell stringification: numbers render the way a reviewer
/// would type them, empty and error cells become `None`.
fn cell_to_string(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(text) => text.clone(),
        Data::Float(x) => {
            if x.fract() == 0.0 && x.abs() < 1e15 {
                format!("{}", *x as i64)
            } else {
                x.to_string()
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(flag) => flag.to_string(),
        Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::Empty | Data::Error(_) | Data::DateTime(_) => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
