//! Folder-backed data source.
//!
//! Generated files are matched to expected files by their path relative to
//! the respective root with the extension stripped: `gen/a/x.py` pairs
//! with `exp/a/x.txt`. A generated file with no expected counterpart
//! yields a pair with `expected_code = None`, which is not an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::content::{ChunkedProcessor, LazyContentLoader};
use crate::error::{ConfigError, DataSourceError};
use crate::models::{CodePair, SourceInfo};
use crate::sources::{
    read_text_with_fallback, sample_items, sanitize_identifier, validate_sample_percentage,
    DataSource, SourceParams,
};

/// Extensions treated as code for discovery purposes.
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb", "go", "rs", "swift",
    "kt", "scala", "r", "m", "pl", "sh", "bash", "ps1", "sql", "html", "css", "xml", "json",
    "yaml", "yml", "toml", "md", "txt",
];

/// Files above this size go through the lazy loader with an explicit size
/// hint recorded in `source_info`.
const LAZY_THRESHOLD_BYTES: u64 = 100 * 1024;

#[derive(Debug, Clone)]
struct FilePair {
    identifier: String,
    generated: PathBuf,
    expected: Option<PathBuf>,
}

/// Data source over generated/expected code folders.
pub struct FilesystemSource {
    generated_dir: Option<PathBuf>,
    expected_dir: Option<PathBuf>,
    file_pairs: Vec<FilePair>,
    chunker: ChunkedProcessor,
}

impl FilesystemSource {
    pub fn new() -> Self {
        Self {
            generated_dir: None,
            expected_dir: None,
            file_pairs: Vec::new(),
            chunker: ChunkedProcessor::new(100),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunker = ChunkedProcessor::new(chunk_size);
        self
    }

    fn ensure_configured(&self) -> Result<(), DataSourceError> {
        if self.generated_dir.is_none() {
            return Err(DataSourceError::NotConfigured);
        }
        Ok(())
    }

    /// Reads one file pair, or `None` (logged) when the generated file
    /// cannot be read. An unreadable expected file degrades to
    /// `expected_code = None` rather than losing the item.
    fn load_pair(&self, file_pair: &FilePair) -> Option<CodePair> {
        let size = std::fs::metadata(&file_pair.generated).map(|m| m.len()).unwrap_or(0);
        let generated_path = file_pair.generated.clone();
        let loader = LazyContentLoader::new(size as usize, move || {
            read_text_with_fallback(&generated_path)
        });
        let generated_code = match loader.get_content(true) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    path = %file_pair.generated.display(),
                    error = %err,
                    "skipping unreadable generated file"
                );
                return None;
            }
        };

        let expected_code = match &file_pair.expected {
            Some(path) => match read_text_with_fallback(path) {
                Ok(content) => Some(content),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "expected file unreadable, continuing with generated only"
                    );
                    None
                }
            },
            None => None,
        };

        let mut source_info = SourceInfo::new();
        source_info.insert("source_type".into(), "filesystem".into());
        source_info.insert(
            "generated_file".into(),
            file_pair.generated.to_string_lossy().into_owned().into(),
        );
        if let Some(path) = &file_pair.expected {
            source_info
                .insert("expected_file".into(), path.to_string_lossy().into_owned().into());
        }
        source_info.insert("generated_bytes".into(), serde_json::json!(size));
        source_info.insert("large_content".into(), serde_json::json!(size > LAZY_THRESHOLD_BYTES));

        Some(CodePair {
            identifier: file_pair.identifier.clone(),
            expected_code,
            generated_code,
            source_info,
        })
    }
}

impl Default for FilesystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for FilesystemSource {
    fn configure(&mut self, params: &SourceParams) -> Result<(), ConfigError> {
        let SourceParams::Filesystem { generated_dir, expected_dir } = params else {
            return Err(ConfigError::WrongParams {
                expected: "filesystem",
                actual: params.kind(),
            });
        };

        validate_dir(generated_dir)?;
        if let Some(dir) = expected_dir {
            validate_dir(dir)?;
        }

        // Everything validated into locals before any field is touched.
        let expected_map = match expected_dir {
            Some(dir) => index_by_match_key(dir)?,
            None => HashMap::new(),
        };

        let mut generated_files = collect_code_files(generated_dir)?;
        generated_files.sort();

        let mut file_pairs = Vec::with_capacity(generated_files.len());
        for generated in generated_files {
            let relative = generated.strip_prefix(generated_dir).unwrap_or(&generated);
            let key = match_key(relative);
            let identifier = sanitize_identifier(&relative.with_extension(""));
            file_pairs.push(FilePair {
                identifier,
                generated,
                expected: expected_map.get(&key).cloned(),
            });
        }
        if file_pairs.is_empty() {
            return Err(ConfigError::NoPairsFound);
        }

        let matched = file_pairs.iter().filter(|p| p.expected.is_some()).count();
        info!(
            pairs = file_pairs.len(),
            with_expected = matched,
            generated_dir = %generated_dir.display(),
            "filesystem source configured"
        );

        self.generated_dir = Some(generated_dir.clone());
        self.expected_dir = expected_dir.clone();
        self.file_pairs = file_pairs;
        Ok(())
    }

    fn get_total_count(&self) -> Result<usize, DataSourceError> {
        self.ensure_configured()?;
        Ok(self.file_pairs.len())
    }

    fn load_data(&mut self, sample_percentage: f64) -> Result<Vec<CodePair>, DataSourceError> {
        self.ensure_configured()?;
        validate_sample_percentage(sample_percentage)?;

        let sampled = sample_items(self.file_pairs.clone(), sample_percentage);
        debug!(total = self.file_pairs.len(), sampled = sampled.len(), "loading file pairs");

        let pairs: Vec<CodePair> = self
            .chunker
            .process(sampled, |file_pair| self.load_pair(&file_pair))
            .collect();
        if pairs.is_empty() {
            return Err(DataSourceError::NoUsableItems);
        }
        info!(loaded = pairs.len(), "filesystem load complete");
        Ok(pairs)
    }
}

fn validate_dir(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::PathNotFound(path.to_owned()));
    }
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path.to_owned()));
    }
    Ok(())
}

fn is_code_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn collect_code_files(root: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_code_file(&path) {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Match key: the path relative to its root, extension stripped,
/// separators normalized.
fn match_key(relative: &Path) -> String {
    relative
        .with_extension("")
        .to_string_lossy()
        .replace('\\', "/")
}

fn index_by_match_key(root: &Path) -> Result<HashMap<String, PathBuf>, ConfigError> {
    let mut map = HashMap::new();
    for path in collect_code_files(root)? {
        let relative = path.strip_prefix(root).unwrap_or(&path).to_owned();
        map.insert(match_key(&relative), path);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn configured(generated: &Path, expected: Option<&Path>) -> FilesystemSource {
        let mut source = FilesystemSource::new();
        source
            .configure(&SourceParams::Filesystem {
                generated_dir: generated.to_owned(),
                expected_dir: expected.map(Path::to_owned),
            })
            .unwrap();
        source
    }

    #[test]
    fn matches_by_relative_path_ignoring_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let gen = dir.path().join("generated");
        let exp = dir.path().join("expected");
        write(&gen.join("a/x.py"), "generated a\n");
        write(&exp.join("a/x.txt"), "expected a\n");
        write(&gen.join("b.py"), "generated b\n");

        let mut source = configured(&gen, Some(&exp));
        let mut pairs = source.load_data(100.0).unwrap();
        pairs.sort_by(|l, r| l.identifier.cmp(&r.identifier));

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].identifier, "a_x");
        assert_eq!(pairs[0].expected_code.as_deref(), Some("expected a\n"));
        assert_eq!(pairs[1].identifier, "b");
        assert_eq!(pairs[1].expected_code, None);
    }

    #[test]
    fn total_count_matches_full_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let gen = dir.path().join("generated");
        for n in 0..4 {
            write(&gen.join(format!("f{n}.py")), "code\n");
        }
        // Non-code files are not discovered.
        write(&gen.join("notes.bin"), "binary\n");

        let mut source = configured(&gen, None);
        assert_eq!(source.get_total_count().unwrap(), 4);
        assert_eq!(source.load_data(100.0).unwrap().len(), 4);
    }

    #[test]
    fn half_sample_of_ten_loads_exactly_five() {
        let dir = tempfile::TempDir::new().unwrap();
        let gen = dir.path().join("generated");
        for n in 0..10 {
            write(&gen.join(format!("f{n}.py")), &format!("code {n}\n"));
        }

        let mut source = configured(&gen, None);
        let pairs = source.load_data(50.0).unwrap();
        assert_eq!(pairs.len(), 5);

        let mut identifiers: Vec<_> = pairs.iter().map(|p| p.identifier.clone()).collect();
        identifiers.sort();
        identifiers.dedup();
        assert_eq!(identifiers.len(), 5, "sampling must not repeat identifiers");
    }

    #[test]
    fn identifiers_are_stable_across_loads() {
        let dir = tempfile::TempDir::new().unwrap();
        let gen = dir.path().join("generated");
        write(&gen.join("nested/deep/item.py"), "code\n");

        let mut source = configured(&gen, None);
        let first = source.load_data(100.0).unwrap();
        let second = source.load_data(100.0).unwrap();
        assert_eq!(first[0].identifier, "nested_deep_item");
        assert_eq!(first[0].identifier, second[0].identifier);
    }

    #[test]
    fn missing_generated_dir_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut source = FilesystemSource::new();
        let err = source
            .configure(&SourceParams::Filesystem {
                generated_dir: dir.path().join("absent"),
                expected_dir: None,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::PathNotFound(_)));
        // Failure must not leave the source half-configured.
        assert!(matches!(source.get_total_count(), Err(DataSourceError::NotConfigured)));
    }

    #[test]
    fn wrong_params_variant_is_rejected() {
        let mut source = FilesystemSource::new();
        let err = source
            .configure(&SourceParams::RelationalTable {
                database: "db.sqlite".into(),
                table: "t".into(),
                identifier_column: "id".into(),
                generated_column: "gen".into(),
                expected_column: None,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::WrongParams { .. }));
    }

    #[test]
    fn non_utf8_file_falls_back_to_latin1() {
        let dir = tempfile::TempDir::new().unwrap();
        let gen = dir.path().join("generated");
        std::fs::create_dir_all(&gen).unwrap();
        std::fs::write(gen.join("l1.py"), [b'x', b' ', b'=', b' ', 0xe9, b'\n']).unwrap();

        let mut source = configured(&gen, None);
        let pairs = source.load_data(100.0).unwrap();
        assert_eq!(pairs[0].generated_code, "x = é\n");
    }
}
