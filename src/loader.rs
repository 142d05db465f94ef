//! Local-file ETL: TXT, MD, CSV, JSON.
//!
//! Each loader returns `(text, metadata)` documents ready for chunking.
//! One unreadable file never aborts a folder ingest; failures are logged
//! and skipped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::store::{ChunkMetadata, ContentKind};

/// Extensions `ingest_folder` picks up.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json"];

/// Columns beyond this are left out of the CSV row narrative.
const MAX_CSV_COLS: usize = 20;

/// A loaded document segment, pre-chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Read a text file, stripping a UTF-8 BOM if present. Non-UTF-8 bytes are
/// replaced rather than failing the whole file.
pub fn load_text_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Linearize each CSV row into a searchable narrative sentence:
/// `Row N — col: val; col: val.` Empty cells are omitted, empty rows skipped.
pub fn load_csv_rows(path: &Path) -> Result<Vec<Document>> {
    let content = load_text_file(path)?;
    let mut lines = content.lines();

    let header = match lines.next() {
        Some(line) => split_csv_line(line),
        None => return Ok(Vec::new()),
    };
    let fields: Vec<&String> = header.iter().take(MAX_CSV_COLS).collect();
    let source = path.display().to_string();

    let mut docs = Vec::new();
    for (idx, line) in lines.enumerate() {
        let row_number = idx + 1;
        let values = split_csv_line(line);

        let parts: Vec<String> = fields
            .iter()
            .zip(&values)
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(col, v)| format!("{col}: {}", v.trim()))
            .collect();
        if parts.is_empty() {
            continue;
        }

        docs.push(Document {
            text: format!("Row {row_number} — {}.", parts.join("; ")),
            metadata: ChunkMetadata::new(&source, ContentKind::Tabular).with_row(row_number),
        });
    }
    Ok(docs)
}

/// Minimal RFC 4180 field splitter: handles quoted fields and doubled quotes,
/// which covers the CSV this tool actually sees.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Load a JSON file. A root-level array yields one document per item; nested
/// objects are flattened to `key: value` lines.
pub fn load_json_file(path: &Path) -> Result<Vec<Document>> {
    let content = load_text_file(path)?;
    let data: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    let source = path.display().to_string();

    let mut docs = Vec::new();
    match data {
        serde_json::Value::Array(items) => {
            for (idx, item) in items.into_iter().enumerate() {
                let text = flatten_json_value(&item);
                if !text.trim().is_empty() {
                    docs.push(Document {
                        text,
                        metadata: ChunkMetadata::new(&source, ContentKind::Json)
                            .with_item_index(idx + 1),
                    });
                }
            }
        }
        other => {
            let text = flatten_json_value(&other);
            if !text.trim().is_empty() {
                docs.push(Document {
                    text,
                    metadata: ChunkMetadata::new(&source, ContentKind::Json),
                });
            }
        }
    }
    Ok(docs)
}

fn flatten_json_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => flatten_json_object(map, ""),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Recursively flatten an object into `key: value` lines, joining nested
/// keys with dots.
fn flatten_json_object(map: &serde_json::Map<String, serde_json::Value>, prefix: &str) -> String {
    let mut lines = Vec::new();
    for (key, val) in map {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            serde_json::Value::Object(nested) => {
                lines.push(flatten_json_object(nested, &full_key));
            }
            serde_json::Value::Array(_) => {
                lines.push(format!("{full_key}: {val}"));
            }
            serde_json::Value::String(s) => lines.push(format!("{full_key}: {s}")),
            other => lines.push(format!("{full_key}: {other}")),
        }
    }
    lines.join("\n")
}

/// Load one document by extension. TXT/MD return a single segment tagged
/// page 1; CSV and JSON expand to multiple segments.
pub fn load_document(path: &Path) -> Result<Vec<Document>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => load_csv_rows(path),
        "json" => load_json_file(path),
        _ => {
            let content = load_text_file(path)?;
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            let source = path.display().to_string();
            Ok(vec![Document {
                text: content,
                metadata: ChunkMetadata::new(&source, ContentKind::Text).with_page(1),
            }])
        }
    }
}

/// Recursively collect documents from every supported file under `folder`.
/// Files within a directory are visited in sorted order so ingestion is
/// deterministic. Per-file failures are logged and skipped.
pub fn ingest_folder(folder: &Path) -> Result<Vec<Document>> {
    anyhow::ensure!(
        folder.is_dir(),
        "folder not found: {}",
        folder.display()
    );

    let allowed: BTreeSet<&str> = SUPPORTED_EXTENSIONS.iter().copied().collect();
    let mut documents = Vec::new();
    let mut pending = vec![folder.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !allowed.contains(ext.as_str()) {
                continue;
            }

            match load_document(&path) {
                Ok(mut docs) => documents.append(&mut docs),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file");
                }
            }
        }
    }

    tracing::info!(
        segments = documents.len(),
        folder = %folder.display(),
        "folder ingested"
    );
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn text_file_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, b"\xef\xbb\xbfhello").unwrap();
        assert_eq!(load_text_file(&path).unwrap(), "hello");
    }

    #[test]
    fn text_file_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.txt");
        fs::write(&path, b"caf\xe9").unwrap();
        let content = load_text_file(&path).unwrap();
        assert!(content.starts_with("caf"));
    }

    #[test]
    fn csv_rows_become_narratives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        fs::write(&path, "name,age,city\nAda,36,London\nAlan,41,\n").unwrap();

        let docs = load_csv_rows(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "Row 1 — name: Ada; age: 36; city: London.");
        assert_eq!(docs[1].text, "Row 2 — name: Alan; age: 41.");
        assert_eq!(docs[0].metadata.row, Some(1));
        assert_eq!(docs[0].metadata.kind, Some(ContentKind::Tabular));
    }

    #[test]
    fn csv_quoted_fields_with_commas() {
        assert_eq!(
            split_csv_line(r#"a,"b, c","say ""hi""""#),
            vec!["a", "b, c", r#"say "hi""#]
        );
    }

    #[test]
    fn csv_empty_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.csv");
        fs::write(&path, "a,b\n,\nx,y\n").unwrap();
        let docs = load_csv_rows(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.row, Some(2));
    }

    #[test]
    fn json_array_yields_item_per_element() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        fs::write(
            &path,
            r#"[{"name": "widget", "specs": {"weight": 3}}, "plain string"]"#,
        )
        .unwrap();

        let docs = load_json_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].text.contains("name: widget"));
        assert!(docs[0].text.contains("specs.weight: 3"));
        assert_eq!(docs[0].metadata.item_index, Some(1));
        assert_eq!(docs[1].text, "plain string");
    }

    #[test]
    fn json_object_flattens_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"host": "localhost", "ports": [80, 443]}}"#).unwrap();

        let docs = load_json_file(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("server.host: localhost"));
        assert!(docs[0].text.contains("server.ports: [80,443]"));
    }

    #[test]
    fn folder_ingest_recurses_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha notes").unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("ignored.xml"), "<x/>").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.md"), "# beta notes").unwrap();

        let docs = ingest_folder(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert!(texts.contains(&"alpha notes"));
        assert!(texts.contains(&"# beta notes"));
    }

    #[test]
    fn missing_folder_is_an_error() {
        assert!(ingest_folder(Path::new("/definitely/not/here")).is_err());
    }
}
