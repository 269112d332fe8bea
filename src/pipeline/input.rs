//! Input validation: prove the local file is a well-formed document before
//! any remote resource or concurrency slot is spent on it.
//!
//! ## Why a structural check?
//!
//! Extensions and MIME types are whatever the uploader claimed. Sending a
//! renamed JPEG to the provider costs a job slot, a remote job and ~30s of
//! polling before it fails. Parsing the container locally rejects those
//! inputs immediately:
//!
//! | Format | Checks |
//! |--------|--------|
//! | PDF    | `%PDF-x.y` header in the first 1 KiB, then a full parse: cross-reference table, catalog, at least one page |
//! | DOCX   | ZIP central directory parses and lists `[Content_Types].xml` and `word/document.xml` |
//! | ODT    | ZIP central directory parses and its `mimetype` entry is OpenDocument text |
//! | TXT    | non-empty, valid UTF-8 |

use crate::error::ConvertError;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use zip::ZipArchive;

/// Document formats the orchestrator knows how to validate and request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Odt,
    Txt,
}

impl DocumentFormat {
    /// File extension, also the provider's format identifier.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Txt => "txt",
        }
    }

    /// Infer the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            "odt" => Ok(DocumentFormat::Odt),
            "txt" | "text" => Ok(DocumentFormat::Txt),
            other => Err(ConvertError::InvalidConfig(format!(
                "unsupported document format '{other}' (expected pdf, docx, odt or txt)"
            ))),
        }
    }
}

/// A validated input: the path it came from and its bytes, read once.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub bytes: Bytes,
}

static PDF_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%PDF-[12]\.[0-9]").expect("static regex"));

const PDF_HEADER_WINDOW: usize = 1024;
const DOCX_REQUIRED_ENTRIES: &[&str] = &["[Content_Types].xml", "word/document.xml"];
const ODT_MIMETYPE: &str = "application/vnd.oasis.opendocument.text";

/// Read `path` and check it structurally as `format`.
pub async fn load_and_validate(
    path: &Path,
    format: DocumentFormat,
) -> Result<ValidatedInput, ConvertError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => Bytes::from(b),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(ConvertError::InvalidInput {
                path: path.to_path_buf(),
                format: format.to_string(),
                reason: format!("cannot read file: {e}"),
            })
        }
    };

    validate_bytes(&bytes, format).map_err(|reason| ConvertError::InvalidInput {
        path: path.to_path_buf(),
        format: format.to_string(),
        reason,
    })?;

    debug!("Validated {} input: {} ({} bytes)", format, path.display(), bytes.len());
    Ok(ValidatedInput {
        path: path.to_path_buf(),
        format,
        bytes,
    })
}

/// Structural check of an in-memory document. Returns the reason on failure.
pub fn validate_bytes(bytes: &[u8], format: DocumentFormat) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("file is empty".to_string());
    }
    match format {
        DocumentFormat::Pdf => validate_pdf(bytes),
        DocumentFormat::Docx => {
            let archive = open_zip(bytes)?;
            for entry in DOCX_REQUIRED_ENTRIES {
                if !archive.file_names().any(|name| name == *entry) {
                    return Err(format!("ZIP container has no {entry} entry; not a Word document"));
                }
            }
            Ok(())
        }
        DocumentFormat::Odt => {
            let mut archive = open_zip(bytes)?;
            let mut mimetype = String::new();
            archive
                .by_name("mimetype")
                .map_err(|_| "missing OpenDocument mimetype entry".to_string())?
                .read_to_string(&mut mimetype)
                .map_err(|e| format!("unreadable mimetype entry: {e}"))?;
            if mimetype.trim() != ODT_MIMETYPE {
                return Err(format!("mimetype is '{}', not an OpenDocument text", mimetype.trim()));
            }
            Ok(())
        }
        DocumentFormat::Txt => std::str::from_utf8(bytes)
            .map(|_| ())
            .map_err(|e| format!("not valid UTF-8 text: {e}")),
    }
}

fn validate_pdf(bytes: &[u8]) -> Result<(), String> {
    if !PDF_HEADER.is_match(&bytes[..bytes.len().min(PDF_HEADER_WINDOW)]) {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(format!("no %PDF header (first bytes: {magic:?})"));
    }
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("malformed PDF: {e}"))?;
    doc.catalog()
        .map_err(|e| format!("PDF has no document catalog: {e}"))?;
    if doc.get_pages().is_empty() {
        return Err("PDF has no pages".to_string());
    }
    Ok(())
}

/// Parse the central directory; local headers alone are not enough.
fn open_zip(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a readable ZIP container: {e}"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Document, Object};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// A one-page PDF written by lopdf.
    pub fn minimal_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// A ZIP archive with the given entries, `mimetype` first and stored.
    pub fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            let method = if *name == "mimetype" {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            zip.start_file(*name, SimpleFileOptions::default().compression_method(method))
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn minimal_docx() -> Vec<u8> {
        zip_with(&[
            ("[Content_Types].xml", "<Types/>"),
            ("word/document.xml", "<w:document/>"),
        ])
    }

    pub fn minimal_odt() -> Vec<u8> {
        zip_with(&[
            ("mimetype", "application/vnd.oasis.opendocument.text"),
            ("content.xml", "<office:document-content/>"),
        ])
    }
}
