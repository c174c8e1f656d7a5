//! Local document ingestion: a directory drop of `.docx` and `.txt` files.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::FileSource;
use crate::models::PageRecord;

/// Decompressed size cap for `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Walk the source root and produce one record per matching document.
/// Records are ordered by relative path so positional IDs are stable
/// across runs over the same tree.
pub fn harvest(source: &FileSource) -> Result<Vec<PageRecord>> {
    if !source.root.exists() {
        bail!("Source root does not exist: {}", source.root.display());
    }

    let include_set = build_globset(&source.include_globs)?;

    // Word drops litter lock files (~$foo.docx); never ingest those
    let mut excludes = vec!["**/~$*".to_string()];
    excludes.extend(source.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(&source.root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let relative = path
            .strip_prefix(&source.root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }
        paths.push((relative, path));
    }

    paths.sort_by(|a, b| a.0.cmp(&b.0));

    let mut records = Vec::new();
    for (relative, path) in &paths {
        let body = match read_document(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Warning: skipping {}: {}", relative, e);
                continue;
            }
        };

        let title = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.clone());

        records.push(PageRecord {
            id: String::new(),
            title,
            url: format!("file://{}", path.display()),
            section_label: None,
            hierarchy: Vec::new(),
            hierarchy_urls: Vec::new(),
            linked_pages: Vec::new(),
            body,
        });
    }

    // Positional IDs over the surviving records
    for (idx, record) in records.iter_mut().enumerate() {
        record.id = format!("{}-{}", source.id_prefix, idx + 1);
    }

    Ok(records)
}

fn read_document(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    match ext.as_str() {
        "docx" => docx_text(&bytes),
        "txt" => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        other => bail!("Unsupported file type: .{}", other),
    }
}

/// Pull paragraph text out of the OOXML container: `word/document.xml`,
/// `w:t` runs concatenated, one newline per closed paragraph.
fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .context("Not a valid docx container")?;

    let mut doc_xml = Vec::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .context("word/document.xml not found")?;
        entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut doc_xml)?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            bail!("word/document.xml exceeds size limit");
        }
    }

    paragraphs_from_xml(&doc_xml)
}

fn paragraphs_from_xml(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"p" {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed document.xml: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
