//! Text extraction for the three accepted upload formats.
//!
//! docx and xlsx are OOXML zip containers read with streaming XML: docx
//! paragraphs join with newlines; xlsx cells join with tabs and rows with
//! newlines. PDF extraction walks the document page by page, taking the text
//! layer where one exists and falling back to OCR for pages without one. A
//! page whose OCR attempt fails is logged and skipped — missing page text is
//! acceptable, a dead parser is not.

use std::io::Read;
use std::path::Path;

use lopdf::Document;
use quick_xml::events::Event;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ocr::OcrEngine;

/// Maximum decompressed bytes read from a single zip entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from the stored file at `path`, dispatched on the
/// lowercased extension.
pub async fn extract_text(path: &Path, ext: &str, ocr: &dyn OcrEngine) -> Result<String> {
    match ext {
        "docx" => {
            let bytes = tokio::fs::read(path).await?;
            run_blocking(move || docx_text(&bytes)).await
        }
        "xlsx" => {
            let bytes = tokio::fs::read(path).await?;
            run_blocking(move || xlsx_text(&bytes)).await
        }
        "pdf" => pdf_text(path, ocr).await,
        other => Err(Error::Validation(format!("unsupported file type: .{other}"))),
    }
}

async fn run_blocking<F>(f: F) -> Result<String>
where
    F: FnOnce() -> Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Extraction(format!("extraction task failed: {e}")))?
}

// ============ docx ============

/// Paragraph texts from `word/document.xml`, joined with newlines.
fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("not a valid docx archive: {e}")))?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => out.push('\n'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("word/document.xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end_matches('\n').to_string())
}

// ============ xlsx ============

#[derive(PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Raw,
}

/// Cell values joined with tabs, rows with newlines, sheets in workbook
/// order. Shared, inline and raw (numeric or formula-result) cells are all
/// included.
fn xlsx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("not a valid xlsx archive: {e}")))?;

    let shared = read_shared_strings(&mut archive)?;
    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut lines = Vec::new();
    for name in sheet_names {
        let xml = read_zip_entry(&mut archive, &name)?;
        sheet_rows(&xml, &shared, &mut lines)?;
    }
    Ok(lines.join("\n"))
}

fn sheet_rows(xml: &[u8], shared: &[String], lines: &mut Vec<String>) -> Result<()> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut cells: Vec<String> = Vec::new();
    let mut kind = CellKind::Raw;
    let mut in_value = false;
    let mut in_inline_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    kind = CellKind::Raw;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Raw,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_inline_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) => {
                let value = te.unescape().unwrap_or_default();
                if in_value {
                    match kind {
                        CellKind::Shared => {
                            if let Ok(i) = value.trim().parse::<usize>() {
                                if let Some(s) = shared.get(i) {
                                    cells.push(s.clone());
                                }
                            }
                        }
                        _ => cells.push(value.into_owned()),
                    }
                } else if in_inline_text {
                    cells.push(value.into_owned());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"row" => lines.push(cells.join("\t")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("worksheet XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// `xl/sharedStrings.xml`, one concatenated string per `<si>` entry so rich
/// text runs keep their index. Workbooks without shared strings are fine.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>> {
    let xml = match read_zip_entry(archive, "xl/sharedStrings.xml") {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                    current.clear();
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("xl/sharedStrings.xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::Extraction(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| Error::Extraction(format!("{name}: {e}")))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(format!(
            "{name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

// ============ pdf ============

/// Per-page text layer, OCR fallback for pages without one, pages joined
/// with newlines.
async fn pdf_text(path: &Path, ocr: &dyn OcrEngine) -> Result<String> {
    let owned = path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || pdf_text_layer(&owned))
        .await
        .map_err(|e| Error::Extraction(format!("extraction task failed: {e}")))??;

    let mut parts = Vec::new();
    for (page, text) in pages {
        if !text.trim().is_empty() {
            parts.push(text);
        } else if ocr.is_enabled() {
            match ocr.recognize_page(path, page).await {
                Ok(recognized) => parts.push(recognized),
                Err(e) => warn!(page, "OCR failed, page text skipped: {e}"),
            }
        } else {
            debug!(page, "page has no text layer and OCR is disabled");
        }
    }
    Ok(parts.join("\n"))
}

fn pdf_text_layer(path: &Path) -> Result<Vec<(u32, String)>> {
    let doc =
        Document::load(path).map_err(|e| Error::Extraction(format!("not a valid PDF: {e}")))?;
    let mut pages = Vec::new();
    for (page, _) in doc.get_pages() {
        // An unextractable page is an empty page; the OCR fallback decides
        // what happens next.
        let text = doc.extract_text(&[page]).unwrap_or_default();
        pages.push((page, text));
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::DisabledOcr;
    use std::io::Write;

    fn docx_fixture(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body}</w:body></w:document>"
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    fn xlsx_fixture() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/sharedStrings.xml", options).unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><sst><si><t>name</t></si><si><t>alice</t></si></sst>",
            )
            .unwrap();
            zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
            zip.write_all(
                b"<?xml version=\"1.0\"?><worksheet><sheetData>\
                  <row><c t=\"s\"><v>0</v></c><c><v>42</v></c></row>\
                  <row><c t=\"s\"><v>1</v></c><c t=\"inlineStr\"><is><t>inline</t></is></c></row>\
                  </sheetData></worksheet>",
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn docx_paragraphs_join_with_newlines() {
        let text = docx_text(&docx_fixture(&["Revenue grew 10%.", "Costs fell."])).unwrap();
        assert_eq!(text, "Revenue grew 10%.\nCosts fell.");
    }

    #[test]
    fn docx_without_text_is_empty() {
        let text = docx_text(&docx_fixture(&[])).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn invalid_docx_is_an_extraction_error() {
        let err = docx_text(b"not a zip").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn xlsx_cells_join_with_tabs_rows_with_newlines() {
        let text = xlsx_text(&xlsx_fixture()).unwrap();
        assert_eq!(text, "name\t42\nalice\tinline");
    }

    #[test]
    fn xlsx_without_shared_strings_still_reads_values() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "xl/worksheets/sheet1.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            zip.write_all(b"<worksheet><sheetData><row><c><v>7</v></c></row></sheetData></worksheet>")
                .unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(xlsx_text(&buf).unwrap(), "7");
    }

    #[tokio::test]
    async fn unsupported_extension_is_a_validation_error() {
        let err = extract_text(Path::new("x.txt"), "txt", &DisabledOcr)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn invalid_pdf_is_an_extraction_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = extract_text(&path, "pdf", &DisabledOcr).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
