//! End-to-end pipeline tests.
//!
//! Everything runs offline: the in-memory vector index, the hashed
//! embedder, a scripted chat model, and document fixtures built
//! byte-by-byte (docx/xlsx via the zip crate, PDF via lopdf).

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use docqa::answer::Assembler;
use docqa::embedding::HashedEmbedder;
use docqa::error::{Error, Result};
use docqa::index::{chunk_id, ChunkMeta, ChunkRecord, Filter, MemoryIndex, VectorIndex};
use docqa::llm::ChatModel;
use docqa::metadata::{MetadataStore, DEFAULT_GROUP};
use docqa::ocr::DisabledOcr;
use docqa::pipeline::Pipeline;
use docqa::store::FileStore;

// ============ fixtures ============

fn docx_with_text(phrase: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn xlsx_with_rows() -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("xl/sharedStrings.xml", options).unwrap();
        zip.write_all(
            b"<?xml version=\"1.0\"?><sst><si><t>quarter</t></si><si><t>revenue</t></si></sst>",
        )
        .unwrap();
        zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
        zip.write_all(
            b"<?xml version=\"1.0\"?><worksheet><sheetData>\
              <row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row>\
              <row><c><v>1</v></c><c><v>1000</v></c></row>\
              </sheetData></worksheet>",
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn pdf_with_text(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![100.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut std::io::Cursor::new(&mut buf)).unwrap();
    buf
}

/// A PDF whose single page has no text operators at all.
fn pdf_without_text_layer() -> Vec<u8> {
    use lopdf::content::Content;
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content = Content { operations: vec![] };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut std::io::Cursor::new(&mut buf)).unwrap();
    buf
}

// ============ harness ============

struct CannedChat(&'static str);

#[async_trait]
impl ChatModel for CannedChat {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

fn test_pipeline(dir: &TempDir) -> (Pipeline, Arc<MemoryIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let pipeline = Pipeline::new(
        FileStore::new(dir.path()).unwrap(),
        MetadataStore::new(dir.path()),
        index.clone(),
        Arc::new(HashedEmbedder::new(64)),
        Arc::new(DisabledOcr),
        3000,
        300,
    );
    (pipeline, index)
}

fn test_assembler(pipeline: &Pipeline, chat: Arc<dyn ChatModel>) -> Assembler {
    Assembler::new(pipeline.index(), pipeline.embedder(), chat, 100, 50_000)
}

// ============ upload ============

#[tokio::test]
async fn upload_small_docx_yields_one_chunk() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    let outcome = pipeline
        .upload("report.docx", &docx_with_text("Revenue grew 10%."))
        .await
        .unwrap();

    assert_eq!(outcome.stored_name, "report.docx");
    assert_eq!(outcome.text, "Revenue grew 10%.");
    assert_eq!(outcome.chunk_count, 1);

    let filter = Filter::Filename("report.docx".to_string());
    let chunks = index.get(Some(&filter)).await.unwrap();
    assert_eq!(chunks.len(), 1);
    let (id, meta) = &chunks[0];
    assert_eq!(id, &chunk_id("report.docx", 0));
    assert_eq!(meta.chunk_index, 0);
    assert_eq!(meta.group, DEFAULT_GROUP);
    assert_eq!(meta.original_filename, "report.docx");
}

#[tokio::test]
async fn duplicate_upload_is_stored_under_suffixed_name() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    let first = pipeline
        .upload("report.docx", &docx_with_text("first version"))
        .await
        .unwrap();
    let second = pipeline
        .upload("report.docx", &docx_with_text("second version"))
        .await
        .unwrap();

    assert_eq!(first.stored_name, "report.docx");
    assert_eq!(second.stored_name, "report_1.docx");

    let files = pipeline.list_files().unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.original_filename == "report.docx"));

    // Both files' chunks are independently addressable
    for name in ["report.docx", "report_1.docx"] {
        let filter = Filter::Filename(name.to_string());
        assert_eq!(index.get(Some(&filter)).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn rejected_extension_is_an_error_with_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    let err = pipeline.upload("notes.txt", b"plain text").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(pipeline.list_files().unwrap().is_empty());
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn extraction_failure_rolls_back_the_stored_file() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    let err = pipeline
        .upload("broken.docx", b"this is not a zip archive")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Extraction(_)));

    // The physical file was deleted, nothing was indexed, no record written
    assert!(pipeline.list_files().unwrap().is_empty());
    assert_eq!(index.count().await.unwrap(), 0);
}

#[tokio::test]
async fn xlsx_rows_become_tab_joined_lines() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    let outcome = pipeline.upload("sheet.xlsx", &xlsx_with_rows()).await.unwrap();
    assert_eq!(outcome.text, "quarter\trevenue\n1\t1000");
    assert_eq!(outcome.chunk_count, 1);
}

#[tokio::test]
async fn pdf_text_layer_is_extracted() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    let outcome = pipeline
        .upload("report.pdf", &pdf_with_text("Revenue grew 10%."))
        .await
        .unwrap();
    assert!(outcome.text.contains("Revenue grew 10%."), "{:?}", outcome.text);
    assert_eq!(outcome.chunk_count, 1);
}

#[tokio::test]
async fn pdf_without_text_layer_yields_zero_chunks() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    // OCR disabled: the empty page contributes nothing, which is a valid
    // terminal state, not an error
    let outcome = pipeline
        .upload("scan.pdf", &pdf_without_text_layer())
        .await
        .unwrap();
    assert_eq!(outcome.chunk_count, 0);
    assert_eq!(index.count().await.unwrap(), 0);

    // The file itself is stored and listed
    let files = pipeline.list_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "scan.pdf");
}

// ============ delete / rename ============

#[tokio::test]
async fn delete_removes_file_chunks_and_record() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    pipeline
        .upload("report.docx", &docx_with_text("Revenue grew 10%."))
        .await
        .unwrap();
    assert_eq!(index.count().await.unwrap(), 1);

    pipeline.delete("report.docx").await.unwrap();
    assert!(pipeline.list_files().unwrap().is_empty());
    assert_eq!(index.count().await.unwrap(), 0);

    let filter = Filter::Filename("report.docx".to_string());
    assert!(index.get(Some(&filter)).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);
    let err = pipeline.delete("ghost.pdf").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn rename_moves_file_and_record_but_not_chunk_metadata() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    pipeline
        .upload("report.docx", &docx_with_text("Revenue grew 10%."))
        .await
        .unwrap();
    pipeline.rename("report.docx", "final.docx").unwrap();

    let files = pipeline.list_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "final.docx");
    assert_eq!(files[0].original_filename, "report.docx");

    // Chunks keep the old stored name: the documented stale-reference gap
    let old_filter = Filter::Filename("report.docx".to_string());
    let new_filter = Filter::Filename("final.docx".to_string());
    assert_eq!(index.get(Some(&old_filter)).await.unwrap().len(), 1);
    assert!(index.get(Some(&new_filter)).await.unwrap().is_empty());
}

#[tokio::test]
async fn rename_to_occupied_name_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    pipeline.upload("a.docx", &docx_with_text("a")).await.unwrap();
    pipeline.upload("b.docx", &docx_with_text("b")).await.unwrap();

    let err = pipeline.rename("a.docx", "b.docx").unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

// ============ groups ============

#[tokio::test]
async fn set_group_propagates_to_every_chunk() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    pipeline
        .upload("report.docx", &docx_with_text("Revenue grew 10%."))
        .await
        .unwrap();
    pipeline.set_group("report.docx", "finance").await.unwrap();

    let filter = Filter::Filename("report.docx".to_string());
    let chunks = index.get(Some(&filter)).await.unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|(_, meta)| meta.group == "finance"));

    let groups = pipeline.groups().unwrap();
    assert_eq!(groups["finance"], vec!["report.docx"]);
}

#[tokio::test]
async fn set_group_on_zero_chunk_file_succeeds() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    pipeline
        .upload("scan.pdf", &pdf_without_text_layer())
        .await
        .unwrap();
    pipeline.set_group("scan.pdf", "archive").await.unwrap();

    let files = pipeline.list_files().unwrap();
    assert_eq!(files[0].group, "archive");
}

#[tokio::test]
async fn set_group_on_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);
    let err = pipeline.set_group("ghost.pdf", "g").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn repair_sweep_patches_empty_groups_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (pipeline, index) = test_pipeline(&dir);

    // Force a chunk with an empty group field into the index
    index
        .upsert(&[ChunkRecord {
            id: chunk_id("orphan.pdf", 0),
            text: "orphaned".to_string(),
            embedding: vec![1.0, 0.0],
            meta: ChunkMeta {
                filename: "orphan.pdf".to_string(),
                original_filename: "orphan.pdf".to_string(),
                chunk_index: 0,
                group: String::new(),
            },
        }])
        .await
        .unwrap();

    assert_eq!(pipeline.fix_groups().await.unwrap(), 1);
    let (_, meta) = index.get(None).await.unwrap().remove(0);
    assert_eq!(meta.group, DEFAULT_GROUP);

    // Second run is a no-op
    assert_eq!(pipeline.fix_groups().await.unwrap(), 0);
}

// ============ retrieval ============

#[tokio::test]
async fn ask_without_documents_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);
    let assembler = test_assembler(&pipeline, Arc::new(CannedChat("unused")));

    let err = assembler.answer("anything?", None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn ask_returns_answer_and_deduped_sources() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    pipeline
        .upload("report.docx", &docx_with_text("Revenue grew 10%."))
        .await
        .unwrap();

    let assembler = test_assembler(&pipeline, Arc::new(CannedChat("Revenue rose by ten percent.")));
    let result = assembler.answer("How did revenue change?", None).await.unwrap();

    assert_eq!(result.answer, "Revenue rose by ten percent.");
    assert_eq!(result.source_files, vec!["report.docx"]);
}

#[tokio::test]
async fn ask_sources_are_a_subset_of_stored_files() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    pipeline
        .upload("a.docx", &docx_with_text("alpha document about revenue"))
        .await
        .unwrap();
    pipeline
        .upload("b.docx", &docx_with_text("beta document about staffing"))
        .await
        .unwrap();

    let assembler = test_assembler(&pipeline, Arc::new(CannedChat("x")));
    let result = assembler.answer("revenue", None).await.unwrap();

    let stored: Vec<String> = pipeline
        .list_files()
        .unwrap()
        .into_iter()
        .map(|f| f.filename)
        .collect();
    for source in &result.source_files {
        assert!(stored.contains(source), "{source} not stored");
    }
    // Each source appears exactly once
    let mut deduped = result.source_files.clone();
    deduped.dedup();
    assert_eq!(deduped, result.source_files);
}

#[tokio::test]
async fn ask_scoped_to_group_only_sees_that_group() {
    let dir = TempDir::new().unwrap();
    let (pipeline, _) = test_pipeline(&dir);

    pipeline
        .upload("fin.docx", &docx_with_text("revenue and profit figures"))
        .await
        .unwrap();
    pipeline
        .upload("hr.docx", &docx_with_text("revenue conversations with staff"))
        .await
        .unwrap();
    pipeline.set_group("fin.docx", "finance").await.unwrap();

    let assembler = test_assembler(&pipeline, Arc::new(CannedChat("x")));
    let result = assembler.answer("revenue", Some("finance")).await.unwrap();
    assert_eq!(result.source_files, vec!["fin.docx"]);
}
