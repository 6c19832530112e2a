// src/ingest.rs

use crate::blobs::BlobStore;
use crate::config::ConfigHandle;
use crate::error::{Error, Result};
use crate::ids::{content_hash, generate_run_id, now_millis};
use crate::model::{PayloadKind, Run, RunPage, RunStatus};
use crate::normalize;
use crate::parser_client::ParserClient;
use crate::simulator::simulate_run;
use crate::store::{InsertOutcome, Store};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
const MAX_FILE_NAME_CHARS: usize = 100;
const FALLBACK_FILE_NAME: &str = "upload.pdf";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

/// Result of an ingestion: the run, and whether this call created it.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub run: Run,
    pub created: bool,
}

/// Turns uploaded invoice files into runs.
pub struct Ingestor {
    store: Arc<Store>,
    blobs: Arc<dyn BlobStore>,
    config: ConfigHandle,
    client: Client,
}

impl Ingestor {
    pub fn new(
        store: Arc<Store>,
        blobs: Arc<dyn BlobStore>,
        config: ConfigHandle,
        client: Client,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
            client,
        }
    }

    /// Ingest one uploaded file.
    ///
    /// Byte-identical content returns the existing run with `created = false`
    /// and writes nothing. Parser trouble falls back to simulation; only
    /// storage failures are returned as errors.
    #[tracing::instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Ingested> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("no file uploaded".into()));
        }

        let hash = content_hash(bytes);
        if let Some(run) = self.store.find_run_by_hash(&hash)? {
            info!(run_id = %run.id, "Duplicate upload, returning existing run");
            return Ok(Ingested {
                run,
                created: false,
            });
        }

        let safe_name = sanitize_file_name(file_name);
        let original_name = match file_name.trim() {
            "" => safe_name.clone(),
            name => name.to_string(),
        };

        let started = Instant::now();
        let parsed = self.try_parse(&safe_name, bytes).await;
        let run = match &parsed {
            Some(parsed) => run_from_parsed(parsed, &original_name, started.elapsed()),
            None => simulate_run(&original_name, &mut rand::thread_rng()),
        };

        let blob_key = format!("{}_{}", run.id, safe_name);
        self.blobs.put(&blob_key, bytes).await?;

        match self.store.insert_run(&run, &hash, Some(&blob_key))? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Existing(existing) => {
                // Lost a race with an identical upload.
                if let Err(e) = self.blobs.delete(&blob_key).await {
                    warn!(error = %e, key = %blob_key, "Could not remove orphaned upload");
                }
                return Ok(Ingested {
                    run: existing,
                    created: false,
                });
            }
        }

        if let Some(parsed) = &parsed {
            self.store
                .insert_payload(&run.id, PayloadKind::Parsed, parsed)?;
        }

        info!(
            run_id = %run.id,
            status = ?run.status,
            items = run.items.len(),
            total = run.totals.total,
            parsed = parsed.is_some(),
            "Run created"
        );
        Ok(Ingested { run, created: true })
    }

    /// Ask the configured parser for a result; `None` means simulate.
    async fn try_parse(&self, file_name: &str, bytes: &[u8]) -> Option<Value> {
        let cfg = self.config.snapshot().parser;
        if cfg.base_url.trim().is_empty() {
            info!("No parser configured, simulating");
            return None;
        }

        let parser = ParserClient::new(
            self.client.clone(),
            &cfg.base_url,
            Duration::from_secs(cfg.timeout_secs),
        );
        match parser.parse(file_name, bytes).await {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(error = %e, "Parser failed, falling back to simulation");
                None
            }
        }
    }

    /// Newest-first page of runs. The cursor is the `createdAt` of the last
    /// run on the previous page.
    pub fn list(&self, limit: Option<usize>, cursor: Option<i64>) -> Result<RunPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self.store.list_runs(limit, cursor)
    }

    pub fn get(&self, id: &str) -> Result<Run> {
        self.store
            .get_run(id)?
            .ok_or_else(|| Error::NotFound(format!("run '{id}'")))
    }
}

/// Build a run from a parser result. Totals are the parser's own.
pub fn run_from_parsed(parsed: &Value, file_name: &str, elapsed: Duration) -> Run {
    Run {
        id: generate_run_id(),
        status: RunStatus::Success,
        meta: normalize::normalize_header(parsed),
        items: normalize::normalize_items(parsed),
        totals: normalize::parsed_totals(parsed),
        bill_link: None,
        duration: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
        file_name: file_name.to_string(),
        notes: normalize::anomalies(parsed),
        created_at: now_millis(),
    }
}

/// Make an uploaded file name safe to use as a storage key: drop any path,
/// collapse whitespace, replace odd characters and cap the length.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    let collapsed = WHITESPACE.replace_all(base, "_");
    let safe = UNSAFE_CHARS.replace_all(&collapsed, "_");
    let safe = safe.trim_start_matches('.');
    let capped: String = safe.chars().take(MAX_FILE_NAME_CHARS).collect();
    if capped.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::MemoryBlobStore;
    use crate::config::Config;
    use crate::totals::compute_totals;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ingestor(parser_url: &str) -> (Ingestor, Arc<Store>, Arc<MemoryBlobStore>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut cfg = Config::default();
        cfg.parser.base_url = parser_url.to_string();
        cfg.parser.timeout_secs = 5;
        let ing = Ingestor::new(
            store.clone(),
            blobs.clone(),
            ConfigHandle::new(cfg),
            Client::new(),
        );
        (ing, store, blobs)
    }

    fn parser_body() -> Value {
        json!({
            "header": {
                "vendor": "SUPPLIER SDN BHD", "invoiceNo": "I-DEMO-0001",
                "date": "2026-10-19", "terms": 30, "agent": "AUTO",
                "billTo": "UCON MOTORSPORT", "shipTo": "UCON MOTORSPORT"
            },
            "items": [
                { "desc": "BLOCK SCREW A - EX5CLASS", "sku": "D0054", "qty": 20, "unit": "PC", "rate": 4.5, "disc": 0, "tax": 0 },
                { "desc": "METER ASSY TCB", "sku": "3F0236", "qty": 2, "unit": "SET", "rate": 175, "disc": 0, "tax": 0 }
            ],
            "totals": { "subtotal": 440.0, "tax": 0.0, "discount": 0.0, "rounding": 0.0, "total": 999.99 },
            "anomalies": ["Total does not match line sum"]
        })
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\bills\\Inv  March 2026.pdf"), "Inv_March_2026.pdf");
        assert_eq!(sanitize_file_name("..hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_file_name("a/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("facture d'été.pdf"), "facture_d__t_.pdf");
        assert_eq!(sanitize_file_name(&"x".repeat(300)).len(), MAX_FILE_NAME_CHARS);
    }

    #[tokio::test]
    async fn test_duplicate_upload_returns_same_run() {
        let (ing, store, blobs) = ingestor("");
        let first = ing.ingest("invoice.pdf", b"%PDF-1.4 one").await.unwrap();
        assert!(first.created);

        let second = ing.ingest("renamed.pdf", b"%PDF-1.4 one").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.run, first.run);
        assert_eq!(blobs.len(), 1);
        assert_eq!(store.list_runs(10, None).unwrap().runs.len(), 1);

        let other = ing.ingest("invoice.pdf", b"%PDF-1.4 two").await.unwrap();
        assert!(other.created);
        assert_ne!(other.run.id, first.run.id);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_collapse_into_one_run() {
        // The delay keeps both uploads past the hash lookup before either inserts.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(parser_body())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let (ing, store, blobs) = ingestor(&server.uri());
        let (a, b) = tokio::join!(
            ing.ingest("a.pdf", b"%PDF same bytes"),
            ing.ingest("b.pdf", b"%PDF same bytes")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.run.id, b.run.id);
        assert!(a.created ^ b.created);
        assert_eq!(store.list_runs(10, None).unwrap().runs.len(), 1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(store.payloads_for(&a.run.id).unwrap().len(), 1);

        let key = store.stored_file(&a.run.id).unwrap().unwrap();
        assert_eq!(blobs.get(&key).await.unwrap(), b"%PDF same bytes");
    }

    #[tokio::test]
    async fn test_without_parser_totals_come_from_engine() {
        let (ing, store, _) = ingestor("");
        for i in 0..20 {
            let out = ing
                .ingest("sim.pdf", format!("content {i}").as_bytes())
                .await
                .unwrap();
            assert_eq!(out.run.totals, compute_totals(&out.run.items));
            assert!(
                store
                    .latest_payload(&out.run.id, PayloadKind::Parsed)
                    .unwrap()
                    .is_none()
            );
        }
    }

    #[tokio::test]
    async fn test_empty_upload_is_client_error() {
        let (ing, _, _) = ingestor("");
        let err = ing.ingest("a.pdf", b"").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_parsed_run_trusts_parser_totals() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parser_body()))
            .expect(1)
            .mount(&server)
            .await;

        let (ing, store, blobs) = ingestor(&server.uri());
        let out = ing.ingest("my invoice.pdf", b"%PDF parsed").await.unwrap();
        let run = out.run;

        assert!(out.created);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.totals.total, 999.99);
        assert_eq!(run.items.len(), 2);
        assert_eq!(run.meta.invoice_no.as_deref(), Some("I-DEMO-0001"));
        assert_eq!(run.meta.terms.as_deref(), Some("30"));
        assert_eq!(run.notes, vec!["Total does not match line sum".to_string()]);
        assert_eq!(run.file_name, "my invoice.pdf");

        let audit = store
            .latest_payload(&run.id, PayloadKind::Parsed)
            .unwrap()
            .unwrap();
        assert_eq!(audit.body, parser_body());

        let key = store.stored_file(&run.id).unwrap().unwrap();
        assert_eq!(key, format!("{}_my_invoice.pdf", run.id));
        assert_eq!(blobs.get(&key).await.unwrap(), b"%PDF parsed");
    }

    #[tokio::test]
    async fn test_parser_failure_falls_back_to_simulation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (ing, store, _) = ingestor(&server.uri());
        let out = ing.ingest("a.pdf", b"%PDF broken").await.unwrap();
        assert!(out.created);
        assert_eq!(out.run.totals, compute_totals(&out.run.items));
        assert!(
            store
                .latest_payload(&out.run.id, PayloadKind::Parsed)
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unreachable_parser_falls_back() {
        // Nothing listens on port 9 on loopback.
        let (ing, _, _) = ingestor("http://127.0.0.1:9");
        let out = ing.ingest("a.pdf", b"%PDF offline").await.unwrap();
        assert!(out.created);
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let (ing, _, _) = ingestor("");
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(ing.ingest("a.pdf", &[i + 1]).await.unwrap().run.id);
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        let page = ing.list(Some(2), None).unwrap();
        assert_eq!(page.runs.len(), 2);
        assert_eq!(page.runs[0].id, ids[2]);
        assert!(page.next_cursor.is_some());

        let rest = ing.list(Some(2), page.next_cursor).unwrap();
        assert_eq!(rest.runs.len(), 1);
        assert_eq!(rest.runs[0].id, ids[0]);
        assert!(rest.next_cursor.is_none());

        assert_eq!(ing.get(&ids[1]).unwrap().id, ids[1]);
        assert!(matches!(ing.get("run_missing"), Err(Error::NotFound(_))));
    }
}
