// src/service.rs

use crate::bills::{BillDrafter, PROVIDER};
use crate::blobs::{BlobStore, LocalBlobStore};
use crate::config::ConfigHandle;
use crate::error::Result;
use crate::ingest::{Ingested, Ingestor};
use crate::model::{DraftBill, PayloadAudit, Run, RunPage};
use crate::oauth::{ConnectionStatus, TokenManager};
use crate::store::Store;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Connect timeout for every outbound call; per-request timeouts come from
/// the relevant config section.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// The backend's operations, independent of any transport.
pub struct App {
    store: Arc<Store>,
    config: ConfigHandle,
    ingestor: Ingestor,
    tokens: Arc<TokenManager>,
    drafter: BillDrafter,
}

impl App {
    /// Open storage from the configured paths and wire the components.
    pub async fn open(config: ConfigHandle) -> Result<Self> {
        let cfg = config.snapshot();
        let store = Arc::new(Store::open(&cfg.storage.db_path)?);
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&cfg.storage.files_dir).await?);
        info!(
            db = %cfg.storage.db_path,
            files = %cfg.storage.files_dir,
            parser = %cfg.parser.base_url,
            "Storage opened"
        );
        Self::with_parts(store, blobs, config)
    }

    pub fn with_parts(
        store: Arc<Store>,
        blobs: Arc<dyn BlobStore>,
        config: ConfigHandle,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        let tokens = Arc::new(TokenManager::new(
            store.clone(),
            config.clone(),
            client.clone(),
        ));
        let ingestor = Ingestor::new(store.clone(), blobs.clone(), config.clone(), client.clone());
        let drafter = BillDrafter::new(
            store.clone(),
            blobs,
            tokens.clone(),
            config.clone(),
            client,
        );
        Ok(Self {
            store,
            config,
            ingestor,
            tokens,
            drafter,
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn list_runs(&self, limit: Option<usize>, cursor: Option<i64>) -> Result<RunPage> {
        self.ingestor.list(limit, cursor)
    }

    pub fn get_run(&self, id: &str) -> Result<Run> {
        self.ingestor.get(id)
    }

    pub async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Ingested> {
        self.ingestor.ingest(file_name, bytes).await
    }

    pub async fn create_draft_bill(&self, run_id: &str) -> Result<DraftBill> {
        self.drafter.create_draft_bill(run_id).await
    }

    pub fn connection_status(&self) -> Result<ConnectionStatus> {
        self.tokens.status(PROVIDER)
    }

    pub fn audits(&self, run_id: &str) -> Result<Vec<PayloadAudit>> {
        self.store.payloads_for(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{BillMode, PayloadKind};

    #[tokio::test]
    async fn test_end_to_end_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.storage.db_path = dir.path().join("db").join("bills.db").display().to_string();
        cfg.storage.files_dir = dir.path().join("files").display().to_string();
        let app = App::open(ConfigHandle::new(cfg)).await.unwrap();

        let first = app.ingest("inv.pdf", b"%PDF-1.7 e2e").await.unwrap();
        let dup = app.ingest("inv.pdf", b"%PDF-1.7 e2e").await.unwrap();
        assert!(first.created && !dup.created);
        assert_eq!(first.run.id, dup.run.id);
        assert_eq!(app.get_run(&first.run.id).unwrap(), first.run);
        assert_eq!(app.list_runs(None, None).unwrap().runs.len(), 1);

        // Simulated runs have no parsed snapshot to draft from.
        assert!(app.create_draft_bill(&first.run.id).await.is_err());

        let status = app.connection_status().unwrap();
        assert!(!status.connected);

        let stored = std::fs::read_dir(dir.path().join("files")).unwrap().count();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_draft_after_parsed_snapshot_in_mock_mode() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let blobs: Arc<dyn BlobStore> = Arc::new(crate::blobs::MemoryBlobStore::new());
        let app = App::with_parts(store.clone(), blobs, ConfigHandle::new(Config::default())).unwrap();

        let run = app.ingest("a.pdf", b"%PDF").await.unwrap().run;
        store
            .insert_payload(
                &run.id,
                PayloadKind::Parsed,
                &serde_json::json!({ "header": {}, "items": [{ "desc": "X", "qty": 3, "rate": 2 }] }),
            )
            .unwrap();

        let bill = app.create_draft_bill(&run.id).await.unwrap();
        assert_eq!(bill.mode, BillMode::Mock);
        assert_eq!(bill.data["bill"]["total"], 6.0);
        assert!(app.get_run(&run.id).unwrap().bill_link.is_some());
        assert_eq!(app.audits(&run.id).unwrap().len(), 3);
    }
}
