// src/bills.rs

use crate::blobs::BlobStore;
use crate::config::{ConfigHandle, ZohoConfig};
use crate::error::{Error, Result};
use crate::ids::now_millis;
use crate::model::{BillMode, DraftBill, PayloadKind};
use crate::normalize::{BillRequest, build_bill_request};
use crate::oauth::TokenManager;
use crate::store::Store;
use crate::totals::round2;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use urlencoding::encode;

/// Token store key for the accounting integration.
pub const PROVIDER: &str = "zoho";
pub const MOCK_BILL_LINK: &str = "https://books.zoho.com/app#/bills/mock-draft";

static MOCK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Mock unless explicitly forced, or unless live mode has both a stored
/// credential and an organization id to post against.
pub fn select_mode(zoho: &ZohoConfig, has_credential: bool) -> BillMode {
    if zoho.mock_mode || !has_credential || zoho.organization_id.trim().is_empty() {
        BillMode::Mock
    } else {
        BillMode::Live
    }
}

/// Creates draft vendor bills in the accounting system from parsed runs.
pub struct BillDrafter {
    store: Arc<Store>,
    blobs: Arc<dyn BlobStore>,
    tokens: Arc<TokenManager>,
    config: ConfigHandle,
    client: Client,
}

impl BillDrafter {
    pub fn new(
        store: Arc<Store>,
        blobs: Arc<dyn BlobStore>,
        tokens: Arc<TokenManager>,
        config: ConfigHandle,
        client: Client,
    ) -> Self {
        Self {
            store,
            blobs,
            tokens,
            config,
            client,
        }
    }

    /// Create a draft bill for a run from its latest parsed snapshot.
    ///
    /// The mode is decided fresh on every call. In live mode the request is
    /// audited before it is sent and the response after, whatever it says.
    #[tracing::instrument(skip(self))]
    pub async fn create_draft_bill(&self, run_id: &str) -> Result<DraftBill> {
        if self.store.get_run(run_id)?.is_none() {
            return Err(Error::NotFound(format!("run '{run_id}'")));
        }
        let parsed = self
            .store
            .latest_payload(run_id, PayloadKind::Parsed)?
            .ok_or_else(|| Error::NoParsedPayload {
                run_id: run_id.to_string(),
            })?;

        let request = build_bill_request(&parsed.body);
        let cfg = self.config.snapshot().zoho;
        let mode = select_mode(&cfg, self.tokens.is_connected(PROVIDER)?);
        info!(mode = ?mode, lines = request.line_items.len(), "Creating draft bill");

        let data = match mode {
            BillMode::Mock => self.create_mock(run_id, &request)?,
            BillMode::Live => self.create_live(run_id, &request, &cfg).await?,
        };
        Ok(DraftBill { mode, data })
    }

    fn create_mock(&self, run_id: &str, request: &BillRequest) -> Result<Value> {
        let bill_id = format!(
            "MOCK-{}-{}",
            now_millis(),
            MOCK_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let bill_number = request
            .bill_number
            .clone()
            .unwrap_or_else(|| format!("DRAFT-{run_id}"));

        let response = json!({
            "code": 0,
            "message": "The bill has been created.",
            "bill": {
                "bill_id": bill_id,
                "bill_number": bill_number,
                "vendor_name": request.vendor_name,
                "status": "draft",
                "total": round2(request.line_total()),
            }
        });

        self.store.insert_payload(
            run_id,
            PayloadKind::IntegrationRequest,
            &serde_json::to_value(request)?,
        )?;
        self.store
            .insert_payload(run_id, PayloadKind::IntegrationResponse, &response)?;
        self.store.set_bill_link(run_id, MOCK_BILL_LINK)?;

        info!(bill_id = %bill_id, "Mock draft bill created");
        Ok(response)
    }

    async fn create_live(
        &self,
        run_id: &str,
        request: &BillRequest,
        cfg: &ZohoConfig,
    ) -> Result<Value> {
        self.store.insert_payload(
            run_id,
            PayloadKind::IntegrationRequest,
            &serde_json::to_value(request)?,
        )?;

        let token = self.tokens.get_valid_token(PROVIDER).await?;
        let url = format!(
            "{}/books/v3/bills?organization_id={}",
            cfg.api_base.trim_end_matches('/'),
            encode(&cfg.organization_id)
        );

        let sent = self
            .client
            .post(&url)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .json(request)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                self.store.insert_payload(
                    run_id,
                    PayloadKind::IntegrationResponse,
                    &json!({ "transport_error": e.to_string() }),
                )?;
                return Err(e.into());
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text)
            .unwrap_or_else(|_| json!({ "status": status.as_u16(), "raw": text }));
        self.store
            .insert_payload(run_id, PayloadKind::IntegrationResponse, &body)?;

        // Zoho reports some rejections as 2xx with a non-zero code.
        let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
        if !status.is_success() || code != 0 {
            warn!(status = status.as_u16(), code, "Accounting API rejected the bill");
            return Err(Error::Integration {
                status: status.as_u16(),
                body: text,
            });
        }

        let bill_id = match body.pointer("/bill/bill_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::Integration {
                    status: status.as_u16(),
                    body: text,
                });
            }
        };

        let link = format!(
            "{}/app/{}#/bills/{}",
            cfg.web_base.trim_end_matches('/'),
            cfg.organization_id,
            bill_id
        );
        self.store.set_bill_link(run_id, &link)?;
        info!(bill_id = %bill_id, link = %link, "Draft bill created");

        if let Err(e) = self.attach_original(run_id, &bill_id, &token, cfg).await {
            warn!(error = %e, bill_id = %bill_id, "Attaching original file failed");
        }
        Ok(body)
    }

    /// Upload the stored original file onto the created bill. The bill stands
    /// whether or not this succeeds.
    async fn attach_original(
        &self,
        run_id: &str,
        bill_id: &str,
        token: &str,
        cfg: &ZohoConfig,
    ) -> Result<()> {
        let Some(key) = self.store.stored_file(run_id)? else {
            return Ok(());
        };
        let bytes = self.blobs.get(&key).await?;
        let file_name = key
            .strip_prefix(&format!("{run_id}_"))
            .unwrap_or(&key)
            .to_string();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part("attachment", part);

        let url = format!(
            "{}/books/v3/bills/{}/attachment?organization_id={}",
            cfg.api_base.trim_end_matches('/'),
            encode(bill_id),
            encode(&cfg.organization_id)
        );
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .multipart(form)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Integration { status, body });
        }
        info!(bill_id = %bill_id, "Original file attached");
        Ok(())
    }
}
