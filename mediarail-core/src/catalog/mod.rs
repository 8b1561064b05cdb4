//! Asset catalog client
//!
//! CRUD over the metadata records that make uploaded assets discoverable.
//! The catalog is the source of truth for listings; the raw storage listing
//! is only a degraded fallback when the catalog itself is unreachable.
//! Responses are probed the same way upload responses are: field names and
//! nesting vary by deployment, so records are assembled by inspection rather
//! than a fixed schema.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::backend::{BackendError, StorageBackend};
use crate::config::MediarailConfig;
use crate::media::is_media_file_name;
use crate::storage::{StorageReference, extract};

/// Catalog-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("No asset with id '{id}'")]
    NotFound { id: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// One asset as the catalog knows it.
///
/// `reference` is whatever the upload response yielded, URL or key; it is
/// resolved to something playable on demand, never eagerly for a listing.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub reference: StorageReference,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: u64,
    pub tags: Vec<String>,
    pub is_active: bool,
}

/// Fields for a new catalog record.
#[derive(Debug, Clone)]
pub struct AssetDraft {
    pub title: String,
    pub description: String,
    pub reference: String,
    pub thumbnail_url: String,
    pub duration_seconds: u64,
    pub tags: Vec<String>,
    pub is_active: bool,
}

impl AssetDraft {
    fn body(&self) -> Value {
        json!({
            "title": self.title,
            "description": self.description,
            "videoUrl": self.reference,
            "thumbnailUrl": self.thumbnail_url,
            "durationSeconds": self.duration_seconds,
            "tags": self.tags,
            "isActive": self.is_active,
        })
    }
}

/// Partial update for an existing record. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AssetPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub duration_seconds: Option<u64>,
}

impl AssetPatch {
    fn body(&self) -> Value {
        let mut fields = serde_json::Map::new();
        if let Some(title) = &self.title {
            fields.insert("title".to_string(), json!(title));
        }
        if let Some(description) = &self.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(reference) = &self.reference {
            fields.insert("videoUrl".to_string(), json!(reference));
        }
        if let Some(duration) = self.duration_seconds {
            fields.insert("durationSeconds".to_string(), json!(duration));
        }
        Value::Object(fields)
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.reference.is_none()
            && self.duration_seconds.is_none()
    }
}

/// Client for the catalog endpoint, with a raw-storage listing fallback.
pub struct CatalogClient {
    backend: Arc<dyn StorageBackend>,
    catalog_endpoint: &'static str,
    list_endpoint: &'static str,
    listing_limit: u32,
}

impl CatalogClient {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &MediarailConfig) -> Self {
        Self {
            backend,
            catalog_endpoint: config.network.catalog_endpoint,
            list_endpoint: config.network.list_endpoint,
            listing_limit: config.ingest.listing_limit,
        }
    }

    /// Persist a new record.
    ///
    /// # Errors
    /// - `CatalogError::Backend` - Request failed or was rejected
    pub async fn create(&self, draft: AssetDraft) -> Result<AssetRecord, CatalogError> {
        let response = self
            .backend
            .post_json(self.catalog_endpoint, draft.body())
            .await?;

        let id = record_id(&response).unwrap_or_default();
        tracing::info!("catalog record created: {}", draft.title);

        Ok(AssetRecord {
            id,
            title: draft.title,
            description: draft.description,
            reference: StorageReference::classify(&draft.reference)
                .unwrap_or(StorageReference::Key(draft.reference)),
            thumbnail_url: (!draft.thumbnail_url.is_empty()).then_some(draft.thumbnail_url),
            duration_seconds: draft.duration_seconds,
            tags: draft.tags,
            is_active: draft.is_active,
        })
    }

    /// Apply a partial update to an existing record, returning the record
    /// as it stands after the patch. Empty patches are a no-op without a
    /// network call.
    ///
    /// The returned record is assembled from the server's echo of it when
    /// the response carries one, and from the patch fields otherwise.
    pub async fn update(&self, id: &str, patch: AssetPatch) -> Result<AssetRecord, CatalogError> {
        if patch.is_empty() {
            tracing::debug!("empty patch for record {id}, skipping");
            return Ok(patched_record(id, &patch));
        }

        let endpoint = format!("{}/{}", self.catalog_endpoint, urlencoding::encode(id));
        let response = self.backend.patch_json(&endpoint, patch.body()).await?;
        tracing::info!("catalog record {id} updated");

        for nested in [&response, &response["data"], &response["data"]["data"]] {
            if let Some(record) = record_from_entry(nested) {
                return Ok(record);
            }
        }
        Ok(patched_record(id, &patch))
    }

    /// Delete a record.
    pub async fn remove(&self, id: &str) -> Result<(), CatalogError> {
        let endpoint = format!("{}/{}", self.catalog_endpoint, urlencoding::encode(id));
        self.backend.delete(&endpoint).await?;
        tracing::info!("catalog record {id} deleted");
        Ok(())
    }

    /// List all assets.
    ///
    /// Prefers the catalog; when the catalog call fails, degrades to the raw
    /// storage listing so the library is still browsable, minus metadata.
    pub async fn list(&self) -> Result<Vec<AssetRecord>, CatalogError> {
        let endpoint = format!(
            "{}?page=1&limit={}",
            self.catalog_endpoint, self.listing_limit
        );

        match self.backend.get_json(&endpoint).await {
            Ok(body) => Ok(catalog_records(&body)),
            Err(e) => {
                tracing::warn!("catalog listing failed ({e}), falling back to raw storage");
                self.list_raw_storage().await
            }
        }
    }

    /// Degraded listing straight from object storage: file names only.
    async fn list_raw_storage(&self) -> Result<Vec<AssetRecord>, CatalogError> {
        let body = self.backend.get_json(self.list_endpoint).await?;

        let records = extract::listing_entries(&body)
            .iter()
            .filter_map(|entry| {
                let raw = extract::entry_reference(entry)?;
                let reference = StorageReference::classify(&raw)?;
                let file_name = reference.file_name().to_string();
                if !is_media_file_name(&file_name) {
                    return None;
                }

                Some(AssetRecord {
                    id: raw.clone(),
                    title: file_name,
                    description: String::new(),
                    reference,
                    thumbnail_url: None,
                    duration_seconds: 0,
                    tags: Vec::new(),
                    is_active: true,
                })
            })
            .collect();

        Ok(records)
    }
}

/// Probe a catalog response for the record identifier.
fn record_id(body: &Value) -> Option<String> {
    for nested in [body, &body["data"], &body["data"]["data"]] {
        if let Some(id) = extract::first_string(nested, &["_id", "id"]) {
            return Some(id);
        }
    }
    None
}

/// Assemble records from a catalog listing response.
fn catalog_records(body: &Value) -> Vec<AssetRecord> {
    extract::listing_entries(body)
        .iter()
        .filter_map(|entry| record_from_entry(entry))
        .collect()
}

/// Assemble one record from a catalog JSON object, if it looks like one.
fn record_from_entry(entry: &Value) -> Option<AssetRecord> {
    let raw = extract::first_string(
        entry,
        &["videoUrl", "url", "fileUrl", "videoKey", "s3Key", "key", "Key"],
    )
    .or_else(|| extract::entry_reference(entry))?;
    let reference = StorageReference::classify(&raw)?;

    let file_name = extract::first_string(entry, &["fileName"])
        .unwrap_or_else(|| reference.file_name().to_string());

    let title =
        extract::first_string(entry, &["title", "name"]).unwrap_or_else(|| file_name.clone());

    // Catalog rows can point at thumbnails or stray objects; keep only
    // entries that look like media files.
    let gate = if file_name.is_empty() { &title } else { &file_name };
    if !is_media_file_name(gate) {
        return None;
    }

    let duration = entry
        .get("durationSeconds")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Some(AssetRecord {
        id: extract::first_string(entry, &["_id", "id"]).unwrap_or_else(|| raw.clone()),
        title,
        description: extract::first_string(entry, &["description"]).unwrap_or_default(),
        reference,
        thumbnail_url: extract::first_string(entry, &["thumbnailUrl", "thumbUrl", "thumbnail"]),
        duration_seconds: duration,
        tags: entry
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        is_active: entry
            .get("isActive")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

/// Best-effort record when the server does not echo one back: the patch
/// fields themselves, under the id that was patched.
fn patched_record(id: &str, patch: &AssetPatch) -> AssetRecord {
    let raw = patch.reference.clone().unwrap_or_default();
    AssetRecord {
        id: id.to_string(),
        title: patch.title.clone().unwrap_or_default(),
        description: patch.description.clone().unwrap_or_default(),
        reference: StorageReference::classify(&raw).unwrap_or(StorageReference::Key(raw)),
        thumbnail_url: None,
        duration_seconds: patch.duration_seconds.unwrap_or(0),
        tags: Vec::new(),
        is_active: true,
    }
}
