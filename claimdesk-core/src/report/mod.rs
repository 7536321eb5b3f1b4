//! Report renderer.
//!
//! `render(session)` fetches the session's photos concurrently (each under
//! the configured timeout), lays the report out and serializes it to PDF.
//! A photo that fails to fetch or decode is logged and left out of the grid;
//! only a failure to build the document itself is an error.

pub mod images;
pub mod layout;
pub mod pdf;
pub mod text;

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ReportConfig;
use crate::models::Session;
use crate::object_store::ObjectStore;

pub use images::DecodedImage;
pub use layout::{Branding, Geometry, Layout, OutlineItem, ReportInput};

pub const REPORT_CONTENT_TYPE: &str = "application/pdf";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("PDF construction failed: {0}")]
    Pdf(String),

    #[error("inconsistent layout: {0}")]
    Layout(String),
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub bytes: Bytes,
    pub layout: Layout,
    /// Image references that could not be fetched or decoded
    pub skipped_images: Vec<String>,
}

impl RenderedReport {
    pub fn outline(&self) -> &[OutlineItem] {
        self.layout.outline()
    }
}

pub struct ReportRenderer {
    images: Arc<dyn ObjectStore>,
    fetch_timeout: Duration,
    max_image_edge: u32,
    branding: Branding,
    geometry: Geometry,
}

impl ReportRenderer {
    pub fn new(images: Arc<dyn ObjectStore>, config: &ReportConfig) -> Self {
        Self {
            images,
            fetch_timeout: config.image_fetch_timeout(),
            max_image_edge: config.max_image_edge,
            branding: Branding {
                organization: config.organization.clone(),
                brand: config.brand.clone(),
                contact: config.contact.clone(),
            },
            geometry: Geometry::a4(),
        }
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    async fn fetch_one(&self, reference: &str) -> Result<DecodedImage, String> {
        let bytes = tokio::time::timeout(self.fetch_timeout, self.images.get(reference))
            .await
            .map_err(|_| format!("timed out after {:?}", self.fetch_timeout))?
            .map_err(|e| e.to_string())?;
        images::decode(&bytes, self.max_image_edge).map_err(|e| e.to_string())
    }

    /// Fetch every reference concurrently, keeping order and dropping failures.
    pub async fn fetch_images(&self, refs: &[String]) -> (Vec<DecodedImage>, Vec<String>) {
        let results = join_all(refs.iter().map(|r| self.fetch_one(r))).await;

        let mut decoded = Vec::with_capacity(refs.len());
        let mut skipped = Vec::new();
        for (reference, result) in refs.iter().zip(results) {
            match result {
                Ok(image) => decoded.push(image),
                Err(reason) => {
                    tracing::warn!(image = %reference, reason = %reason, "Skipping report image");
                    skipped.push(reference.clone());
                }
            }
        }
        (decoded, skipped)
    }

    /// Lay out without fetching anything, from known image sizes.
    pub fn layout(&self, session: &Session, image_sizes: &[(u32, u32)]) -> Layout {
        let input = ReportInput {
            session_id: session.id,
            customer_name: &session.contact.name,
            result: &session.result,
            images: image_sizes,
        };
        layout::lay_out(&input, &self.branding, self.geometry)
    }

    pub async fn render(&self, session: &Session) -> Result<RenderedReport, RenderError> {
        let (decoded, skipped_images) = self.fetch_images(&session.image_refs).await;
        let sizes: Vec<(u32, u32)> = decoded.iter().map(DecodedImage::size).collect();

        let layout = self.layout(session, &sizes);
        let bytes = pdf::write_pdf(&layout, &decoded)?;

        tracing::info!(
            session_id = %session.id,
            pages = layout.page_count(),
            images = layout.images_placed(),
            skipped = skipped_images.len(),
            size = bytes.len(),
            "Report rendered"
        );

        Ok(RenderedReport {
            bytes: Bytes::from(bytes),
            layout,
            skipped_images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_session;
    use crate::models::InsuranceLikelihood;
    use crate::object_store::{HttpObjectStore, InMemoryObjectStore};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(timeout_secs: u64) -> ReportConfig {
        ReportConfig {
            image_fetch_timeout_secs: timeout_secs,
            ..ReportConfig::default()
        }
    }

    async fn memory_images(count: usize) -> (Arc<InMemoryObjectStore>, Vec<String>) {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut refs = Vec::new();
        for i in 0..count {
            let r = store
                .put(
                    &format!("images/{}.png", i),
                    Bytes::from(images::encode_png(40 + i as u32 * 10, 30)),
                    "image/png",
                )
                .await
                .unwrap();
            refs.push(r.into_string());
        }
        (store, refs)
    }

    // ========================================================================
    // TEST 1: rendering twice gives the same structure
    // ========================================================================
    #[tokio::test]
    async fn test_render_is_structurally_idempotent() {
        let (store, refs) = memory_images(3).await;
        let renderer = ReportRenderer::new(store, &config(5));
        let mut session = sample_session("1234");
        session.image_refs = refs;

        let first = renderer.render(&session).await.unwrap();
        let second = renderer.render(&session).await.unwrap();

        assert_eq!(first.outline(), second.outline());
        assert_eq!(first.layout.images_placed(), 3);
        assert!(first.skipped_images.is_empty());
        let doc = lopdf::Document::load_mem(&first.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), first.layout.page_count());
    }

    // ========================================================================
    // TEST 2: a 404 and a slow image are skipped, the rest still placed
    // ========================================================================
    #[tokio::test]
    async fn test_failed_images_are_skipped() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object/public/images/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(images::encode_png(64, 48)))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/object/public/images/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(images::encode_png(64, 48))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let store = Arc::new(HttpObjectStore::new(mock_server.uri(), "key".into()).unwrap());
        let renderer = ReportRenderer::new(store.clone(), &config(1));
        let mut session = sample_session("1234");
        session.image_refs = vec![
            store.public_url("images/ok.png"),
            store.public_url("images/missing.png"),
            store.public_url("images/slow.png"),
        ];

        let report = renderer.render(&session).await.unwrap();
        assert_eq!(report.layout.images_placed(), 1);
        assert_eq!(report.skipped_images.len(), 2);
    }

    // ========================================================================
    // TEST 3: likelihood decides the branch
    // ========================================================================
    #[tokio::test]
    async fn test_branch_follows_likelihood() {
        let (store, _) = memory_images(0).await;
        let renderer = ReportRenderer::new(store, &config(5));

        for likelihood in [
            InsuranceLikelihood::High,
            InsuranceLikelihood::Medium,
            InsuranceLikelihood::Low,
            InsuranceLikelihood::None,
        ] {
            let mut session = sample_session("1234");
            session.result.insurance_likelihood = likelihood;
            let report = renderer.render(&session).await.unwrap();
            let headings = report.layout.headings();

            let none_branch = headings.contains(&layout::NO_DAMAGE_HEADING);
            assert_eq!(none_branch, likelihood == InsuranceLikelihood::None);
            for section in layout::DAMAGE_SECTIONS {
                assert_eq!(headings.contains(&section), !none_branch, "{}", section);
            }
        }
    }
}
