//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Snapshot cache shared by the scrape and push paths."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use async_trait::async_trait;
use nls_cls::{ClsClient, Snapshot};

/// Source of complete snapshots. Implementations must not return partial
/// results.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Produce one fresh snapshot or fail.
    async fn fetch_snapshot(&self) -> anyhow::Result<Snapshot>;
}

#[async_trait]
impl SnapshotFetcher for ClsClient {
    async fn fetch_snapshot(&self) -> anyhow::Result<Snapshot> {
        Ok(ClsClient::fetch_snapshot(self).await?)
    }
}
