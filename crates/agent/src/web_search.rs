//! `WebSearchProvider` null implementation. `web_search` reports an empty
//! result set instead of failing the run; a real client can implement the
//! same trait without touching the dispatcher or tool handler.

use sa_engine_domain::Result;
use sa_engine_tools::WebSearchProvider;

pub struct NullWebSearchProvider;

#[async_trait::async_trait]
impl WebSearchProvider for NullWebSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        tracing::warn!(query, "web_search called with no search provider configured; returning no results");
        Ok(Vec::new())
    }
}
