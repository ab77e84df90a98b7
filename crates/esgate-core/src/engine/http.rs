//! # HTTP Engine
//!
//! [`SearchEngine`] over the engine's REST API.

use super::{EngineError, SearchEngine, SearchRequest, SearchResponse};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

/// HTTP client for an Elasticsearch-compatible cluster.
#[derive(Clone)]
pub struct HttpEngine {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::ConnectionFailed(format!("{base_url}: {e}")))?;
        Ok(Self { http, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/{index}[/{type}]/_search`
    fn search_path(request: &SearchRequest) -> String {
        match &request.doc_type {
            Some(doc_type) => format!("/{}/{}/_search", request.index, doc_type),
            None => format!("/{}/_search", request.index),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http.request(method, &url)
    }

    /// Query parameters for a search: the sort tokens and an optional scroll TTL.
    fn search_params(request: &SearchRequest, scroll: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !request.sort.is_empty() {
            params.push(("sort", request.sort.join(",")));
        }
        if let Some(ttl) = scroll {
            params.push(("scroll", ttl.to_string()));
        }
        params
    }

    /// Send a request and handle connection errors.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, EngineError> {
        req.send()
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("{}: {e}", self.base_url)))
    }

    /// Check the status code and parse the JSON body.
    async fn handle_response(&self, resp: reqwest::Response) -> Result<Value, EngineError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Server {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))
    }

    async fn run_search(
        &self,
        request: &SearchRequest,
        scroll: Option<&str>,
    ) -> Result<SearchResponse, EngineError> {
        tracing::debug!(
            index = %request.index,
            body = %request.body,
            sort = ?request.sort,
            "dispatching search"
        );
        let req = self
            .request(reqwest::Method::POST, &Self::search_path(request))
            .query(&Self::search_params(request, scroll))
            .json(&request.body);
        let resp = self.send(req).await?;
        parse_search(self.handle_response(resp).await?)
    }
}

fn parse_search(raw: Value) -> Result<SearchResponse, EngineError> {
    serde_json::from_value(raw).map_err(|e| EngineError::Parse(e.to_string()))
}

#[async_trait]
impl SearchEngine for HttpEngine {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, EngineError> {
        self.run_search(request, None).await
    }

    async fn open_scroll(
        &self,
        request: &SearchRequest,
        ttl: &str,
    ) -> Result<SearchResponse, EngineError> {
        self.run_search(request, Some(ttl)).await
    }

    async fn scroll(&self, scroll_id: &str, ttl: &str) -> Result<SearchResponse, EngineError> {
        let body = json!({ "scroll": ttl, "scroll_id": scroll_id });
        let req = self
            .request(reqwest::Method::POST, "/_search/scroll")
            .json(&body);
        let resp = self.send(req).await?;
        parse_search(self.handle_response(resp).await?)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<(), EngineError> {
        let body = json!({ "scroll_id": [scroll_id] });
        let req = self
            .request(reqwest::Method::DELETE, "/_search/scroll")
            .json(&body);
        let resp = self.send(req).await?;
        self.handle_response(resp).await.map(|_| ())
    }

    async fn get_mapping(&self, index: &str, doc_type: &str) -> Result<Value, EngineError> {
        let req = self.request(
            reqwest::Method::GET,
            &format!("/{index}/_mapping/{doc_type}"),
        );
        let resp = self.send(req).await?;
        self.handle_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let engine =
            HttpEngine::new("http://localhost:9200/", Duration::from_secs(5)).expect("client");
        assert_eq!(engine.base_url(), "http://localhost:9200");
    }

    #[test]
    fn search_path_with_and_without_type() {
        let typed = SearchRequest::new("subject", Some("subject".into()), json!({}));
        assert_eq!(HttpEngine::search_path(&typed), "/subject/subject/_search");
        let untyped = SearchRequest::new("config", None, json!({}));
        assert_eq!(HttpEngine::search_path(&untyped), "/config/_search");
    }

    #[test]
    fn sort_tokens_become_one_query_parameter() {
        let req = SearchRequest::new("s", None, json!({}))
            .with_sort(vec!["age:asc".into(), "name:desc".into()]);
        assert_eq!(
            HttpEngine::search_params(&req, Some("1m")),
            vec![
                ("sort", "age:asc,name:desc".to_string()),
                ("scroll", "1m".to_string())
            ]
        );
        assert!(HttpEngine::search_params(&SearchRequest::new("s", None, json!({})), None).is_empty());
    }
}
