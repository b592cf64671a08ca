use super::{http_client, AccessToken};
use crate::config::Config;
use crate::store::{apply_query, valid_key, CasOutcome, Database, DbError, Filter, Query, Version};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Map, Value};
use tracing::debug;

const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

/// Realtime Database over its REST API (`{url}/{path}.json`)
pub struct RealtimeDatabase {
    http: reqwest::Client,
    base_url: Url,
    access_token: Option<AccessToken>,
}

impl RealtimeDatabase {
    /// Fails when `base_url` is not an absolute URL
    pub fn new(base_url: &str, config: &Config) -> Result<Self, DbError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| DbError::InvalidPath(base_url.to_string()))?;
        Ok(Self {
            http: http_client(config.remote_timeout),
            base_url,
            access_token: AccessToken::from_config(config),
        })
    }

    /// `{base}/{segments}.json` with every segment percent-encoded
    fn url(&self, path: &str) -> Result<Url, DbError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if !segments.iter().all(|s| valid_key(s)) {
            return Err(DbError::InvalidPath(path.to_string()));
        }

        let mut url = self.base_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|()| DbError::InvalidPath(path.to_string()))?;
            parts.pop_if_empty();
            match segments.split_last() {
                Some((last, parents)) => {
                    parts.extend(parents);
                    parts.push(&format!("{last}.json"));
                }
                None => {
                    parts.push(".json");
                }
            }
        }
        Ok(url)
    }

    async fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, DbError> {
        let Some(source) = &self.access_token else {
            return Ok(request);
        };
        let token = source
            .current()
            .await
            .map_err(|e| DbError::Remote(e.to_string()))?;
        Ok(request.bearer_auth(token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, DbError> {
        self.authed(request)
            .await?
            .send()
            .await
            .map_err(|e| DbError::Remote(e.to_string()))
    }
}

async fn expect_success(response: Response) -> Result<Response, DbError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(DbError::Remote(format!("{status}: {}", detail.trim())))
}

async fn json_body(response: Response) -> Result<Value, DbError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| DbError::Remote(e.to_string()))
}

fn etag(response: &Response) -> Result<Version, DbError> {
    response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| Version(v.to_string()))
        .ok_or_else(|| DbError::Remote("missing ETag header".to_string()))
}

fn query_params(query: &Query) -> Vec<(&'static str, String)> {
    let mut params = vec![("orderBy", Value::from(query.order_by.as_str()).to_string())];
    match &query.filter {
        Some(Filter::EqualTo(v)) => params.push(("equalTo", v.to_string())),
        Some(Filter::StartAt(v)) => params.push(("startAt", v.to_string())),
        None => {}
    }
    if let Some(limit) = query.limit {
        params.push(("limitToFirst", limit.to_string()));
    }
    params
}

#[async_trait]
impl Database for RealtimeDatabase {
    async fn get(&self, path: &str) -> Result<Option<Value>, DbError> {
        let response = expect_success(self.execute(self.http.get(self.url(path)?)).await?).await?;
        let value = json_body(response).await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), DbError> {
        let request = self.http.put(self.url(path)?).json(&value);
        expect_success(self.execute(request).await?).await?;
        debug!(path, "PUT");
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), DbError> {
        let request = self.http.patch(self.url(path)?).json(&fields);
        expect_success(self.execute(request).await?).await?;
        debug!(path, "PATCH");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DbError> {
        expect_success(self.execute(self.http.delete(self.url(path)?)).await?).await?;
        debug!(path, "DELETE");
        Ok(())
    }

    async fn query(&self, path: &str, query: &Query) -> Result<Vec<(String, Value)>, DbError> {
        let request = self.http.get(self.url(path)?).query(&query_params(query));
        let response = expect_success(self.execute(request).await?).await?;
        match json_body(response).await? {
            // Results arrive as an unordered object; order them the same way the server did
            Value::Object(children) => Ok(apply_query(children, query)),
            _ => Ok(vec![]),
        }
    }

    async fn get_versioned(&self, path: &str) -> Result<(Option<Value>, Version), DbError> {
        let request = self
            .http
            .get(self.url(path)?)
            .header(ETAG_REQUEST_HEADER, "true");
        let response = expect_success(self.execute(request).await?).await?;
        let version = etag(&response)?;
        let value = json_body(response).await?;
        Ok(((!value.is_null()).then_some(value), version))
    }

    async fn set_if(
        &self,
        path: &str,
        value: Value,
        expected: &Version,
    ) -> Result<CasOutcome, DbError> {
        let if_match = HeaderValue::from_str(&expected.0)
            .map_err(|_| DbError::Remote("ETag is not a valid header value".to_string()))?;
        let request = self
            .http
            .put(self.url(path)?)
            .header(reqwest::header::IF_MATCH, if_match)
            .json(&value);
        let response = self.execute(request).await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(CasOutcome::Stale);
        }
        expect_success(response).await?;
        Ok(CasOutcome::Committed)
    }
}
