//! HTTP(S) protocol backend.
//!
//! Directory listings come from the provider's index pages (`href`
//! scraping); fetches stream the response body straight to disk.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::protocol::RemoteProtocol;
use crate::{Result, WalkerError};

/// HTTP-backed remote source rooted at a base URL.
pub struct HttpSource {
    base_url: String,
    client: Option<Client>,
    request_timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: None,
            request_timeout: Duration::from_secs(600),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(WalkerError::NotConnected)
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }
}

fn status_err(url: &str, status: StatusCode) -> WalkerError {
    match status {
        StatusCode::NOT_FOUND => WalkerError::PathNotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            WalkerError::Auth(format!("{url}: {status}"))
        }
        status => WalkerError::Connection(format!("{url}: {status}")),
    }
}

/// Pull entry names out of an HTML index page.
///
/// Navigation links (parent directory, query links, absolute URLs) are
/// skipped; a trailing slash marks a subdirectory and is stripped.
fn parse_index(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    for chunk in body.split("href=\"").skip(1) {
        let Some(end) = chunk.find('"') else { continue };
        let target = &chunk[..end];
        if target.is_empty()
            || target.starts_with('?')
            || target.starts_with('/')
            || target.starts_with("..")
            || target.contains("://")
        {
            continue;
        }
        let name = target.trim_end_matches('/');
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[async_trait]
impl RemoteProtocol for HttpSource {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WalkerError::Connection(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let url = self.url_for(path);
        let response = self
            .client()?
            .get(&url)
            .send()
            .await
            .map_err(|e| WalkerError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_err(&url, response.status()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WalkerError::Connection(e.to_string()))?;

        let names = parse_index(&body);
        debug!(url = %url, count = names.len(), "listed index page");
        Ok(names)
    }

    async fn fetch(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let url = self.url_for(remote_path);
        let response = self
            .client()?
            .get(&url)
            .send()
            .await
            .map_err(|e| WalkerError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_err(&url, response.status()));
        }

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| WalkerError::Connection(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_page() {
        let body = r#"
            <html><body>
            <a href="../">Parent Directory</a>
            <a href="?C=N;O=D">Name</a>
            <a href="2004/">2004/</a>
            <a href="2005/">2005/</a>
            <a href="rfe2004_02-dk1.tif">rfe2004_02-dk1.tif</a>
            <a href="https://example.org/elsewhere">off-site</a>
            </body></html>
        "#;
        assert_eq!(
            parse_index(body),
            vec!["2004", "2005", "rfe2004_02-dk1.tif"]
        );
    }

    #[test]
    fn test_url_join() {
        let source = HttpSource::new("https://data.example.org/tamsat/");
        assert_eq!(
            source.url_for("2004/rfe.tif"),
            "https://data.example.org/tamsat/2004/rfe.tif"
        );
        assert_eq!(source.url_for(""), "https://data.example.org/tamsat");
    }
}
