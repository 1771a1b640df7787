//! Content source: the external fetch capability the worker invokes
//!
//! The source is an opaque, possibly slow, possibly failing collaborator. The
//! trait boundary carries a typed error the worker classifies as transient
//! (retried via queue redelivery) or permanent (terminal). The bundled
//! [`HttpContentSource`] speaks a small JSON contract; site-specific parsing
//! stays behind whatever serves that contract.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::SourceConfig;
use crate::error::{Error, Result, SourceError};
use crate::types::DownloadOptions;

/// One fetch request handed to the source
#[derive(Clone, Copy, Debug)]
pub struct FetchRequest<'a> {
    /// Work to download
    pub work_id: &'a str,
    /// Chapter bounds and refresh flag
    pub options: &'a DownloadOptions,
}

/// A single fetched chapter
#[derive(Clone, Debug, Deserialize)]
pub struct Chapter {
    /// 1-based chapter number
    pub number: u32,
    /// Chapter heading
    pub title: String,
    /// Chapter text
    pub body: String,
}

/// A fully fetched work, ready to be assembled into an artifact
#[derive(Clone, Debug)]
pub struct DownloadedWork {
    /// Work identifier
    pub work_id: String,
    /// Work title
    pub title: String,
    /// Author name
    pub author: String,
    /// Chapters in the requested range, in order
    pub chapters: Vec<Chapter>,
}

impl DownloadedWork {
    /// Assemble the plain-text artifact: a banner header followed by one
    /// banner block per chapter
    pub fn into_text(self) -> String {
        const BANNER: &str = "===============================================\n";

        let mut out = String::new();
        out.push_str(BANNER);
        out.push_str(&self.title);
        out.push('\n');
        out.push_str(BANNER);
        out.push('\n');
        out.push_str(&format!("Work ID: {}\n", self.work_id));
        out.push_str(&format!("Author: {}\n", self.author));
        out.push_str(&format!("Chapters: {}\n", self.chapters.len()));
        out.push('\n');

        for chapter in &self.chapters {
            out.push_str(BANNER);
            out.push_str(&format!("Chapter {} - {}\n", chapter.number, chapter.title));
            out.push_str(BANNER);
            out.push('\n');
            out.push_str(&chapter.body);
            out.push_str("\n\n");
        }

        out
    }
}

/// External content fetch capability
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the requested work and chapter range
    async fn fetch(&self, request: FetchRequest<'_>) -> std::result::Result<DownloadedWork, SourceError>;
}

#[derive(Debug, Deserialize)]
struct WorkInfo {
    title: String,
    #[serde(default)]
    author: String,
    chapter_count: u32,
}

/// HTTP implementation of [`ContentSource`]
///
/// Contract:
/// - `GET {base}/works/{work_id}` → `{"title", "author", "chapter_count"}`
/// - `GET {base}/works/{work_id}/chapters/{n}` → `{"number", "title", "body"}`
#[derive(Debug)]
pub struct HttpContentSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpContentSource {
    /// Build a source from configuration
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Validation {
            message: format!("source.base_url is not a valid URL: {e}"),
            field: Some("source.base_url"),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Source(SourceError::Network(e)))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SourceError::Malformed {
                    work_id: String::new(),
                    reason: "source base URL cannot be a base".into(),
                })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Map a non-success HTTP status to the failure taxonomy
    fn classify_status(work_id: &str, response: &reqwest::Response) -> Option<SourceError> {
        let status = response.status();
        if status.is_success() {
            return None;
        }
        Some(match status.as_u16() {
            404 => SourceError::WorkNotFound {
                work_id: work_id.into(),
            },
            410 => SourceError::Gone {
                work_id: work_id.into(),
            },
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                SourceError::RateLimited { retry_after_secs }
            }
            status => SourceError::Upstream { status },
        })
    }

    async fn fetch_info(&self, work_id: &str) -> std::result::Result<WorkInfo, SourceError> {
        let url = self.endpoint(&["works", work_id])?;
        let response = self.client.get(url).send().await?;
        if let Some(err) = Self::classify_status(work_id, &response) {
            return Err(err);
        }
        response.json().await.map_err(|e| SourceError::Malformed {
            work_id: work_id.into(),
            reason: format!("work info did not parse: {e}"),
        })
    }

    async fn fetch_chapter(
        &self,
        work_id: &str,
        number: u32,
    ) -> std::result::Result<Chapter, SourceError> {
        let url = self.endpoint(&["works", work_id, "chapters", &number.to_string()])?;
        let response = self.client.get(url).send().await?;
        if let Some(err) = Self::classify_status(work_id, &response) {
            // A chapter the source's own count promised us is missing: that's
            // malformed content, not a missing work
            return Err(match err {
                SourceError::WorkNotFound { .. } => SourceError::Malformed {
                    work_id: work_id.into(),
                    reason: format!("chapter {number} missing despite advertised count"),
                },
                other => other,
            });
        }
        response.json().await.map_err(|e| SourceError::Malformed {
            work_id: work_id.into(),
            reason: format!("chapter {number} did not parse: {e}"),
        })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
    ) -> std::result::Result<DownloadedWork, SourceError> {
        let work_id = request.work_id;
        let info = self.fetch_info(work_id).await?;

        let start = request.options.start_chapter.unwrap_or(1).max(1);
        let end = request
            .options
            .end_chapter
            .map_or(info.chapter_count, |e| e.min(info.chapter_count));

        if start > info.chapter_count {
            return Err(SourceError::ChapterOutOfRange {
                work_id: work_id.into(),
                available: info.chapter_count,
                requested: start,
            });
        }

        tracing::debug!(
            work_id,
            title = %info.title,
            start,
            end,
            "Fetching chapter range"
        );

        let mut chapters = Vec::with_capacity((end.saturating_sub(start) + 1) as usize);
        for number in start..=end {
            chapters.push(self.fetch_chapter(work_id, number).await?);
        }

        Ok(DownloadedWork {
            work_id: work_id.to_string(),
            title: info.title,
            author: info.author,
            chapters,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer) -> HttpContentSource {
        HttpContentSource::new(&SourceConfig {
            base_url: server.uri(),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    fn info_body(title: &str, chapter_count: u32) -> serde_json::Value {
        serde_json::json!({
            "title": title,
            "author": "Test Author",
            "chapter_count": chapter_count,
        })
    }

    fn chapter_body(number: u32) -> serde_json::Value {
        serde_json::json!({
            "number": number,
            "title": format!("Chapter Title {number}"),
            "body": format!("Body of chapter {number}."),
        })
    }

    async fn mount_work(server: &MockServer, work_id: &str, chapters: u32) {
        Mock::given(method("GET"))
            .and(path(format!("/works/{work_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(info_body("A Novel", chapters)))
            .mount(server)
            .await;
        for n in 1..=chapters {
            Mock::given(method("GET"))
                .and(path(format!("/works/{work_id}/chapters/{n}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(chapter_body(n)))
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn fetches_all_chapters_by_default() {
        let server = MockServer::start().await;
        mount_work(&server, "n4830bu", 3).await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let work = source
            .fetch(FetchRequest {
                work_id: "n4830bu",
                options: &options,
            })
            .await
            .unwrap();

        assert_eq!(work.title, "A Novel");
        assert_eq!(work.chapters.len(), 3);
        assert_eq!(work.chapters[0].number, 1);
        assert_eq!(work.chapters[2].number, 3);
    }

    #[tokio::test]
    async fn honors_chapter_range_and_clamps_the_end() {
        let server = MockServer::start().await;
        mount_work(&server, "n4830bu", 5).await;
        let source = source_for(&server);

        let options = DownloadOptions {
            start_chapter: Some(2),
            end_chapter: Some(99),
            force_update: false,
        };
        let work = source
            .fetch(FetchRequest {
                work_id: "n4830bu",
                options: &options,
            })
            .await
            .unwrap();

        let numbers: Vec<u32> = work.chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![2, 3, 4, 5], "end bound must clamp to the real count");
    }

    #[tokio::test]
    async fn start_past_the_last_chapter_is_a_permanent_error() {
        let server = MockServer::start().await;
        mount_work(&server, "n4830bu", 2).await;
        let source = source_for(&server);

        let options = DownloadOptions {
            start_chapter: Some(10),
            ..DownloadOptions::default()
        };
        let err = source
            .fetch(FetchRequest {
                work_id: "n4830bu",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::ChapterOutOfRange { available: 2, requested: 10, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_work_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/nowhere"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "nowhere",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::WorkNotFound { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn gone_work_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/removed"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "removed",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Gone { .. }));
    }

    #[tokio::test]
    async fn rate_limiting_is_transient_and_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "busy",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SourceError::RateLimited {
                retry_after_secs: Some(120)
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn upstream_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "flaky",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Upstream { status: 503 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn missing_promised_chapter_is_malformed_not_missing_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/n4830bu"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info_body("A Novel", 2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/n4830bu/chapters/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chapter_body(1)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works/n4830bu/chapters/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "n4830bu",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unparsable_info_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let source = source_for(&server);

        let options = DownloadOptions::default();
        let err = source
            .fetch(FetchRequest {
                work_id: "garbled",
                options: &options,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn text_assembly_contains_header_and_all_chapters() {
        let work = DownloadedWork {
            work_id: "n4830bu".into(),
            title: "A Novel".into(),
            author: "Test Author".into(),
            chapters: vec![
                Chapter {
                    number: 1,
                    title: "Beginnings".into(),
                    body: "Once upon a time.".into(),
                },
                Chapter {
                    number: 2,
                    title: "Middles".into(),
                    body: "And then.".into(),
                },
            ],
        };

        let text = work.into_text();
        assert!(text.contains("A Novel"));
        assert!(text.contains("Work ID: n4830bu"));
        assert!(text.contains("Chapter 1 - Beginnings"));
        assert!(text.contains("Chapter 2 - Middles"));
        assert!(text.contains("Once upon a time."));
        let first = text.find("Chapter 1").unwrap();
        let second = text.find("Chapter 2").unwrap();
        assert!(first < second, "chapters must appear in order");
    }

    #[test]
    fn invalid_base_url_is_a_config_validation_error() {
        let err = HttpContentSource::new(&SourceConfig {
            base_url: "not a url".into(),
            ..SourceConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
