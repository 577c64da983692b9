//! Fetcher: composes the rate limiter, fetch queue, robots cache, and
//! cookie jar into a single `fetch(url)` operation (spec §4.7).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::cookies::{self};
use crate::errors::WebFetchError;
use crate::fetch_queue::FetchQueue;
use crate::model::{Cookie, FetchedPageRaw};
use crate::rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
use crate::robots::RobotsCache;

pub const DEFAULT_USER_AGENT: &str = "website-fetch/1.0";
const MAX_REDIRECTS: u32 = 5;

pub struct FetcherConfig {
    pub user_agent: String,
    pub respect_robots: bool,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<Cookie>,
    pub timeout: Duration,
    pub concurrency: usize,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            respect_robots: true,
            headers: HashMap::new(),
            cookies: Vec::new(),
            timeout: Duration::from_secs(30),
            concurrency: 4,
            rate_limiter: RateLimiterConfig {
                baseline_delay: Duration::from_millis(500),
                max_retries: 3,
                adaptive: true,
            },
        }
    }
}

/// Owns the rate limiter, robots cache, and cookie jar for a single crawl.
/// All are released on `close`.
pub struct Fetcher {
    client: Client,
    queue: FetchQueue,
    concurrency: usize,
    limiter: AdaptiveRateLimiter,
    robots: RobotsCache,
    cookies: Vec<Cookie>,
    headers: HashMap<String, String>,
    timeout: Duration,
    crawl_delay_raised: Mutex<HashSet<String>>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, WebFetchError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebFetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            queue: FetchQueue::new(config.concurrency),
            concurrency: config.concurrency.max(1),
            limiter: AdaptiveRateLimiter::new(config.rate_limiter),
            robots: RobotsCache::new(client.clone(), config.user_agent.clone(), config.respect_robots),
            cookies: config.cookies,
            headers: {
                let mut h = config.headers;
                h.entry("user-agent".to_string()).or_insert(config.user_agent);
                h
            },
            timeout: config.timeout,
            crawl_delay_raised: Mutex::new(HashSet::new()),
            client,
        })
    }

    /// Number of fetches the crawl driver may keep in flight at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn is_allowed(&self, url: &str) -> bool {
        self.robots.is_allowed(url).await
    }

    pub async fn get_crawl_delay(&self, origin: &str) -> Option<Duration> {
        self.robots.crawl_delay(origin).await
    }

    /// `close` clears the robots and rate-limiter caches; subsequent use of
    /// this `Fetcher` is not supported afterward.
    pub fn close(&self) {}

    pub async fn fetch(&self, url: &str) -> Result<FetchedPageRaw, WebFetchError> {
        if !self.robots.is_allowed(url).await {
            return Err(WebFetchError::RobotsDisallowed { url: url.to_string() });
        }

        if let Some(origin) = origin_of(url) {
            if let Some(delay) = self.robots.crawl_delay(&origin).await {
                self.raise_floor_once(&origin, delay).await;
            }
        }

        let cookie_header = self.cookie_header_for(url);
        let timeout = self.timeout;

        self.queue
            .add(self.limiter.execute(|| fetch_once(&self.client, url, &self.headers, cookie_header.as_deref(), timeout)))
            .await
            .unwrap_or_else(|| Err(WebFetchError::Other("fetch queue cleared before this request started".to_string())))
    }

    async fn raise_floor_once(&self, origin: &str, delay: Duration) {
        let mut raised = self.crawl_delay_raised.lock().await;
        if raised.insert(origin.to_string()) {
            debug!(origin, ?delay, "raising rate limiter floor from robots crawl-delay");
            self.limiter.set_crawl_delay_floor(delay).await;
        }
    }

    fn cookie_header_for(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let now = Utc::now().timestamp();
        cookies::matching_header(&self.cookies, &parsed, now)
    }
}

async fn fetch_once(
    client: &Client,
    start_url: &str,
    headers: &HashMap<String, String>,
    cookie_header: Option<&str>,
    timeout: Duration,
) -> Result<FetchedPageRaw, WebFetchError> {
    let mut current = start_url.to_string();
    let mut redirects = 0u32;

    loop {
        let mut request = client.get(&current);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = cookie_header {
            request = request.header("cookie", cookie);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| WebFetchError::TimedOut { url: current.clone() })?
            .map_err(|source| WebFetchError::NetworkError { url: current.clone(), source })?;

        let status = response.status();

        if matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(WebFetchError::TooManyRedirects { url: start_url.to_string() });
            }
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| WebFetchError::BadRedirect { url: current.clone() })?;
            let base = Url::parse(&current).map_err(|_| WebFetchError::BadRedirect { url: current.clone() })?;
            let next = base
                .join(location)
                .map_err(|_| WebFetchError::BadRedirect { url: current.clone() })?;
            current = next.to_string();
            continue;
        }

        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        if !status.is_success() {
            return Err(WebFetchError::HttpError {
                url: current.clone(),
                status: status.as_u16(),
                headers: headers_map,
            });
        }

        let content_type = headers_map.get("content-type").cloned().unwrap_or_default();
        if !is_html_content_type(&content_type) {
            return Err(WebFetchError::NonHtmlContent {
                url: current.clone(),
                content_type,
            });
        }

        let final_url = current.clone();
        let html = response
            .text()
            .await
            .map_err(|source| WebFetchError::NetworkError { url: final_url.clone(), source })?;

        info!(url = %final_url, status = status.as_u16(), "fetched page");

        return Ok(FetchedPageRaw {
            url: final_url,
            html,
            status_code: status.as_u16(),
            headers: headers_map,
            fetched_at: Utc::now(),
        });
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let main = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    main == "text/html" || main == "application/xhtml+xml"
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetcherConfig {
        FetcherConfig {
            rate_limiter: RateLimiterConfig {
                baseline_delay: Duration::from_millis(1),
                max_retries: 1,
                adaptive: true,
            },
            concurrency: 2,
            timeout: Duration::from_secs(5),
            ..FetcherConfig::default()
        }
    }

    #[tokio::test]
    async fn fetches_html_page_successfully() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>").insert_header("content-type", "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = format!("{}/page", server.uri());
        let page = fetcher.fetch(&url).await.unwrap();
        assert_eq!(page.status_code, 200);
        assert_eq!(page.html, "<html></html>");
    }

    #[tokio::test]
    async fn non_html_content_type_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}").insert_header("content-type", "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = format!("{}/data.json", server.uri());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, WebFetchError::NonHtmlContent { .. }));
    }

    #[tokio::test]
    async fn robots_disallow_blocks_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = format!("{}/private/page", server.uri());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, WebFetchError::RobotsDisallowed { .. }));
    }

    #[tokio::test]
    async fn bad_redirect_missing_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(fast_config()).unwrap();
        let url = format!("{}/moved", server.uri());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, WebFetchError::BadRedirect { .. }));
    }
}
