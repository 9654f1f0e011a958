//! robots.txt policy fetching, caching, and evaluation.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use regex::Regex;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

/// Maximum number of origins whose policies are kept in memory.
pub const POLICY_CACHE_CAPACITY: usize = 128;

// ---------------------------------------------------------------------------
// RobotsPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    /// Original pattern length, used for longest-match precedence.
    specificity: usize,
    matcher: Regex,
}

impl Rule {
    fn new(allow: bool, pattern: &str) -> Option<Self> {
        let (body, anchored) = match pattern.strip_suffix('$') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        let mut expr = String::from("^");
        expr.push_str(&regex::escape(body).replace(r"\*", ".*"));
        if anchored {
            expr.push('$');
        }
        let matcher = Regex::new(&expr).ok()?;
        Some(Self {
            allow,
            specificity: pattern.len(),
            matcher,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct AgentGroup {
    /// Lowercased user-agent tokens this group applies to.
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt rules for one origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: Vec<AgentGroup>,
    deny_all: bool,
}

impl RobotsPolicy {
    /// Policy that permits every path.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Policy that refuses every path (used for 401/403 responses).
    pub fn deny_all() -> Self {
        Self {
            groups: Vec::new(),
            deny_all: true,
        }
    }

    /// Parse robots.txt content. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut current = AgentGroup::default();
        // A user-agent line after rules starts a new group.
        let mut collecting_agents = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !collecting_agents && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    collecting_agents = true;
                }
                "allow" | "disallow" => {
                    collecting_agents = false;
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(rule) = Rule::new(key == "allow", value) {
                        current.rules.push(rule);
                    }
                }
                "crawl-delay" => {
                    collecting_agents = false;
                    match value.parse::<f64>() {
                        Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                            current.crawl_delay = Some(Duration::from_secs_f64(secs));
                        }
                        _ => debug!(value, "ignoring invalid crawl-delay"),
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self {
            groups,
            deny_all: false,
        }
    }

    /// Group for `user_agent`: a named group containing its product token, else `*`.
    fn group_for(&self, user_agent: &str) -> Option<&AgentGroup> {
        let token = product_token(user_agent);
        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && token.contains(a.as_str())))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }

    /// Whether `user_agent` may fetch `path` (path plus optional query).
    ///
    /// The longest matching pattern wins; `Allow` wins a tie.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if self.deny_all {
            return false;
        }
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let mut best: Option<&Rule> = None;
        for rule in group.rules.iter().filter(|r| r.matcher.is_match(path)) {
            best = match best {
                Some(b) if b.specificity > rule.specificity => Some(b),
                Some(b) if b.specificity == rule.specificity && b.allow => Some(b),
                _ => Some(rule),
            };
        }
        best.is_none_or(|r| r.allow)
    }

    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent).and_then(|g| g.crawl_delay)
    }
}

/// Lowercased product name of a user agent, e.g. `trendscout` for `TrendScout/0.1`.
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or(user_agent)
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// PolitenessChecker
// ---------------------------------------------------------------------------

/// Fetches and caches robots.txt policies per origin.
///
/// Unreachable or erroring robots.txt is treated as permissive, except for
/// 401/403 which disallow the whole origin.
pub struct PolitenessChecker {
    client: Client,
    user_agent: String,
    respect_robots: bool,
    cache: parking_lot::Mutex<LruCache<String, Arc<RobotsPolicy>>>,
}

impl PolitenessChecker {
    pub fn new(client: Client, user_agent: impl Into<String>, respect_robots: bool) -> Self {
        let capacity = NonZeroUsize::new(POLICY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            user_agent: user_agent.into(),
            respect_robots,
            cache: parking_lot::Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether the configured agent may fetch `url`.
    pub async fn can_fetch(&self, url: &str) -> bool {
        if !self.respect_robots {
            return true;
        }
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(policy) = self.policy_for(&parsed).await else {
            return true;
        };

        let path = match parsed.query() {
            Some(q) => format!("{}?{q}", parsed.path()),
            None => parsed.path().to_string(),
        };
        let allowed = policy.is_allowed(&self.user_agent, &path);
        if allowed {
            debug!(%url, "robots.txt allows fetch");
        } else {
            warn!(%url, "robots.txt disallows fetch");
        }
        allowed
    }

    /// Crawl delay the origin declares for the configured agent.
    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        if !self.respect_robots {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let delay = self.policy_for(&parsed).await?.crawl_delay(&self.user_agent);
        if let Some(d) = delay {
            debug!(%url, delay_ms = d.as_millis() as u64, "robots.txt crawl delay");
        }
        delay
    }

    /// Number of origins currently cached.
    pub fn cached_origins(&self) -> usize {
        self.cache.lock().len()
    }

    async fn policy_for(&self, url: &Url) -> Option<Arc<RobotsPolicy>> {
        let origin = origin_of(url)?;
        if let Some(policy) = self.cache.lock().get(&origin) {
            return Some(Arc::clone(policy));
        }

        let policy = Arc::new(self.fetch_policy(&origin).await);
        self.remember(origin, Arc::clone(&policy));
        Some(policy)
    }

    fn remember(&self, origin: String, policy: Arc<RobotsPolicy>) {
        if let Some((evicted, _)) = self.cache.lock().push(origin, policy) {
            debug!(origin = %evicted, "evicted robots.txt policy");
        }
    }

    async fn fetch_policy(&self, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{origin}/robots.txt");
        let response = match self.client.get(&robots_url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %robots_url, error = %e, "failed to load robots.txt");
                info!(%origin, "assuming crawling is allowed");
                return RobotsPolicy::allow_all();
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(url = %robots_url, %status, "robots.txt access refused, disallowing origin");
            return RobotsPolicy::deny_all();
        }
        if !status.is_success() {
            info!(url = %robots_url, %status, "no usable robots.txt, assuming crawling is allowed");
            return RobotsPolicy::allow_all();
        }

        match response.text().await {
            Ok(body) => {
                info!(url = %robots_url, "loaded robots.txt");
                RobotsPolicy::parse(&body)
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "failed to read robots.txt body");
                RobotsPolicy::allow_all()
            }
        }
    }
}

/// `<scheme>://<host>[:port]` for http(s) URLs.
fn origin_of(url: &Url) -> Option<String> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const UA: &str = "TrendScout/0.1";

    fn checker() -> PolitenessChecker {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        PolitenessChecker::new(client, UA, true)
    }

    #[test]
    fn parse_basic_rules() {
        let policy = RobotsPolicy::parse(
            r#"
User-agent: *
Allow: /
Disallow: /admin
Disallow: /private/
Crawl-delay: 1.5
"#,
        );
        assert!(policy.is_allowed(UA, "/"));
        assert!(policy.is_allowed(UA, "/trending?since=daily"));
        assert!(!policy.is_allowed(UA, "/admin/settings"));
        assert!(!policy.is_allowed(UA, "/private/data"));
        assert_eq!(policy.crawl_delay(UA), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn longest_match_wins() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /api/\nAllow: /api/public/\n",
        );
        assert!(!policy.is_allowed(UA, "/api/secret"));
        assert!(policy.is_allowed(UA, "/api/public/docs"));
    }

    #[test]
    fn allow_wins_tie() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /page\nAllow: /page\n");
        assert!(policy.is_allowed(UA, "/page"));
    }

    #[test]
    fn wildcards_and_anchors() {
        let policy = RobotsPolicy::parse(
            "User-agent: *\nDisallow: /*.json$\nDisallow: /search*q=\n",
        );
        assert!(!policy.is_allowed(UA, "/data/feed.json"));
        assert!(policy.is_allowed(UA, "/data/feed.json.html"));
        assert!(!policy.is_allowed(UA, "/search?q=rust"));
        assert!(policy.is_allowed(UA, "/search"));
    }

    #[test]
    fn specific_agent_group_preferred() {
        let policy = RobotsPolicy::parse(
            r#"
User-agent: *
Disallow: /

User-agent: trendscout
Disallow: /private
Crawl-delay: 3
"#,
        );
        assert!(policy.is_allowed(UA, "/trending"));
        assert!(!policy.is_allowed(UA, "/private"));
        assert!(!policy.is_allowed("OtherBot/1.0", "/trending"));
        assert_eq!(policy.crawl_delay(UA), Some(Duration::from_secs(3)));
        assert_eq!(policy.crawl_delay("OtherBot/1.0"), None);
    }

    #[test]
    fn shared_group_for_multiple_agents() {
        let policy = RobotsPolicy::parse(
            "User-agent: alpha\nUser-agent: trendscout\nDisallow: /x\n",
        );
        assert!(!policy.is_allowed(UA, "/x"));
        assert!(policy.is_allowed("Beta/2", "/x"));
    }

    #[test]
    fn empty_disallow_permits_everything() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow:\n");
        assert!(policy.is_allowed(UA, "/anything"));
    }

    #[tokio::test]
    async fn fetches_and_caches_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private\nCrawl-delay: 2\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let checker = checker();
        let base = server.uri();
        assert!(checker.can_fetch(&format!("{base}/trending")).await);
        assert!(!checker.can_fetch(&format!("{base}/private/x")).await);
        assert_eq!(
            checker.crawl_delay(&format!("{base}/trending")).await,
            Some(Duration::from_secs(2))
        );
        assert_eq!(checker.cached_origins(), 1);
    }

    #[tokio::test]
    async fn missing_robots_fails_open() {
        let server = MockServer::start().await;
        Mock::given(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(checker().can_fetch(&format!("{}/trending", server.uri())).await);
    }

    #[tokio::test]
    async fn server_error_fails_open() {
        let server = MockServer::start().await;
        Mock::given(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(checker().can_fetch(&format!("{}/trending", server.uri())).await);
    }

    #[tokio::test]
    async fn forbidden_robots_disallows_all() {
        let server = MockServer::start().await;
        Mock::given(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(!checker().can_fetch(&format!("{}/trending", server.uri())).await);
    }

    #[tokio::test]
    async fn unreachable_origin_fails_open() {
        // Nothing listens on port 9 of localhost in the test environment.
        assert!(checker().can_fetch("http://127.0.0.1:9/trending").await);
    }

    #[tokio::test]
    async fn disabled_checker_passes_through() {
        let client = Client::new();
        let checker = PolitenessChecker::new(client, UA, false);
        assert!(checker.can_fetch("http://127.0.0.1:9/anything").await);
        assert_eq!(checker.crawl_delay("http://127.0.0.1:9/anything").await, None);
        assert_eq!(checker.cached_origins(), 0);
    }

    #[test]
    fn cache_is_bounded_and_evicts_lru() {
        let checker = checker();
        for i in 0..POLICY_CACHE_CAPACITY {
            checker.remember(format!("https://site{i}.example"), Arc::new(RobotsPolicy::allow_all()));
        }
        assert_eq!(checker.cached_origins(), POLICY_CACHE_CAPACITY);

        // Touch the oldest entry so the second-oldest becomes LRU.
        assert!(checker.cache.lock().get("https://site0.example").is_some());

        checker.remember("https://overflow.example".into(), Arc::new(RobotsPolicy::allow_all()));
        assert_eq!(checker.cached_origins(), POLICY_CACHE_CAPACITY);

        let cache = checker.cache.lock();
        assert!(cache.contains("https://site0.example"));
        assert!(!cache.contains("https://site1.example"));
        assert!(cache.contains("https://overflow.example"));
    }

    #[test]
    fn origin_includes_port() {
        let url = Url::parse("http://localhost:8080/trending?since=daily").unwrap();
        assert_eq!(origin_of(&url).as_deref(), Some("http://localhost:8080"));
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert_eq!(origin_of(&url), None);
    }
}
