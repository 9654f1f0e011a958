//! Trending listing page parsing.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use trendscout_shared::{Candidate, Result, TrendScoutError};

static COMPACT_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)([km]\b)?").expect("compact number pattern is valid")
});

/// Decode a listing counter such as `"1,234"`, `"1.2k"`, `"1.5m"` or
/// `"89 stars today"`. Empty or unparseable text yields 0.
pub fn parse_compact_number(text: &str) -> u64 {
    let cleaned = text.replace(',', "").to_lowercase();
    let Some(caps) = COMPACT_NUMBER.captures(&cleaned) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        _ => 1.0,
    };
    (value * multiplier).round() as u64
}

/// Extracts [`Candidate`]s from a trending listing page.
pub struct PageParser {
    base_url: String,
    entry: Selector,
    title_link: Selector,
    description: Selector,
    language: Selector,
    stars_link: Selector,
    star_icon: Selector,
    forks_link: Selector,
    fork_icon: Selector,
    period_stars: Selector,
}

impl PageParser {
    /// Parser resolving project links against `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            entry: selector("article.Box-row")?,
            title_link: selector("h2 a")?,
            description: selector("p")?,
            language: selector(r#"span[itemprop="programmingLanguage"]"#)?,
            stars_link: selector(r#"a[href$="/stargazers"]"#)?,
            star_icon: selector("svg.octicon-star")?,
            forks_link: selector(r#"a[href$="/forks"]"#)?,
            fork_icon: selector("svg.octicon-repo-forked")?,
            period_stars: selector("span.d-inline-block.float-sm-right")?,
        })
    }

    /// Parse every entry on the page. Malformed entries are skipped.
    pub fn parse(&self, html: &str, observed_at: DateTime<Utc>) -> Vec<Candidate> {
        let doc = Html::parse_document(html);
        let mut candidates = Vec::new();

        for (index, entry) in doc.select(&self.entry).enumerate() {
            match self.parse_entry(entry, observed_at) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => warn!(index, error = %e, "skipping malformed listing entry"),
            }
        }

        debug!(count = candidates.len(), "parsed listing page");
        candidates
    }

    fn parse_entry(&self, entry: ElementRef<'_>, observed_at: DateTime<Utc>) -> Result<Candidate> {
        let href = entry
            .select(&self.title_link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .ok_or_else(|| TrendScoutError::parse("entry has no title link"))?;

        let identity: String = href
            .trim()
            .trim_matches('/')
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if identity.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(TrendScoutError::parse(format!(
                "title link '{href}' is not an owner/name path"
            )));
        }

        let description = entry
            .select(&self.description)
            .next()
            .map(|p| collapse_whitespace(&text_of(p)))
            .unwrap_or_default();
        let language = entry
            .select(&self.language)
            .next()
            .map(|s| text_of(s).trim().to_string())
            .unwrap_or_default();

        let stars = self.counter(entry, &self.stars_link, &self.star_icon);
        let forks = self.counter(entry, &self.forks_link, &self.fork_icon);
        let period_stars = entry
            .select(&self.period_stars)
            .next()
            .map(|s| parse_compact_number(&text_of(s)))
            .unwrap_or(0);

        Ok(Candidate {
            url: format!("{}/{identity}", self.base_url),
            identity,
            description,
            language,
            stars,
            forks,
            period_stars,
            observed_at,
        })
    }

    /// Counter from its link, falling back to the icon's parent element.
    fn counter(&self, entry: ElementRef<'_>, link: &Selector, icon: &Selector) -> u64 {
        let text = entry.select(link).next().map(text_of).or_else(|| {
            entry
                .select(icon)
                .next()
                .and_then(|svg| svg.parent())
                .and_then(ElementRef::wrap)
                .map(text_of)
        });
        text.map(|t| parse_compact_number(&t)).unwrap_or(0)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| TrendScoutError::parse(format!("invalid selector '{css}': {e:?}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body><div class="Box">
  <article class="Box-row">
    <h2 class="h3 lh-condensed">
      <a href="/tokio-rs/tokio" class="Link">
        <span class="text-normal">tokio-rs /</span> tokio
      </a>
    </h2>
    <p class="col-9 color-fg-muted my-1 pr-4">
      A runtime for writing reliable asynchronous
      applications with Rust.
    </p>
    <div class="f6 color-fg-muted mt-2">
      <span class="d-inline-block ml-0 mr-3">
        <span itemprop="programmingLanguage">Rust</span>
      </span>
      <a class="Link Link--muted d-inline-block mr-3" href="/tokio-rs/tokio/stargazers">
        <svg class="octicon octicon-star"></svg> 27,412
      </a>
      <a class="Link Link--muted d-inline-block mr-3" href="/tokio-rs/tokio/forks">
        <svg class="octicon octicon-repo-forked"></svg> 2.5k
      </a>
      <span class="d-inline-block float-sm-right">
        <svg class="octicon octicon-star"></svg> 189 stars today
      </span>
    </div>
  </article>
  <article class="Box-row">
    <h2><a href="/astral-sh/uv">astral-sh / uv</a></h2>
    <div>
      <span class="d-inline-block mr-3"><svg class="octicon octicon-star"></svg> 1.5m</span>
      <span class="d-inline-block mr-3"><svg class="octicon octicon-repo-forked"></svg> 900</span>
    </div>
  </article>
  <article class="Box-row">
    <h2>No link here</h2>
    <p>Broken entry</p>
  </article>
</div></body></html>
"#;

    fn parser() -> PageParser {
        PageParser::new("https://github.com/").unwrap()
    }

    #[test]
    fn compact_numbers() {
        assert_eq!(parse_compact_number("1,234"), 1234);
        assert_eq!(parse_compact_number("1.2k"), 1200);
        assert_eq!(parse_compact_number("5K"), 5000);
        assert_eq!(parse_compact_number("1.5m"), 1_500_000);
        assert_eq!(parse_compact_number(""), 0);
        assert_eq!(parse_compact_number("Built by"), 0);
        assert_eq!(parse_compact_number("89 stars today"), 89);
        assert_eq!(parse_compact_number("1,024 stars this month"), 1024);
        assert_eq!(parse_compact_number("  42  "), 42);
    }

    #[test]
    fn parses_full_entry() {
        let now = Utc::now();
        let candidates = parser().parse(PAGE, now);
        assert_eq!(candidates.len(), 2);

        let tokio = &candidates[0];
        assert_eq!(tokio.identity, "tokio-rs/tokio");
        assert_eq!(tokio.url, "https://github.com/tokio-rs/tokio");
        assert_eq!(
            tokio.description,
            "A runtime for writing reliable asynchronous applications with Rust."
        );
        assert_eq!(tokio.language, "Rust");
        assert_eq!(tokio.stars, 27_412);
        assert_eq!(tokio.forks, 2_500);
        assert_eq!(tokio.period_stars, 189);
        assert_eq!(tokio.observed_at, now);
    }

    #[test]
    fn falls_back_to_icon_parents() {
        let candidates = parser().parse(PAGE, Utc::now());
        let uv = &candidates[1];
        assert_eq!(uv.identity, "astral-sh/uv");
        assert_eq!(uv.description, "");
        assert_eq!(uv.language, "");
        assert_eq!(uv.stars, 1_500_000);
        assert_eq!(uv.forks, 900);
        assert_eq!(uv.period_stars, 0);
    }

    #[test]
    fn rejects_non_repository_links() {
        let html = r#"<article class="Box-row"><h2><a href="/sponsors">x</a></h2></article>"#;
        assert!(parser().parse(html, Utc::now()).is_empty());
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(parser().parse("<html></html>", Utc::now()).is_empty());
    }
}
