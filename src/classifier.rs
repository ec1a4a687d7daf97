//! Domain classification and content heuristics
//!
//! Two pure policies decide whether a visit counts as study time:
//!
//! - [`DomainClassifier`] maps `(domain, page title)` to a [`Category`] from
//!   static domain tables.
//! - [`ContentHeuristic`] inspects page text of a distracting video page and
//!   reports whether it is actually study material.
//!
//! Both are driven by a serializable [`DomainPolicy`] so the tables can be tuned
//! from configuration without touching the state machine.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EngineError;
use crate::types::Category;

const ACADEMIC_DOMAINS: &[&str] = &[
    "docs.google.com",
    "scholar.google.com",
    "notion.so",
    "www.notion.so",
    "coursera.org",
    "www.coursera.org",
];

const ACADEMIC_PREFIXES: &[&str] = &["canvas.", "blackboard."];

const DISTRACTING_DOMAINS: &[&str] = &[
    "instagram.com",
    "www.instagram.com",
    "tiktok.com",
    "www.tiktok.com",
    "reddit.com",
    "www.reddit.com",
    "twitter.com",
    "x.com",
    "www.twitter.com",
    "www.x.com",
    "facebook.com",
    "www.facebook.com",
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
];

const VIDEO_DOMAINS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com"];

const LECTURE_TITLE_KEYWORDS: &[&str] = &["lecture", "tutorial", "course", "class"];

/// Keywords that mark a video page as study material. Some entries carry a
/// trailing space so that e.g. "mit " does not match "submit".
const CONTENT_KEYWORDS: &[&str] = &[
    "lecture", "lectures", "tutorial", "tutorials", "course", "courses", "class", "classes",
    "lesson", "lessons", "education", "educational", "learn", "learning", "study", "studying",
    "physics", "math", "mathematics", "calculus", "algebra", "geometry", "statistics",
    "chemistry", "organic chemistry", "biology", "anatomy", "physiology", "medicine", "medical",
    "programming", "coding", "computer science", "cs ", "software engineering", "algorithm",
    "algorithms", "engineering", "electrical", "mechanical", "stem", "science", "economics",
    "finance", "accounting", "exam", "exams", "review", "homework", "assignment", "textbook",
    "professor", "instructor", "mit ", "mit opencourseware", "khan academy", "edx", "coursera",
    "udemy course", "crash course", "introduction to", "fundamentals of", "basics of",
    "explained", "how it works", "differentiation", "integration", "linear algebra",
    "differential equations", "probability",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Tunable classification tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainPolicy {
    /// Exact hostnames that always count as academic
    pub academic_domains: Vec<String>,
    /// Hostname prefixes that count as academic (LMS subdomains)
    pub academic_prefixes: Vec<String>,
    /// Exact hostnames that count as distracting
    pub distracting_domains: Vec<String>,
    /// Distracting hostnames whose pages may hold lectures
    pub video_domains: Vec<String>,
    /// Whole words in a video title that mark it academic
    pub lecture_title_keywords: Vec<String>,
    /// Substrings of page text that mark a video academic
    pub content_keywords: Vec<String>,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self {
            academic_domains: owned(ACADEMIC_DOMAINS),
            academic_prefixes: owned(ACADEMIC_PREFIXES),
            distracting_domains: owned(DISTRACTING_DOMAINS),
            video_domains: owned(VIDEO_DOMAINS),
            lecture_title_keywords: owned(LECTURE_TITLE_KEYWORDS),
            content_keywords: owned(CONTENT_KEYWORDS),
        }
    }
}

/// Extract the hostname of a tab URL
///
/// Unparsable URLs and URLs without a host (e.g. `about:blank`) yield an empty
/// string, which classifies as neutral.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Domain classifier built from a [`DomainPolicy`]
#[derive(Debug, Clone)]
pub struct DomainClassifier {
    academic_domains: HashSet<String>,
    academic_prefixes: Vec<String>,
    distracting_domains: HashSet<String>,
    video_domains: HashSet<String>,
    lecture_title: Option<Regex>,
}

impl DomainClassifier {
    /// Build a classifier from policy tables
    pub fn new(policy: &DomainPolicy) -> Result<Self, EngineError> {
        let lecture_title = if policy.lecture_title_keywords.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = policy
                .lecture_title_keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect();
            let pattern = format!(r"(?i)\b({})\b", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| {
                EngineError::ConfigError(format!("Invalid lecture keyword pattern: {}", e))
            })?)
        };

        Ok(Self {
            academic_domains: policy.academic_domains.iter().cloned().collect(),
            academic_prefixes: policy.academic_prefixes.clone(),
            distracting_domains: policy.distracting_domains.iter().cloned().collect(),
            video_domains: policy.video_domains.iter().cloned().collect(),
            lecture_title,
        })
    }

    /// Classify a visit by domain and page title
    ///
    /// Rules, first match wins:
    /// 1. exact academic domain
    /// 2. academic prefix
    /// 3. distracting domain, unless it is a video domain whose title names a
    ///    lecture, tutorial, course, or class
    /// 4. neutral
    pub fn classify(&self, domain: &str, title: &str) -> Category {
        if domain.is_empty() {
            return Category::Neutral;
        }
        if self.academic_domains.contains(domain) {
            return Category::Academic;
        }
        if self
            .academic_prefixes
            .iter()
            .any(|prefix| domain.starts_with(prefix.as_str()))
        {
            return Category::Academic;
        }
        if self.distracting_domains.contains(domain) {
            if self.is_video_domain(domain) && self.title_names_lecture(title) {
                return Category::Academic;
            }
            return Category::Distracting;
        }
        Category::Neutral
    }

    /// Whether the domain hosts videos that the content heuristic may reclassify
    pub fn is_video_domain(&self, domain: &str) -> bool {
        self.video_domains.contains(domain)
    }

    fn title_names_lecture(&self, title: &str) -> bool {
        match &self.lecture_title {
            Some(re) => !title.is_empty() && re.is_match(title),
            None => false,
        }
    }
}

/// Keyword heuristic over page text
#[derive(Debug, Clone)]
pub struct ContentHeuristic {
    keywords: Vec<String>,
}

impl ContentHeuristic {
    pub fn new(policy: &DomainPolicy) -> Self {
        Self {
            keywords: policy
                .content_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against the keyword list
    pub fn is_academic(&self, page_text: &str) -> bool {
        if page_text.is_empty() {
            return false;
        }
        let text = page_text.to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

impl Default for ContentHeuristic {
    fn default() -> Self {
        Self::new(&DomainPolicy::default())
    }
}
