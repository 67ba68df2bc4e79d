//! Turns a story into a Hugo page: a dated, slugified filename and a body with TOML front matter.

use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::contract::Story;

/// A rendered page ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Repository path: content directory joined with [`Post::file_name`].
    pub path: String,
    pub body: String,
}

/// The renderable view of a story (or of a manually curated link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Stable identifier of the underlying item, used to disambiguate colliding filenames.
    pub id: String,
    pub title: String,
    pub url: String,
    pub comment: String,
    pub date: DateTime<Utc>,
}

fn duplicated_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<a href="([^"]*)"[^>]*>.*?</a>"#).expect("static regex is valid")
    })
}

impl From<&Story> for Post {
    /// NewsBlur renders links inside comments as anchors; keep only the bare URL.
    fn from(story: &Story) -> Self {
        Post {
            id: story.id.clone(),
            title: story.title.clone(),
            url: story.permalink.clone(),
            comment: duplicated_link()
                .replace_all(&story.comment, "$1")
                .into_owned(),
            date: story.shared_date,
        }
    }
}

impl Post {
    /// `YYYY-MM-DD-<slug>.md`
    pub fn file_name(&self) -> String {
        format!("{}-{}.md", self.date.format("%Y-%m-%d"), slugify(&self.title))
    }

    /// Collision-free variant of [`Post::file_name`]: suffixed with a short hash of the id.
    pub fn disambiguated_file_name(&self) -> String {
        let digest = Sha256::digest(self.id.as_bytes());
        let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}.md",
            self.date.format("%Y-%m-%d"),
            slugify(&self.title),
            short
        )
    }

    pub fn to_markdown(&self) -> String {
        let date = self.date.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        format!(
            "+++\n\
             date = \"{date}\"\n\
             publishDate = \"{date}\"\n\
             title = {title}\n\
             originalUrl = {url}\n\
             comment = {comment}\n\
             +++\n\
             \n\
             ### My thoughts\n\
             \n\
             {raw_comment}\n\
             \n\
             Read the article: [{raw_title}]({raw_url})\n",
            title = quote(&self.title),
            url = quote(&self.url),
            comment = quote(&self.comment),
            raw_comment = self.comment,
            raw_title = self.title,
            raw_url = self.url,
        )
    }

    pub fn render(&self, content_dir: &str) -> Document {
        Document {
            path: join_path(content_dir, &self.file_name()),
            body: self.to_markdown(),
        }
    }
}

/// Joins repository path segments with exactly one `/`.
pub fn join_path(dir: &str, file: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

/// ASCII slug: transliterated, lowercase, every other run collapsed to a single `-`.
pub fn slugify(title: &str) -> String {
    let slug = slug::slugify(title);
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// TOML basic string.
fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
