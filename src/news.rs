//! News Module
//!
//! Article models, list filtering, editor draft state and markdown rendering.

use std::path::Path;

use chrono::{DateTime, Utc};
use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

use crate::api::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct News {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub author: Author,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub email: String,
}

impl News {
    /// Authorship is decided by email, the only author field the list API exposes.
    pub fn is_authored_by(&self, user: &User) -> bool {
        self.author.email == user.email
    }

    pub fn image_urls(&self, uploads_url: &str) -> Vec<String> {
        upload_urls(uploads_url, &self.images)
    }

    pub fn file_urls(&self, uploads_url: &str) -> Vec<String> {
        upload_urls(uploads_url, &self.files)
    }

    pub fn cover_url(&self, uploads_url: &str) -> Option<String> {
        self.images
            .first()
            .map(|name| format!("{}/{}", uploads_url.trim_end_matches('/'), name))
    }
}

fn upload_urls(uploads_url: &str, names: &[String]) -> Vec<String> {
    let base = uploads_url.trim_end_matches('/');
    names.iter().map(|name| format!("{}/{}", base, name)).collect()
}

/// Title search plus exact author match
#[derive(Debug, Clone, Default)]
pub struct NewsFilter {
    pub title: String,
    pub author: String,
}

impl NewsFilter {
    pub fn matches(&self, news: &News) -> bool {
        let title = news
            .title
            .to_lowercase()
            .contains(&self.title.to_lowercase());
        let author = self.author.is_empty() || news.author.email == self.author;
        title && author
    }

    pub fn apply<'a>(&self, list: &'a [News]) -> Vec<&'a News> {
        list.iter().filter(|n| self.matches(n)).collect()
    }
}

/// Distinct author emails, in the order they first appear
pub fn authors(list: &[News]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for item in list {
        if !seen.contains(&item.author.email) {
            seen.push(item.author.email.clone());
        }
    }
    seen
}

/// A file picked for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Entry in an attachment list: either already on the server or picked locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftItem {
    Existing(String),
    New(Attachment),
}

impl DraftItem {
    pub fn preview_name(&self) -> &str {
        match self {
            DraftItem::Existing(name) => name,
            DraftItem::New(attachment) => &attachment.file_name,
        }
    }
}

/// Editor state for creating or editing an article
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsDraft {
    pub title: String,
    pub content: String,
    images: Vec<DraftItem>,
    files: Vec<DraftItem>,
}

impl NewsDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Start an edit from the stored article
    pub fn from_news(news: &News) -> Self {
        Self {
            title: news.title.clone(),
            content: news.content.clone(),
            images: news.images.iter().cloned().map(DraftItem::Existing).collect(),
            files: news.files.iter().cloned().map(DraftItem::Existing).collect(),
        }
    }

    pub fn add_image(&mut self, attachment: Attachment) {
        self.images.push(DraftItem::New(attachment));
    }

    pub fn add_file(&mut self, attachment: Attachment) {
        self.files.push(DraftItem::New(attachment));
    }

    /// Remove the image at `index` in preview order. Out-of-range indexes are ignored.
    pub fn remove_image(&mut self, index: usize) -> Option<DraftItem> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    pub fn remove_file(&mut self, index: usize) -> Option<DraftItem> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn image_previews(&self) -> Vec<&str> {
        self.images.iter().map(DraftItem::preview_name).collect()
    }

    pub fn file_previews(&self) -> Vec<&str> {
        self.files.iter().map(DraftItem::preview_name).collect()
    }

    /// Attachments that still need uploading
    pub fn new_images(&self) -> impl Iterator<Item = &Attachment> {
        new_only(&self.images)
    }

    pub fn new_files(&self) -> impl Iterator<Item = &Attachment> {
        new_only(&self.files)
    }

    pub fn is_submittable(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

fn new_only(items: &[DraftItem]) -> impl Iterator<Item = &Attachment> {
    items.iter().filter_map(|item| match item {
        DraftItem::New(attachment) => Some(attachment),
        DraftItem::Existing(_) => None,
    })
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options
}

/// Render article content to HTML. Raw HTML in the source is escaped, not passed through.
pub fn render_markdown(content: &str) -> String {
    let parser = Parser::new_ext(content, markdown_options()).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(content.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Render article content as plain terminal text
pub fn render_plain(content: &str) -> String {
    let mut out = String::new();
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut quote_depth = 0usize;
    let mut in_code = false;
    let mut link_target: Option<String> = None;

    let line_prefix = |out: &mut String, quote_depth: usize| {
        if out.is_empty() || out.ends_with('\n') {
            for _ in 0..quote_depth {
                out.push_str("> ");
            }
        }
    };

    for event in Parser::new_ext(content, markdown_options()) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                line_prefix(&mut out, quote_depth);
                out.push_str(&"#".repeat(level as usize));
                out.push(' ');
            }
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Paragraph) => {
                out.push_str("\n\n");
            }
            Event::Start(Tag::BlockQuote(_)) => quote_depth += 1,
            Event::End(TagEnd::BlockQuote(_)) => quote_depth = quote_depth.saturating_sub(1),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        out.push_str(&format!("[{}]\n", lang));
                    }
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                out.push('\n');
            }
            Event::Start(Tag::List(start)) => lists.push(start),
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                line_prefix(&mut out, quote_depth);
                let depth = lists.len().saturating_sub(1);
                out.push_str(&"  ".repeat(depth));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{}. ", n));
                        *n += 1;
                    }
                    _ => out.push_str("- "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) => link_target = Some(dest_url.to_string()),
            Event::End(TagEnd::Link) => {
                if let Some(url) = link_target.take() {
                    out.push_str(&format!(" ({})", url));
                }
            }
            Event::Text(text) => {
                if in_code {
                    for line in text.lines() {
                        out.push_str("    ");
                        out.push_str(line);
                        out.push('\n');
                    }
                } else {
                    line_prefix(&mut out, quote_depth);
                    out.push_str(&text);
                }
            }
            Event::Code(code) => {
                out.push('`');
                out.push_str(&code);
                out.push('`');
            }
            Event::Html(raw) | Event::InlineHtml(raw) => out.push_str(&raw),
            Event::TaskListMarker(checked) => out.push_str(if checked { "[x] " } else { "[ ] " }),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("----\n\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}
