//! Post editor field bag.
//!
//! The draft is a flat record mutated through [`PostDraft::apply`]. The
//! same [`PostDraft::validate`] rules gate post creation on the server.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::SeoMetadata;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub seo: SeoMetadata,
    pub published: bool,
    /// Set once the user edits the slug by hand.
    pub slug_touched: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorAction {
    SetTitle(String),
    SetSlug(String),
    SetContent(String),
    SetExcerpt(String),
    AddTag(String),
    RemoveTag(String),
    SetSeo(SeoMetadata),
    SetPublished(bool),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DraftField {
    Title,
    Slug,
    Content,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftIssue {
    Missing(DraftField),
    MalformedSlug,
    TitleTooLong,
}

impl std::fmt::Display for DraftIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftIssue::Missing(DraftField::Title) => write!(f, "Title is required"),
            DraftIssue::Missing(DraftField::Slug) => write!(f, "Slug is required"),
            DraftIssue::Missing(DraftField::Content) => write!(f, "Content is required"),
            DraftIssue::Missing(DraftField::Tags) => write!(f, "At least one tag is required"),
            DraftIssue::MalformedSlug => {
                write!(f, "Slug may only contain lowercase letters, digits and single dashes")
            }
            DraftIssue::TitleTooLong => {
                write!(f, "Title must be at most {MAX_TITLE_LEN} characters")
            }
        }
    }
}

impl PostDraft {
    pub fn apply(mut self, action: EditorAction) -> Self {
        match action {
            EditorAction::SetTitle(title) => {
                if !self.slug_touched {
                    self.slug = slugify(&title);
                }
                self.title = title;
            }
            EditorAction::SetSlug(slug) => {
                if slug.trim().is_empty() {
                    self.slug_touched = false;
                    self.slug = slugify(&self.title);
                } else {
                    self.slug_touched = true;
                    self.slug = slug;
                }
            }
            EditorAction::SetContent(content) => self.content = content,
            EditorAction::SetExcerpt(excerpt) => self.excerpt = excerpt,
            EditorAction::AddTag(tag) => {
                let tag = tag.trim().to_string();
                if !tag.is_empty() && !self.tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                    self.tags.push(tag);
                }
            }
            EditorAction::RemoveTag(tag) => {
                self.tags.retain(|t| !t.eq_ignore_ascii_case(tag.trim()));
            }
            EditorAction::SetSeo(seo) => self.seo = seo,
            EditorAction::SetPublished(published) => self.published = published,
            EditorAction::Reset => return Self::default(),
        }
        self
    }

    /// Every problem blocking submission, in field order.
    pub fn validate(&self) -> Vec<DraftIssue> {
        let mut issues = Vec::new();

        if self.title.trim().is_empty() {
            issues.push(DraftIssue::Missing(DraftField::Title));
        } else if self.title.trim().chars().count() > MAX_TITLE_LEN {
            issues.push(DraftIssue::TitleTooLong);
        }

        if self.slug.trim().is_empty() {
            issues.push(DraftIssue::Missing(DraftField::Slug));
        } else if !is_valid_slug(&self.slug) {
            issues.push(DraftIssue::MalformedSlug);
        }

        if is_blank_html(&self.content) {
            issues.push(DraftIssue::Missing(DraftField::Content));
        }

        if self.tags.iter().all(|t| t.trim().is_empty()) {
            issues.push(DraftIssue::Missing(DraftField::Tags));
        }

        issues
    }

    pub fn is_dirty(&self, saved: &PostDraft) -> bool {
        self != saved
    }
}

pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_PATTERN.is_match(slug)
}

/// Editor output such as `<p></p>` counts as empty.
fn is_blank_html(content: &str) -> bool {
    let mut in_tag = false;
    for ch in content.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !c.is_whitespace() => return false,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> PostDraft {
        PostDraft::default()
            .apply(EditorAction::SetTitle("Hello World".into()))
            .apply(EditorAction::SetContent("<p>Body</p>".into()))
            .apply(EditorAction::AddTag("rust".into()))
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Hello, World!  "), "hello-world");
        assert_eq!(slugify("Rust & WebAssembly -- 2024"), "rust-webassembly-2024");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn slug_follows_title_until_edited() {
        let draft = PostDraft::default().apply(EditorAction::SetTitle("First Draft".into()));
        assert_eq!(draft.slug, "first-draft");

        let draft = draft
            .apply(EditorAction::SetSlug("custom-slug".into()))
            .apply(EditorAction::SetTitle("Renamed".into()));
        assert_eq!(draft.slug, "custom-slug");
        assert!(draft.slug_touched);
    }

    #[test]
    fn clearing_slug_hands_it_back_to_title() {
        let draft = filled()
            .apply(EditorAction::SetSlug("mine".into()))
            .apply(EditorAction::SetSlug("".into()));
        assert!(!draft.slug_touched);
        assert_eq!(draft.slug, "hello-world");
    }

    #[test]
    fn tags_are_deduplicated_case_insensitively() {
        let draft = filled()
            .apply(EditorAction::AddTag("Rust".into()))
            .apply(EditorAction::AddTag("  web ".into()))
            .apply(EditorAction::AddTag("   ".into()));
        assert_eq!(draft.tags, vec!["rust".to_string(), "web".to_string()]);

        let draft = draft.apply(EditorAction::RemoveTag("RUST".into()));
        assert_eq!(draft.tags, vec!["web".to_string()]);
    }

    #[test]
    fn validate_reports_every_missing_field() {
        let issues = PostDraft::default()
            .apply(EditorAction::SetContent("<p> </p>".into()))
            .validate();
        assert_eq!(
            issues,
            vec![
                DraftIssue::Missing(DraftField::Title),
                DraftIssue::Missing(DraftField::Slug),
                DraftIssue::Missing(DraftField::Content),
                DraftIssue::Missing(DraftField::Tags),
            ]
        );
        assert!(filled().validate().is_empty());
    }

    #[test]
    fn validate_rejects_malformed_slug() {
        let draft = filled().apply(EditorAction::SetSlug("Bad Slug".into()));
        assert_eq!(draft.validate(), vec![DraftIssue::MalformedSlug]);
    }

    #[test]
    fn dirty_tracking_compares_with_saved_snapshot() {
        let saved = filled();
        assert!(!saved.is_dirty(&saved.clone()));
        let edited = saved.clone().apply(EditorAction::SetPublished(true));
        assert!(edited.is_dirty(&saved));
        assert_eq!(edited.apply(EditorAction::Reset), PostDraft::default());
    }
}
