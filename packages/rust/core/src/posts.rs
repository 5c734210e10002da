//! Editorial edits to persisted posts.

use chrono::Utc;
use tracing::{info, instrument};

use postforge_markdown::{RenderOptions, render};
use postforge_shared::{Post, PostForgeError, PostStatus, Result, SiteConfig};
use postforge_storage::Storage;

use crate::slug::{canonical_url, make_slug, resolve_unique_slug};

/// Fields to change. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub title: Option<String>,
    /// New Markdown body; the derived fields are re-rendered.
    pub markdown: Option<String>,
    /// Requested slug; normalized and made unique.
    pub slug: Option<String>,
    pub seo_title: Option<String>,
    pub meta_description: Option<String>,
    pub status: Option<PostStatus>,
    pub scheduled_at: Option<chrono::DateTime<Utc>>,
    /// Empty string clears the image.
    pub cover_image: Option<String>,
}

/// Apply `update` to post `id` and persist it.
///
/// A changed body refreshes HTML, TOC, excerpt, counts and hash. A changed
/// slug refreshes the canonical URL. Publishing stamps `published_at`;
/// scheduling needs a `scheduled_at`.
#[instrument(skip_all, fields(post_id = id))]
pub async fn update_post(
    storage: &Storage,
    site: &SiteConfig,
    render_options: &RenderOptions,
    id: &str,
    update: PostUpdate,
) -> Result<Post> {
    let mut post = storage
        .get_post(id)
        .await?
        .ok_or_else(|| PostForgeError::not_found("post", id))?;
    let now = Utc::now();

    if let Some(title) = update.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(PostForgeError::validation("title cannot be empty"));
        }
        post.title = title.to_string();
    }

    if let Some(markdown) = update.markdown {
        let rendered = render(&markdown, render_options);
        if rendered.word_count == 0 {
            return Err(PostForgeError::validation("post body cannot be empty"));
        }
        // Follow the excerpt unless the description was written by hand.
        if post.meta_description == post.excerpt {
            post.meta_description = rendered.excerpt.clone();
        }
        post.content_hash = crate::pipeline::content_hash(&rendered.markdown);
        post.markdown = rendered.markdown;
        post.html = rendered.html;
        post.toc = rendered.toc;
        post.excerpt = rendered.excerpt;
        post.word_count = rendered.word_count;
        post.reading_time = rendered.reading_time;
    }

    if let Some(requested) = update.slug {
        let slug = resolve_unique_slug(storage, &make_slug(&requested), Some(&post.id)).await?;
        post.canonical_url = canonical_url(site, &slug)?;
        post.slug = slug;
    }

    if let Some(seo_title) = update.seo_title {
        post.seo_title = seo_title.trim().to_string();
    }
    if let Some(description) = update.meta_description {
        post.meta_description = description.trim().to_string();
    }

    if let Some(cover) = update.cover_image {
        let cover = Some(cover.trim().to_string()).filter(|c| !c.is_empty());
        if post.og_image.is_none() || post.og_image == post.cover_image {
            post.og_image = cover.clone();
        }
        post.cover_image = cover;
    }

    let status = update.status.unwrap_or(post.status);
    if let Some(at) = update.scheduled_at {
        if status != PostStatus::Scheduled {
            return Err(PostForgeError::validation(
                "scheduled_at can only be set on a scheduled post",
            ));
        }
        post.scheduled_at = Some(at);
    }
    match status {
        PostStatus::Draft => {
            post.scheduled_at = None;
            post.published_at = None;
        }
        PostStatus::Scheduled => {
            if post.scheduled_at.is_none() {
                return Err(PostForgeError::validation(
                    "scheduling a post requires scheduled_at",
                ));
            }
            post.published_at = None;
        }
        PostStatus::Published => {
            post.scheduled_at = None;
            post.published_at = post.published_at.or(Some(now));
        }
    }
    post.status = status;
    post.updated_at = now;

    storage.update_post(&post).await?;
    info!(slug = %post.slug, status = %post.status, "post updated");
    Ok(post)
}
