//! URL slugs and canonical URLs for posts.

use std::future::Future;

use postforge_markdown::slugify;
use postforge_shared::{PostForgeError, Result, SiteConfig};
use postforge_storage::Storage;
use tracing::{debug, warn};
use url::Url;

/// Slug used when a title has no alphanumeric characters at all.
pub const FALLBACK_SLUG: &str = "post";

/// Longest slug we generate before the collision suffix.
const MAX_SLUG_LEN: usize = 80;

/// Upper bound on `-N` suffixes tried before giving up.
const MAX_SUFFIX: u32 = 10_000;

/// URL-safe slug for a post title.
pub fn make_slug(title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        return FALLBACK_SLUG.to_string();
    }
    if slug.len() <= MAX_SLUG_LEN {
        return slug;
    }

    // Slugs are ASCII, so any byte index is a char boundary.
    let head = &slug[..MAX_SLUG_LEN];
    let cut = head.rfind('-').filter(|i| *i > 0).unwrap_or(head.len());
    head[..cut].trim_end_matches('-').to_string()
}

/// First free slug among `candidate`, `candidate-2`, `candidate-3`, …
///
/// `except_post` ignores that post's own slug, for editorial renames.
/// The answer is only advisory: a concurrent insert can still take it, which
/// the store reports as [`PostForgeError::SlugCollision`].
pub async fn resolve_unique_slug(
    storage: &Storage,
    candidate: &str,
    except_post: Option<&str>,
) -> Result<String> {
    if !storage.slug_exists(candidate, except_post).await? {
        return Ok(candidate.to_string());
    }

    for n in 2..=MAX_SUFFIX {
        let next = format!("{candidate}-{n}");
        if !storage.slug_exists(&next, except_post).await? {
            debug!(candidate, slug = %next, "slug suffixed to avoid collision");
            return Ok(next);
        }
    }

    Err(PostForgeError::validation(format!(
        "no free slug for '{candidate}' after {MAX_SUFFIX} attempts"
    )))
}

/// Resolve a free slug for `base_slug` and hand it to `insert`.
///
/// When `insert` reports [`PostForgeError::SlugCollision`] (another writer
/// took the slug after it was resolved) the slug is resolved again, up to
/// `attempts` times in total. Returns the slug that was inserted.
pub(crate) async fn insert_with_unique_slug<F, Fut>(
    storage: &Storage,
    base_slug: &str,
    attempts: u32,
    mut insert: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let slug = resolve_unique_slug(storage, base_slug, None).await?;
        match insert(slug.clone()).await {
            Ok(()) => return Ok(slug),
            Err(PostForgeError::SlugCollision { .. }) if attempt < attempts => {
                warn!(attempt, %slug, "slug taken at insert, resolving again");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `{base_url}/{post_path}/{slug}`.
pub fn canonical_url(site: &SiteConfig, slug: &str) -> Result<String> {
    let base = Url::parse(&site.base_url)
        .map_err(|e| PostForgeError::config(format!("site.base_url '{}': {e}", site.base_url)))?;

    let root = base.as_str().trim_end_matches('/');
    let post_path = site.post_path.trim_matches('/');

    if post_path.is_empty() {
        Ok(format!("{root}/{slug}"))
    } else {
        Ok(format!("{root}/{post_path}/{slug}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_post, test_storage};

    #[test]
    fn make_slug_basic() {
        assert_eq!(
            make_slug("Water Damage Restoration in Plano!"),
            "water-damage-restoration-in-plano"
        );
        assert_eq!(make_slug("Crème Brûlée Tips"), "creme-brulee-tips");
    }

    #[test]
    fn make_slug_falls_back_when_empty() {
        assert_eq!(make_slug("!!! ???"), "post");
        assert_eq!(make_slug(""), "post");
    }

    #[test]
    fn non_latin_titles_give_parseable_canonical_urls() {
        let site = SiteConfig {
            base_url: "https://plano-pros.example".into(),
            post_path: "blog".into(),
        };
        for (title, expected) in [
            ("Straße Reparatur in München", "strasse-reparatur-in-munchen"),
            ("Ремонт после потопа", "post"),
            ("水害修復ガイド", "post"),
        ] {
            let slug = make_slug(title);
            assert_eq!(slug, expected);
            let url = canonical_url(&site, &slug).unwrap();
            assert_eq!(Url::parse(&url).unwrap().as_str(), url);
        }
    }

    #[tokio::test]
    async fn lost_insert_race_moves_to_next_suffix() {
        let storage = test_storage().await;
        let mut calls = 0;

        let slug = insert_with_unique_slug(&storage, "mold-guide", 3, |slug| {
            calls += 1;
            let competitor_first = calls == 1;
            let storage = storage.clone();
            async move {
                if competitor_first {
                    storage.insert_post(&sample_post(&slug)).await?;
                }
                storage.insert_post(&sample_post(&slug)).await
            }
        })
        .await
        .unwrap();

        assert_eq!(slug, "mold-guide-2");
        assert_eq!(calls, 2);
        assert!(storage.slug_exists("mold-guide", None).await.unwrap());
    }

    #[tokio::test]
    async fn insert_gives_up_after_attempts() {
        let storage = test_storage().await;
        let mut calls = 0;

        let err = insert_with_unique_slug(&storage, "mold-guide", 2, |slug| {
            calls += 1;
            let storage = storage.clone();
            async move {
                storage.insert_post(&sample_post(&slug)).await?;
                storage.insert_post(&sample_post(&slug)).await
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PostForgeError::SlugCollision { ref slug } if slug == "mold-guide-2"));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn other_insert_errors_are_not_retried() {
        let storage = test_storage().await;
        let mut calls = 0;

        let err = insert_with_unique_slug(&storage, "mold-guide", 5, |_slug| {
            calls += 1;
            async { Err(PostForgeError::Storage("disk full".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PostForgeError::Storage(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn make_slug_truncates_at_word_boundary() {
        let title = "word ".repeat(40);
        let slug = make_slug(&title);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.split('-').all(|part| part == "word"));
    }

    #[test]
    fn canonical_url_joins_parts() {
        let site = SiteConfig {
            base_url: "https://plano-pros.example/".into(),
            post_path: "/blog/".into(),
        };
        assert_eq!(
            canonical_url(&site, "mold-guide").unwrap(),
            "https://plano-pros.example/blog/mold-guide"
        );

        let root = SiteConfig {
            base_url: "https://plano-pros.example".into(),
            post_path: String::new(),
        };
        assert_eq!(
            canonical_url(&root, "mold-guide").unwrap(),
            "https://plano-pros.example/mold-guide"
        );
    }

    #[test]
    fn canonical_url_rejects_bad_base() {
        let site = SiteConfig {
            base_url: "not a url".into(),
            post_path: "blog".into(),
        };
        assert!(canonical_url(&site, "x").is_err());
    }

    #[tokio::test]
    async fn repeated_titles_get_monotonic_suffixes() {
        let storage = test_storage().await;
        let base = make_slug("Water Damage Restoration in Plano!");

        let mut slugs = Vec::new();
        for _ in 0..4 {
            let slug = resolve_unique_slug(&storage, &base, None).await.unwrap();
            storage.insert_post(&sample_post(&slug)).await.unwrap();
            slugs.push(slug);
        }

        assert_eq!(
            slugs,
            vec![
                "water-damage-restoration-in-plano",
                "water-damage-restoration-in-plano-2",
                "water-damage-restoration-in-plano-3",
                "water-damage-restoration-in-plano-4",
            ]
        );
    }

    #[tokio::test]
    async fn own_slug_is_free_for_renames() {
        let storage = test_storage().await;
        let post = sample_post("mold-guide");
        storage.insert_post(&post).await.unwrap();

        let slug = resolve_unique_slug(&storage, "mold-guide", Some(&post.id))
            .await
            .unwrap();
        assert_eq!(slug, "mold-guide");
    }
}
