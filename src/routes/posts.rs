use axum::{
    Router,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::editor::{EditorAction, PostDraft, slugify};
use crate::error::{AppError, parse_id};
use crate::models::{
    ApiResponse, AuthorSummary, CreatePost, PageRequest, Pagination, Post, PostQuery,
    PostResponse, SeoMetadata, TagResponse, UpdatePost, User,
};
use crate::routes::auth::{extract_current_user, extract_optional_user};
use crate::routes::tags::upsert_tag;
use crate::state::AppState;

pub fn posts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts_handler).post(create_post_handler))
        // GET resolves a slug; PATCH and DELETE take the post id.
        .route(
            "/{post}",
            get(get_post_handler)
                .patch(update_post_handler)
                .delete(delete_post_handler),
        )
}

async fn list_posts_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PostQuery>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    let include_drafts =
        query.include_drafts.unwrap_or(false) && viewer.as_ref().is_some_and(|u| u.is_admin);

    let page = PageRequest::new(query.page, query.limit);
    let (posts, pagination) =
        list_posts(&state.pool, page, query.tag.as_deref(), include_drafts).await?;
    Ok(Json(ApiResponse::success(posts).with_pagination(pagination)))
}

async fn create_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreatePost>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let post = create_post(&state.pool, input, &current_user).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(post).with_message("Post created")),
    ))
}

async fn get_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    let post = get_post_by_slug(&state.pool, &slug, viewer.as_ref()).await?;
    Ok(Json(ApiResponse::success(post)))
}

async fn update_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    Json(input): Json<UpdatePost>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let post = update_post(&state.pool, &post_id, input, &current_user).await?;
    Ok(Json(ApiResponse::success(post).with_message("Post updated")))
}

async fn delete_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    delete_post(&state.pool, &post_id, &current_user).await?;
    Ok(Json(
        ApiResponse::success(serde_json::Value::Null).with_message("Post deleted successfully"),
    ))
}

// ============================
// Service
// ============================

pub async fn create_post(
    pool: &SqlitePool,
    input: CreatePost,
    actor: &User,
) -> Result<PostResponse, AppError> {
    let slug = input
        .slug
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| slugify(&input.title));

    let draft = build_draft(&input.title, &slug, &input.content, &input.tags);
    check_draft(&draft)?;

    let extra_authors = input
        .author_ids
        .iter()
        .map(|id| parse_id(id, "authorIds"))
        .collect::<Result<Vec<_>, _>>()?;

    ensure_slug_free(pool, &draft.slug, None).await?;

    let post_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO posts
           (id, title, slug, content, excerpt, is_published, published_at,
            meta_title, meta_description, canonical_url, og_image, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&post_id)
    .bind(draft.title.trim())
    .bind(&draft.slug)
    .bind(&draft.content)
    .bind(non_empty(input.excerpt))
    .bind(input.published)
    .bind(input.published.then_some(now))
    .bind(&input.seo.meta_title)
    .bind(&input.seo.meta_description)
    .bind(&input.seo.canonical_url)
    .bind(&input.seo.og_image)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let mut authors = vec![actor.id.clone()];
    for id in extra_authors {
        if !authors.contains(&id) {
            authors.push(id);
        }
    }

    replace_tags(&mut tx, &post_id, &draft.tags).await?;
    replace_authors(&mut tx, &post_id, &authors).await?;
    tx.commit().await?;

    tracing::info!(%post_id, slug = %draft.slug, published = input.published, "post created");

    load_post_response(pool, &post_id).await
}

pub async fn update_post(
    pool: &SqlitePool,
    post_id: &str,
    input: UpdatePost,
    actor: &User,
) -> Result<PostResponse, AppError> {
    let post_id = parse_id(post_id, "postId")?;
    let post = find_post(pool, &post_id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;

    ensure_can_edit(pool, &post.id, actor).await?;

    let current_tags = post_tag_names(pool, &post.id).await?;
    let title = input.title.unwrap_or(post.title);
    let slug = input.slug.unwrap_or(post.slug);
    let content = input.content.unwrap_or(post.content);
    let tags = input.tags.unwrap_or(current_tags);

    let draft = build_draft(&title, &slug, &content, &tags);
    check_draft(&draft)?;
    ensure_slug_free(pool, &draft.slug, Some(&post.id)).await?;

    let authors = match input.author_ids {
        Some(ids) => {
            let ids = ids
                .iter()
                .map(|id| parse_id(id, "authorIds"))
                .collect::<Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                return Err(AppError::validation("A post needs at least one author"));
            }
            Some(ids)
        }
        None => None,
    };

    let published = input.published.unwrap_or(post.is_published);
    let published_at = match (post.is_published, published) {
        (false, true) => Some(Utc::now()),
        (_, false) => None,
        (true, true) => post.published_at,
    };
    let excerpt = match input.excerpt {
        Some(excerpt) => non_empty(Some(excerpt)),
        None => post.excerpt,
    };
    let seo = input.seo.unwrap_or(SeoMetadata {
        meta_title: post.meta_title,
        meta_description: post.meta_description,
        canonical_url: post.canonical_url,
        og_image: post.og_image,
    });

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"UPDATE posts SET
           title = ?, slug = ?, content = ?, excerpt = ?, is_published = ?, published_at = ?,
           meta_title = ?, meta_description = ?, canonical_url = ?, og_image = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(draft.title.trim())
    .bind(&draft.slug)
    .bind(&draft.content)
    .bind(&excerpt)
    .bind(published)
    .bind(published_at)
    .bind(&seo.meta_title)
    .bind(&seo.meta_description)
    .bind(&seo.canonical_url)
    .bind(&seo.og_image)
    .bind(Utc::now())
    .bind(&post.id)
    .execute(&mut *tx)
    .await?;

    replace_tags(&mut tx, &post.id, &draft.tags).await?;
    if let Some(authors) = authors {
        replace_authors(&mut tx, &post.id, &authors).await?;
    }
    tx.commit().await?;

    load_post_response(pool, &post.id).await
}

/// Drafts resolve only for their authors and admins.
pub async fn get_post_by_slug(
    pool: &SqlitePool,
    slug: &str,
    viewer: Option<&User>,
) -> Result<PostResponse, AppError> {
    let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE slug = ?")
        .bind(slug.trim())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;

    if !post.is_published {
        let allowed = match viewer {
            Some(user) => user.is_admin || is_post_author(pool, &post.id, &user.id).await?,
            None => false,
        };
        if !allowed {
            return Err(AppError::not_found("Post not found"));
        }
    }

    to_response(pool, post).await
}

pub async fn list_posts(
    pool: &SqlitePool,
    page: PageRequest,
    tag: Option<&str>,
    include_drafts: bool,
) -> Result<(Vec<PostResponse>, Pagination), AppError> {
    let tag_slug = tag.map(slugify).filter(|s| !s.is_empty());

    let filter = r#"
        FROM posts p
        WHERE (? OR p.is_published = TRUE)
          AND (? IS NULL OR EXISTS (
              SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
              WHERE pt.post_id = p.id AND t.slug = ?
          ))
    "#;

    let count_sql = format!("SELECT COUNT(*) {filter}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(include_drafts)
        .bind(&tag_slug)
        .bind(&tag_slug)
        .fetch_one(pool)
        .await?;

    let select_sql = format!(
        "SELECT p.* {filter} ORDER BY COALESCE(p.published_at, p.created_at) DESC, p.rowid DESC LIMIT ? OFFSET ?"
    );
    let posts = sqlx::query_as::<_, Post>(&select_sql)
        .bind(include_drafts)
        .bind(&tag_slug)
        .bind(&tag_slug)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    let mut responses = Vec::with_capacity(posts.len());
    for post in posts {
        responses.push(to_response(pool, post).await?);
    }

    Ok((responses, Pagination::new(total, page.page, page.limit)))
}

pub async fn delete_post(pool: &SqlitePool, post_id: &str, actor: &User) -> Result<(), AppError> {
    let post_id = parse_id(post_id, "postId")?;
    let post = find_post(pool, &post_id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;

    ensure_can_edit(pool, &post.id, actor).await?;

    // Comments, tag links and author links cascade with the post.
    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(&post.id)
        .execute(pool)
        .await?;

    tracing::info!(post_id = %post.id, "post deleted");
    Ok(())
}

// ============================
// Helpers
// ============================

fn build_draft(title: &str, slug: &str, content: &str, tags: &[String]) -> PostDraft {
    let mut draft = PostDraft::default()
        .apply(EditorAction::SetTitle(title.to_string()))
        .apply(EditorAction::SetSlug(slug.trim().to_string()))
        .apply(EditorAction::SetContent(content.to_string()));
    for tag in tags {
        draft = draft.apply(EditorAction::AddTag(tag.clone()));
    }
    draft
}

fn check_draft(draft: &PostDraft) -> Result<(), AppError> {
    let issues = draft.validate();
    if issues.is_empty() {
        return Ok(());
    }
    let message = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(AppError::validation(message))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn ensure_slug_free(
    pool: &SqlitePool,
    slug: &str,
    except_post: Option<&str>,
) -> Result<(), AppError> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM posts WHERE slug = ?")
        .bind(slug)
        .fetch_optional(pool)
        .await?;

    match existing {
        Some((id,)) if Some(id.as_str()) != except_post => {
            Err(AppError::validation("Slug already in use"))
        }
        _ => Ok(()),
    }
}

async fn ensure_can_edit(pool: &SqlitePool, post_id: &str, actor: &User) -> Result<(), AppError> {
    if actor.is_admin || is_post_author(pool, post_id, &actor.id).await? {
        return Ok(());
    }
    tracing::warn!(%post_id, user_id = %actor.id, "rejected post edit by non-author");
    Err(AppError::forbidden("Not authorized to modify this post"))
}

pub(crate) async fn is_post_author(pool: &SqlitePool, post_id: &str, user_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT user_id FROM post_authors WHERE post_id = ? AND user_id = ?",
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

async fn find_post(pool: &SqlitePool, post_id: &str) -> Result<Option<Post>, sqlx::Error> {
    sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await
}

async fn post_tag_names(pool: &SqlitePool, post_id: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.name FROM post_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.post_id = ? ORDER BY t.name",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

async fn replace_tags(
    conn: &mut SqliteConnection,
    post_id: &str,
    tags: &[String],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *conn)
        .await?;

    for name in tags {
        let tag = upsert_tag(&mut *conn, name).await?;
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(post_id)
            .bind(&tag.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn replace_authors(
    conn: &mut SqliteConnection,
    post_id: &str,
    author_ids: &[String],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM post_authors WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *conn)
        .await?;

    for (position, user_id) in author_ids.iter().enumerate() {
        let exists = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(AppError::not_found(format!("Author {user_id} not found")));
        }

        sqlx::query("INSERT INTO post_authors (post_id, user_id, position) VALUES (?, ?, ?)")
            .bind(post_id)
            .bind(user_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn load_post_response(pool: &SqlitePool, post_id: &str) -> Result<PostResponse, AppError> {
    let post = find_post(pool, post_id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))?;
    to_response(pool, post).await
}

/// Populates tags, authors and the comment count.
async fn to_response(pool: &SqlitePool, post: Post) -> Result<PostResponse, AppError> {
    let tags = sqlx::query_as::<_, TagResponse>(
        "SELECT t.id, t.name, t.slug FROM post_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.post_id = ? ORDER BY t.name",
    )
    .bind(&post.id)
    .fetch_all(pool)
    .await?;

    let authors = sqlx::query_as::<_, AuthorSummary>(
        r#"SELECT u.id, u.username, u.display_name, u.avatar_url
           FROM post_authors pa JOIN users u ON u.id = pa.user_id
           WHERE pa.post_id = ? ORDER BY pa.position"#,
    )
    .bind(&post.id)
    .fetch_all(pool)
    .await?;

    let (comment_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE post_id = ?")
        .bind(&post.id)
        .fetch_one(pool)
        .await?;

    Ok(PostResponse {
        id: post.id,
        title: post.title,
        slug: post.slug,
        content: post.content,
        excerpt: post.excerpt,
        published: post.is_published,
        published_at: post.published_at,
        seo: SeoMetadata {
            meta_title: post.meta_title,
            meta_description: post.meta_description,
            canonical_url: post.canonical_url,
            og_image: post.og_image,
        },
        tags,
        authors,
        comment_count,
        created_at: post.created_at,
        updated_at: post.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, get_json, seed_user, send_empty, send_json, test_state};
    use axum::http::Method;

    fn input(title: &str, tags: &[&str], published: bool) -> CreatePost {
        CreatePost {
            title: title.to_string(),
            content: "<p>Body</p>".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            published,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_derives_slug_and_links_tags() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "writer").await;

        let post = create_post(&state.pool, input("Hello, Rust World", &["Rust", "web"], true), &user)
            .await
            .unwrap();

        assert_eq!(post.slug, "hello-rust-world");
        assert!(post.published_at.is_some());
        assert_eq!(post.authors, vec![AuthorSummary::from(&user)]);
        let tag_names: Vec<_> = post.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, vec!["Rust", "web"]);
        assert_eq!(post.comment_count, 0);
    }

    #[tokio::test]
    async fn create_rejects_missing_fields_and_duplicate_slug() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "writer").await;

        let err = create_post(&state.pool, input("No tags", &[], false), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("tag")));

        create_post(&state.pool, input("Same", &["a"], false), &user).await.unwrap();
        let err = create_post(&state.pool, input("Same", &["a"], false), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Slug already in use"));
    }

    #[tokio::test]
    async fn drafts_are_hidden_from_strangers() {
        let state = test_state().await;
        let author = seed_user(&state.pool, "author").await;
        let stranger = seed_user(&state.pool, "stranger").await;
        create_post(&state.pool, input("Secret Draft", &["wip"], false), &author)
            .await
            .unwrap();

        let err = get_post_by_slug(&state.pool, "secret-draft", Some(&stranger)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(get_post_by_slug(&state.pool, "secret-draft", None).await.is_err());
        assert!(get_post_by_slug(&state.pool, "secret-draft", Some(&author)).await.is_ok());

        let (listed, pagination) = list_posts(&state.pool, PageRequest::new(None, None), None, false)
            .await
            .unwrap();
        assert!(listed.is_empty());
        assert_eq!(pagination.total, 0);
    }

    #[tokio::test]
    async fn list_filters_by_tag() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "tagger").await;
        create_post(&state.pool, input("Alpha", &["rust"], true), &user).await.unwrap();
        create_post(&state.pool, input("Beta", &["go"], true), &user).await.unwrap();

        let (posts, pagination) =
            list_posts(&state.pool, PageRequest::new(None, None), Some("Rust"), false)
                .await
                .unwrap();
        assert_eq!(pagination.total, 1);
        assert_eq!(posts[0].title, "Alpha");
    }

    #[tokio::test]
    async fn update_publishes_and_guards_ownership() {
        let state = test_state().await;
        let author = seed_user(&state.pool, "owner").await;
        let other = seed_user(&state.pool, "other").await;
        let post = create_post(&state.pool, input("Work", &["x"], false), &author)
            .await
            .unwrap();

        let err = update_post(
            &state.pool,
            &post.id,
            UpdatePost { title: Some("Stolen".into()), ..Default::default() },
            &other,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let updated = update_post(
            &state.pool,
            &post.id,
            UpdatePost {
                published: Some(true),
                tags: Some(vec!["y".into()]),
                author_ids: Some(vec![author.id.clone(), other.id.clone()]),
                ..Default::default()
            },
            &author,
        )
        .await
        .unwrap();
        assert!(updated.published);
        assert!(updated.published_at.is_some());
        assert_eq!(updated.title, "Work");
        assert_eq!(updated.tags.len(), 1);
        assert_eq!(updated.authors.len(), 2);

        // Co-authors may now edit.
        update_post(
            &state.pool,
            &post.id,
            UpdatePost { excerpt: Some("Short".into()), ..Default::default() },
            &other,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delete_takes_comments_along() {
        let state = test_state().await;
        let author = seed_user(&state.pool, "deleter").await;
        let post = create_post(&state.pool, input("Doomed", &["x"], true), &author)
            .await
            .unwrap();
        crate::routes::comments::create_comment(
            &state.pool,
            crate::models::CreateComment {
                post_id: post.id.clone(),
                content: "bye".into(),
                author: author.id.clone(),
                parent_id: None,
            },
        )
        .await
        .unwrap();

        delete_post(&state.pool, &post.id, &author).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments")
            .fetch_one(&state.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn http_create_and_fetch_by_slug() {
        let state = test_state().await;
        let user = seed_user(&state.pool, "poster").await;
        let app = crate::create_app(state.clone());

        let (status, body) = send_json(
            app.clone(),
            Method::POST,
            "/api/posts",
            Some(bearer(&state, &user)),
            serde_json::json!({
                "title": "Over HTTP",
                "content": "<p>hi</p>",
                "tags": ["http"],
                "published": true,
                "seo": {"metaTitle": "Over HTTP | Folio"}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["slug"], "over-http");

        let (status, body) = get_json(app, "/api/posts/over-http", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["seo"]["metaTitle"], "Over HTTP | Folio");
        assert_eq!(body["data"]["tags"][0]["name"], "http");
    }

    #[tokio::test]
    async fn http_patch_and_delete_address_posts_by_id() {
        let state = test_state().await;
        let owner = seed_user(&state.pool, "editor").await;
        let outsider = seed_user(&state.pool, "outsider").await;
        let post = create_post(&state.pool, input("By Id", &["routing"], true), &owner)
            .await
            .unwrap();
        let app = crate::create_app(state.clone());
        let uri = format!("/api/posts/{}", post.id);

        let (status, body) = send_json(
            app.clone(),
            Method::PATCH,
            &uri,
            Some(bearer(&state, &owner)),
            serde_json::json!({"excerpt": "Edited over HTTP"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], post.id.as_str());
        assert_eq!(body["data"]["excerpt"], "Edited over HTTP");

        let (status, _) =
            send_empty(app.clone(), Method::DELETE, &uri, Some(bearer(&state, &outsider))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send_empty(app.clone(), Method::DELETE, &uri, Some(bearer(&state, &owner))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Post deleted successfully");

        let (status, _) = get_json(app, "/api/posts/by-id", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
