use axum::{
    Router,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, parse_id};
use crate::models::{
    ApiResponse, AuthorSummary, CommentResponse, CommentThread, CreateComment, CreateCommentBody,
    PageQuery, PageRequest, Pagination, Reaction, RepliesQuery, UpdateComment, User,
};
use crate::routes::auth::{extract_current_user, extract_optional_user, find_user};
use crate::routes::posts::is_post_author;
use crate::state::AppState;

/// Replies attached to each root comment in a post listing.
pub const REPLY_PREVIEW_LIMIT: i64 = 3;
pub const MAX_COMMENT_LEN: usize = 5000;
pub const MAX_COMMENT_IMAGES: usize = 10;

const COMMENT_SELECT: &str = r#"
    SELECT
        c.id AS id,
        c.post_id AS post_id,
        c.parent_id AS parent_id,
        c.content AS content,
        c.created_at AS created_at,
        c.updated_at AS updated_at,
        (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id) AS reply_count,
        u.id AS author_id,
        u.username AS author_username,
        u.display_name AS author_display_name,
        u.avatar_url AS author_avatar_url
    FROM comments c
    JOIN users u ON u.id = c.author_id
"#;

#[derive(Debug, FromRow)]
struct CommentRow {
    id: String,
    post_id: String,
    parent_id: Option<String>,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    reply_count: i64,
    author_id: String,
    author_username: String,
    author_display_name: Option<String>,
    author_avatar_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct CommentOwner {
    id: String,
    post_id: String,
    author_id: String,
}

pub fn comments_routes() -> Router<AppState> {
    Router::new()
        .route("/posts/{post}/comments", get(list_post_comments))
        .route("/comments", post(create_comment_handler))
        .route(
            "/comments/{comment_id}",
            get(get_comment_handler)
                .patch(update_comment_handler)
                .delete(delete_comment_handler),
        )
        .route(
            "/comments/{comment_id}/like",
            post(like_comment_handler).delete(unlike_comment_handler),
        )
        .route(
            "/comments/{comment_id}/dislike",
            post(dislike_comment_handler).delete(undislike_comment_handler),
        )
        .route("/users/me/comments", get(list_my_comments))
}

// ============================
// Handlers
// ============================

async fn list_post_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    let page = PageRequest::new(query.page, query.limit);
    let (comments, pagination) =
        get_comments_by_post_id(&state.pool, &post_id, page, viewer.as_ref()).await?;
    Ok(Json(ApiResponse::success(comments).with_pagination(pagination)))
}

async fn create_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCommentBody>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = create_comment(
        &state.pool,
        CreateComment {
            post_id: body.post_id,
            content: body.content,
            author: current_user.id,
            parent_id: body.parent_id,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(comment).with_message("Comment created")),
    ))
}

async fn get_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
    Query(query): Query<RepliesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = extract_optional_user(&state, &headers).await?;
    let replies_page = PageRequest::new(query.replies_page, query.replies_limit);
    let thread =
        get_comment_by_id(&state.pool, &comment_id, replies_page, viewer.as_ref()).await?;
    Ok(Json(ApiResponse::success(thread)))
}

async fn update_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
    Json(input): Json<UpdateComment>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = update_comment(&state.pool, &comment_id, input, &current_user.id).await?;
    Ok(Json(ApiResponse::success(comment).with_message("Comment updated")))
}

async fn delete_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let removed = delete_comment(&state.pool, &comment_id, &current_user.id).await?;
    Ok(Json(
        ApiResponse::success(serde_json::json!({ "deletedCount": removed }))
            .with_message("Comment deleted successfully"),
    ))
}

async fn like_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = like_comment(&state.pool, &comment_id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(comment)))
}

async fn unlike_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = unlike_comment(&state.pool, &comment_id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(comment)))
}

async fn dislike_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = dislike_comment(&state.pool, &comment_id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(comment)))
}

async fn undislike_comment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(comment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let comment = undislike_comment(&state.pool, &comment_id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(comment)))
}

async fn list_my_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let current_user = extract_current_user(&state, &headers).await?;
    let page = PageRequest::new(query.page, query.limit);
    let (comments, pagination) =
        list_comments_by_author(&state.pool, &current_user.id, page).await?;
    Ok(Json(ApiResponse::success(comments).with_pagination(pagination)))
}

// ============================
// Queries
// ============================

/// Root comments of a post, newest first, each with a short preview of its
/// earliest replies and the live count of all direct replies.
pub async fn get_comments_by_post_id(
    pool: &SqlitePool,
    post_id: &str,
    page: PageRequest,
    viewer: Option<&User>,
) -> Result<(Vec<CommentResponse>, Pagination), AppError> {
    let post_id = parse_id(post_id, "postId")?;
    ensure_post_visible(pool, &post_id, viewer).await?;

    let (total,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM comments WHERE post_id = ? AND parent_id IS NULL",
    )
    .bind(&post_id)
    .fetch_one(pool)
    .await?;

    let sql = format!(
        "{COMMENT_SELECT} WHERE c.post_id = ? AND c.parent_id IS NULL \
         ORDER BY c.created_at DESC, c.rowid DESC LIMIT ? OFFSET ?"
    );
    let roots = sqlx::query_as::<_, CommentRow>(&sql)
        .bind(&post_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    let mut responses = Vec::with_capacity(roots.len());
    for root in roots {
        let preview = fetch_replies(pool, &root.id, REPLY_PREVIEW_LIMIT, 0).await?;
        let mut replies = Vec::with_capacity(preview.len());
        for reply in preview {
            replies.push(hydrate(pool, reply).await?);
        }

        let mut response = hydrate(pool, root).await?;
        response.replies = replies;
        responses.push(response);
    }

    Ok((responses, Pagination::new(total, page.page, page.limit)))
}

/// A single comment and one page of its direct replies, oldest first.
pub async fn get_comment_by_id(
    pool: &SqlitePool,
    comment_id: &str,
    replies_page: PageRequest,
    viewer: Option<&User>,
) -> Result<CommentThread, AppError> {
    let comment_id = parse_id(comment_id, "commentId")?;
    let comment = fetch_comment_response(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    ensure_post_visible(pool, &comment.post_id, viewer).await?;

    let rows = fetch_replies(pool, &comment_id, replies_page.limit, replies_page.offset()).await?;
    let mut replies = Vec::with_capacity(rows.len());
    for row in rows {
        replies.push(hydrate(pool, row).await?);
    }

    let replies_pagination =
        Pagination::new(comment.reply_count, replies_page.page, replies_page.limit);

    Ok(CommentThread {
        comment,
        replies,
        replies_pagination,
    })
}

pub async fn list_comments_by_author(
    pool: &SqlitePool,
    author_id: &str,
    page: PageRequest,
) -> Result<(Vec<CommentResponse>, Pagination), AppError> {
    let author_id = parse_id(author_id, "userId")?;

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE author_id = ?")
        .bind(&author_id)
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "{COMMENT_SELECT} WHERE c.author_id = ? ORDER BY c.created_at DESC, c.rowid DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, CommentRow>(&sql)
        .bind(&author_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    let mut responses = Vec::with_capacity(rows.len());
    for row in rows {
        responses.push(hydrate(pool, row).await?);
    }

    Ok((responses, Pagination::new(total, page.page, page.limit)))
}

// ============================
// Mutations
// ============================

pub async fn create_comment(
    pool: &SqlitePool,
    input: CreateComment,
) -> Result<CommentResponse, AppError> {
    let post_id = parse_id(&input.post_id, "postId")?;
    let author_id = parse_id(&input.author, "author")?;
    let parent_id = input
        .parent_id
        .as_deref()
        .map(|id| parse_id(id, "parentId"))
        .transpose()?;
    let content = validate_content(&input.content)?;

    let author = find_user(pool, &author_id)
        .await?
        .ok_or_else(|| AppError::not_found("Author not found"))?;
    ensure_post_visible(pool, &post_id, Some(&author)).await?;

    if let Some(parent_id) = &parent_id {
        let parent = find_comment_owner(pool, parent_id)
            .await?
            .ok_or_else(|| AppError::not_found("Parent comment not found"))?;

        if parent.post_id != post_id {
            return Err(AppError::validation(
                "Parent comment does not belong to this post",
            ));
        }
    }

    let comment_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO comments (id, post_id, author_id, parent_id, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&comment_id)
    .bind(&post_id)
    .bind(&author_id)
    .bind(&parent_id)
    .bind(&content)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    tracing::info!(%comment_id, %post_id, parent_id = ?parent_id, "comment created");

    fetch_comment_response(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::internal("created comment vanished"))
}

pub async fn update_comment(
    pool: &SqlitePool,
    comment_id: &str,
    input: UpdateComment,
    user_id: &str,
) -> Result<CommentResponse, AppError> {
    let comment_id = parse_id(comment_id, "commentId")?;
    let user_id = parse_id(user_id, "userId")?;

    let target = find_comment_owner(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;

    if target.author_id != user_id {
        tracing::warn!(%comment_id, %user_id, "rejected comment update by non-author");
        return Err(AppError::forbidden("Not authorized to update this comment"));
    }

    if input.content.is_none() && input.images.is_none() {
        return Err(AppError::validation("Nothing to update"));
    }

    let content = input.content.as_deref().map(validate_content).transpose()?;
    let images = input.images.map(validate_images).transpose()?;

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE comments SET content = COALESCE(?, content), updated_at = ? WHERE id = ?")
        .bind(&content)
        .bind(Utc::now())
        .bind(&target.id)
        .execute(&mut *tx)
        .await?;

    if let Some(images) = images {
        sqlx::query("DELETE FROM comment_images WHERE comment_id = ?")
            .bind(&target.id)
            .execute(&mut *tx)
            .await?;

        for (position, url) in images.iter().enumerate() {
            sqlx::query("INSERT INTO comment_images (comment_id, position, url) VALUES (?, ?, ?)")
                .bind(&target.id)
                .bind(position as i64)
                .bind(url)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    fetch_comment_response(pool, &target.id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))
}

/// Removes a comment together with every reply beneath it, at any depth.
/// Returns the number of comments removed.
pub async fn delete_comment(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<u64, AppError> {
    let comment_id = parse_id(comment_id, "commentId")?;
    let user_id = parse_id(user_id, "userId")?;

    let target = find_comment_owner(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;

    if target.author_id != user_id {
        tracing::warn!(%comment_id, %user_id, "rejected comment delete by non-author");
        return Err(AppError::forbidden("Not authorized to delete this comment"));
    }

    let result = sqlx::query(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM comments WHERE id = ?
            UNION ALL
            SELECT c.id FROM comments c JOIN subtree s ON c.parent_id = s.id
        )
        DELETE FROM comments WHERE id IN (SELECT id FROM subtree)
        "#,
    )
    .bind(&target.id)
    .execute(pool)
    .await?;

    let removed = result.rows_affected();
    tracing::info!(%comment_id, removed, "comment subtree deleted");

    Ok(removed)
}

pub async fn like_comment(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<CommentResponse, AppError> {
    set_reaction(pool, comment_id, user_id, Reaction::Like).await
}

pub async fn dislike_comment(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<CommentResponse, AppError> {
    set_reaction(pool, comment_id, user_id, Reaction::Dislike).await
}

pub async fn unlike_comment(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<CommentResponse, AppError> {
    clear_reaction(pool, comment_id, user_id, Reaction::Like).await
}

pub async fn undislike_comment(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<CommentResponse, AppError> {
    clear_reaction(pool, comment_id, user_id, Reaction::Dislike).await
}

/// Replaces any earlier reaction by the same user; the primary key on
/// (comment_id, user_id) keeps likes and dislikes mutually exclusive.
async fn set_reaction(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
    reaction: Reaction,
) -> Result<CommentResponse, AppError> {
    let (comment_id, user_id) = reaction_target(pool, comment_id, user_id).await?;

    sqlx::query(
        r#"
        INSERT INTO comment_reactions (comment_id, user_id, reaction, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (comment_id, user_id)
        DO UPDATE SET reaction = excluded.reaction, created_at = excluded.created_at
        "#,
    )
    .bind(&comment_id)
    .bind(&user_id)
    .bind(reaction.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    fetch_comment_response(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))
}

async fn clear_reaction(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
    reaction: Reaction,
) -> Result<CommentResponse, AppError> {
    let (comment_id, user_id) = reaction_target(pool, comment_id, user_id).await?;

    sqlx::query(
        "DELETE FROM comment_reactions WHERE comment_id = ? AND user_id = ? AND reaction = ?",
    )
    .bind(&comment_id)
    .bind(&user_id)
    .bind(reaction.as_str())
    .execute(pool)
    .await?;

    fetch_comment_response(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))
}

async fn reaction_target(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<(String, String), AppError> {
    let comment_id = parse_id(comment_id, "commentId")?;
    let user_id = parse_id(user_id, "userId")?;

    let target = find_comment_owner(pool, &comment_id)
        .await?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    let user = find_user(pool, &user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    ensure_post_visible(pool, &target.post_id, Some(&user)).await?;

    Ok((comment_id, user_id))
}

// ============================
// Helpers
// ============================

fn validate_content(raw: &str) -> Result<String, AppError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::validation("Comment content is required"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::validation(format!(
            "Comment must be at most {MAX_COMMENT_LEN} characters"
        )));
    }
    Ok(content.to_string())
}

fn validate_images(images: Vec<String>) -> Result<Vec<String>, AppError> {
    if images.len() > MAX_COMMENT_IMAGES {
        return Err(AppError::validation(format!(
            "A comment may carry at most {MAX_COMMENT_IMAGES} images"
        )));
    }

    images
        .into_iter()
        .map(|url| {
            let url = url.trim().to_string();
            if url.is_empty() {
                Err(AppError::validation("Image url must not be empty"))
            } else {
                Ok(url)
            }
        })
        .collect()
}

/// Drafts only exist for their authors and admins; everyone else gets the
/// same 404 as for a missing post.
async fn ensure_post_visible(
    pool: &SqlitePool,
    post_id: &str,
    viewer: Option<&User>,
) -> Result<(), AppError> {
    let (is_published,) =
        sqlx::query_as::<_, (bool,)>("SELECT is_published FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Post not found"))?;
    if is_published {
        return Ok(());
    }

    let allowed = match viewer {
        Some(user) if user.is_admin => true,
        Some(user) => is_post_author(pool, post_id, &user.id).await?,
        None => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::not_found("Post not found"))
    }
}

async fn find_comment_owner(
    pool: &SqlitePool,
    comment_id: &str,
) -> Result<Option<CommentOwner>, sqlx::Error> {
    sqlx::query_as::<_, CommentOwner>("SELECT id, post_id, author_id FROM comments WHERE id = ?")
        .bind(comment_id)
        .fetch_optional(pool)
        .await
}

async fn fetch_replies(
    pool: &SqlitePool,
    parent_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<CommentRow>, sqlx::Error> {
    let sql = format!(
        "{COMMENT_SELECT} WHERE c.parent_id = ? ORDER BY c.created_at ASC, c.rowid ASC LIMIT ? OFFSET ?"
    );
    sqlx::query_as::<_, CommentRow>(&sql)
        .bind(parent_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

async fn fetch_comment_response(
    pool: &SqlitePool,
    comment_id: &str,
) -> Result<Option<CommentResponse>, sqlx::Error> {
    let sql = format!("{COMMENT_SELECT} WHERE c.id = ?");
    let row = sqlx::query_as::<_, CommentRow>(&sql)
        .bind(comment_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(hydrate(pool, row).await?)),
        None => Ok(None),
    }
}

/// Attaches images and reactions to a fetched row.
async fn hydrate(pool: &SqlitePool, row: CommentRow) -> Result<CommentResponse, sqlx::Error> {
    let images: Vec<(String,)> =
        sqlx::query_as("SELECT url FROM comment_images WHERE comment_id = ? ORDER BY position")
            .bind(&row.id)
            .fetch_all(pool)
            .await?;

    let reactions: Vec<(String, String)> = sqlx::query_as(
        "SELECT user_id, reaction FROM comment_reactions WHERE comment_id = ? ORDER BY created_at, rowid",
    )
    .bind(&row.id)
    .fetch_all(pool)
    .await?;

    let mut likes = Vec::new();
    let mut dislikes = Vec::new();
    for (user_id, reaction) in reactions {
        if reaction == Reaction::Like.as_str() {
            likes.push(user_id);
        } else {
            dislikes.push(user_id);
        }
    }

    Ok(CommentResponse {
        id: row.id,
        post_id: row.post_id,
        parent_id: row.parent_id,
        author: AuthorSummary {
            id: row.author_id,
            username: row.author_username,
            display_name: row.author_display_name,
            avatar_url: row.author_avatar_url,
        },
        content: row.content,
        images: images.into_iter().map(|(url,)| url).collect(),
        likes,
        dislikes,
        reply_count: row.reply_count,
        replies: Vec::new(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
