//! Posts, comments, likes and flags.
//!
//! Like and flag updates are read-modify-write transactions on the whole
//! post or comment node, so concurrent reactions never lose each other.

use super::{find_by_username, present, require_key, ApiError, AppState};
use crate::extract::{JsonBody, QueryParams};
use crate::feed::{has_any_tag, normalize_tags, page_of, parse_tag_list, PageParams};
use crate::models::*;
use crate::store::{self, Database, Query};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

fn require_post_id(post_id: Option<&str>) -> Result<&str, ApiError> {
    require_key(post_id, "post_id")
}

fn require_username(username: &str) -> Result<&str, ApiError> {
    let username = present(Some(username)).ok_or_else(|| ApiError::invalid("username is required"))?;
    validate_username(username).map_err(ApiError::invalid)?;
    Ok(username)
}

fn comment_path(query: &CommentRef) -> Result<String, ApiError> {
    let post_id = require_post_id(query.post_id.as_deref())?;
    let comment_id = require_key(query.comment_id.as_deref(), "comment_id")?;
    Ok(format!("posts/{post_id}/comments/{comment_id}"))
}

/// POST /posts - Publish a post
pub async fn create_post(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let username = require_username(&req.username)?;
    let tags = normalize_tags(&req.tags);
    if tags.is_empty() {
        return Err(ApiError::invalid("at least one tag is required"));
    }

    let post = Post {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        title: req.title.trim().to_string(),
        content: req.content,
        image_url: req.image_url,
        created_at: state.clock.next_key(),
        is_resolved: false,
        tags,
        ..Post::default()
    };
    store::write(state.db.as_ref(), &format!("posts/{}", post.id), &post).await?;

    info!(post_id = %post.id, "Post created");
    Ok((StatusCode::CREATED, Json(post)))
}

/// One page in sort order, as cut by the store
async fn fetch_page(db: &dyn Database, params: &PageParams) -> Result<Vec<Post>, ApiError> {
    let mut query = Query::order_by("created_at").limit(params.limit);
    if let Some(start) = params.start_at() {
        query = query.start_at(start);
    }
    let posts = store::query_as::<Post>(db, "posts", &query).await?;
    debug!(count = posts.len(), limit = params.limit, "Fetched post page");
    Ok(posts.into_iter().map(|(_, post)| post).collect())
}

fn strip_comments(page: &mut PostPage) {
    for post in &mut page.posts {
        post.comments.clear();
    }
}

/// GET /posts - Newest-first page of posts
pub async fn list_posts(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<PostsQuery>,
) -> Result<Json<PostPage>, ApiError> {
    let params = PageParams::parse(query.limit.as_deref(), query.start_after.as_deref());
    let db = state.db.as_ref();
    let mut page = page_of(fetch_page(db, &params).await?, &params, |_| true);

    if query.include_comments.as_deref() == Some("true") {
        let reads = page.posts.iter().map(|post| {
            let path = format!("posts/{}/comments", post.id);
            async move { store::read::<BTreeMap<String, Comment>>(db, &path).await }
        });
        let comments = try_join_all(reads).await?;
        for (post, found) in page.posts.iter_mut().zip(comments) {
            post.comments = found.unwrap_or_default();
        }
    } else {
        strip_comments(&mut page);
    }

    Ok(Json(page))
}

/// GET /posts/tags - Page of posts carrying any of the given tags
pub async fn posts_by_tags(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<TagsQuery>,
) -> Result<Json<PostPage>, ApiError> {
    let tags = parse_tag_list(query.tags.as_deref().unwrap_or_default());
    if tags.is_empty() {
        return Err(ApiError::invalid("tags are required"));
    }
    let params = PageParams::parse(query.limit.as_deref(), query.start_after.as_deref());
    let posts = fetch_page(state.db.as_ref(), &params).await?;
    let mut page = page_of(posts, &params, |post| has_any_tag(post, &tags));
    strip_comments(&mut page);
    Ok(Json(page))
}

/// GET /posts/username - Page of posts by one author
pub async fn posts_by_username(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<UsernameQuery>,
) -> Result<Json<PostPage>, ApiError> {
    let username = present(query.username.as_deref())
        .ok_or_else(|| ApiError::invalid("username is required"))?;
    let params = PageParams::parse(query.limit.as_deref(), query.start_after.as_deref());
    let posts = fetch_page(state.db.as_ref(), &params).await?;
    let mut page = page_of(posts, &params, |post| post.username == username);
    strip_comments(&mut page);
    Ok(Json(page))
}

/// POST /posts/comment - Comment on a post
pub async fn add_comment(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<PostRef>,
    JsonBody(req): JsonBody<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let post_id = require_post_id(query.post_id.as_deref())?;
    let username = present(Some(req.username.as_str()))
        .ok_or_else(|| ApiError::invalid("username is required"))?;
    let content = present(Some(req.content.as_str()))
        .ok_or_else(|| ApiError::invalid("content is required"))?;

    let db = state.db.as_ref();
    let (_, author) = find_by_username(db, username)
        .await?
        .ok_or(ApiError::NotFound("user not found"))?;
    if db.get(&format!("posts/{post_id}/id")).await?.is_none() {
        return Err(ApiError::NotFound("post not found"));
    }

    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        content: content.to_string(),
        created_at: Utc::now().timestamp(),
        role: author.role,
        is_admin: author.role.is_admin(),
        reactions: Reactions::default(),
    };
    store::write(db, &format!("posts/{post_id}/comments/{}", comment.id), &comment).await?;
    store::transact::<i64, ApiError, _>(db, &format!("posts/{post_id}/comment_count"), |count| {
        Ok(Some(count.unwrap_or(0) + 1))
    })
    .await?;

    info!(post_id, comment_id = %comment.id, "Comment added");
    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST /posts/like - Toggle a like on a post
pub async fn like_post(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<PostRef>,
    JsonBody(req): JsonBody<ReactionRequest>,
) -> Result<Json<LikeResponse>, ApiError> {
    let post_id = require_post_id(query.post_id.as_deref())?;
    let username = require_username(&req.username)?;

    let mut liked = false;
    let post = store::transact::<Post, ApiError, _>(
        state.db.as_ref(),
        &format!("posts/{post_id}"),
        |post| {
            let mut post = post.ok_or(ApiError::NotFound("post not found"))?;
            liked = post.reactions.toggle_like(username);
            Ok(Some(post))
        },
    )
    .await?
    .ok_or(ApiError::NotFound("post not found"))?;

    Ok(Json(LikeResponse {
        message: if liked { "post liked" } else { "post unliked" },
        like_count: post.reactions.like_count,
        liked,
    }))
}

/// POST /comments/like - Toggle a like on a comment
pub async fn like_comment(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<CommentRef>,
    JsonBody(req): JsonBody<ReactionRequest>,
) -> Result<Json<LikeResponse>, ApiError> {
    let path = comment_path(&query)?;
    let username = require_username(&req.username)?;

    let mut liked = false;
    let comment = store::transact::<Comment, ApiError, _>(state.db.as_ref(), &path, |comment| {
        let mut comment = comment.ok_or(ApiError::NotFound("comment not found"))?;
        liked = comment.reactions.toggle_like(username);
        Ok(Some(comment))
    })
    .await?
    .ok_or(ApiError::NotFound("comment not found"))?;

    Ok(Json(LikeResponse {
        message: if liked { "comment liked" } else { "comment unliked" },
        like_count: comment.reactions.like_count,
        liked,
    }))
}

/// POST /posts/flag - Report a post (one flag per username)
pub async fn flag_post(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<PostRef>,
    JsonBody(req): JsonBody<ReactionRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    let post_id = require_post_id(query.post_id.as_deref())?;
    let username = require_username(&req.username)?;

    let mut added = false;
    let post = store::transact::<Post, ApiError, _>(
        state.db.as_ref(),
        &format!("posts/{post_id}"),
        |post| {
            let mut post = post.ok_or(ApiError::NotFound("post not found"))?;
            added = post.reactions.flag(username);
            Ok(Some(post))
        },
    )
    .await?
    .ok_or(ApiError::NotFound("post not found"))?;

    if added {
        info!(post_id, flag_count = post.reactions.flag_count, "Post flagged");
    }
    Ok(Json(FlagResponse {
        message: if added { "post flagged" } else { "post already flagged" },
        flag_count: post.reactions.flag_count,
    }))
}

/// POST /comments/flag - Report a comment (one flag per username)
pub async fn flag_comment(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<CommentRef>,
    JsonBody(req): JsonBody<ReactionRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    let path = comment_path(&query)?;
    let username = require_username(&req.username)?;

    let mut added = false;
    let comment = store::transact::<Comment, ApiError, _>(state.db.as_ref(), &path, |comment| {
        let mut comment = comment.ok_or(ApiError::NotFound("comment not found"))?;
        added = comment.reactions.flag(username);
        Ok(Some(comment))
    })
    .await?
    .ok_or(ApiError::NotFound("comment not found"))?;

    Ok(Json(FlagResponse {
        message: if added { "comment flagged" } else { "comment already flagged" },
        flag_count: comment.reactions.flag_count,
    }))
}

/// GET /posts/flag - Every flagged post, newest first
pub async fn flagged_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, ApiError> {
    let query = Query::order_by("flag_count").start_at(1);
    let mut posts: Vec<Post> = store::query_as::<Post>(state.db.as_ref(), "posts", &query)
        .await?
        .into_iter()
        .map(|(_, mut post)| {
            post.comments.clear();
            post
        })
        .collect();
    posts.sort_by_key(|post| post.created_at);
    Ok(Json(posts))
}

/// GET /comments/flag - Flagged comments grouped by post id
pub async fn flagged_comments(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, BTreeMap<String, Comment>>>, ApiError> {
    let posts = store::read_children::<Post>(state.db.as_ref(), "posts").await?;
    let flagged = posts
        .into_iter()
        .filter_map(|(post_id, post)| {
            let comments: BTreeMap<String, Comment> = post
                .comments
                .into_iter()
                .filter(|(_, c)| c.reactions.flag_count > 0)
                .collect();
            (!comments.is_empty()).then_some((post_id, comments))
        })
        .collect();
    Ok(Json(flagged))
}
