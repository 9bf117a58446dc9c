//! Commands Module
//!
//! View-layer actions. Each one reads the session, calls the API and returns
//! plain data for the front end to display.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::api::{ApiError, User};
use crate::guard::{Access, AccessDenied, Route, RouteGuard};
use crate::news::{self, Attachment, News, NewsDraft, NewsFilter};
use crate::session::SessionError;
use crate::storage::StorageError;
use crate::AppState;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Only the author can {action} this article")]
    NotAuthor { action: &'static str },

    #[error("{path:?} is not an image")]
    NotAnImage { path: PathBuf },

    #[error("Unknown path: {0}")]
    UnknownRoute(String),

    #[error("Failed to read {path:?}: {source}")]
    Attachment {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Access(#[from] AccessDenied),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Signed out, but the saved token could not be removed: {0}")]
    Storage(#[from] StorageError),
}

// Forms

#[derive(Debug, Clone)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.password != self.confirm_password {
            return Err(CommandError::PasswordMismatch);
        }
        Ok(())
    }
}

/// Changes to apply on top of a stored article
#[derive(Debug, Clone, Default)]
pub struct NewsChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub add_images: Vec<Attachment>,
    pub add_files: Vec<Attachment>,
    pub remove_images: Vec<usize>,
    pub remove_files: Vec<usize>,
}

impl NewsChanges {
    pub fn apply(self, draft: &mut NewsDraft) {
        if let Some(title) = self.title {
            draft.title = title;
        }
        if let Some(content) = self.content {
            draft.content = content;
        }

        // Highest index first so earlier removals don't shift later ones.
        let mut images = self.remove_images;
        images.sort_unstable_by(|a, b| b.cmp(a));
        images.dedup();
        for index in images {
            draft.remove_image(index);
        }
        let mut files = self.remove_files;
        files.sort_unstable_by(|a, b| b.cmp(a));
        files.dedup();
        for index in files {
            draft.remove_file(index);
        }

        for image in self.add_images {
            draft.add_image(image);
        }
        for file in self.add_files {
            draft.add_file(file);
        }
    }
}

// Response types for the front end

#[derive(Debug, Serialize)]
pub struct NewsListing {
    pub items: Vec<News>,
    pub authors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NewsView {
    pub news: News,
    pub html: String,
    pub image_urls: Vec<String>,
    pub file_urls: Vec<String>,
    pub can_edit: bool,
}

// Commands

pub async fn login(state: &AppState, form: &LoginForm) -> Result<User, CommandError> {
    info!("Login requested");
    Ok(state.session.login(&form.email, &form.password).await?)
}

/// Mismatched confirmation never reaches the session.
pub async fn register(state: &AppState, form: &RegisterForm) -> Result<User, CommandError> {
    form.validate()?;
    info!("Registration requested");
    Ok(state.session.register(&form.email, &form.password).await?)
}

pub fn logout(state: &AppState) -> Result<(), CommandError> {
    Ok(state.session.logout()?)
}

pub fn whoami(state: &AppState) -> Option<User> {
    state.session.user()
}

pub async fn list_news(state: &AppState, filter: &NewsFilter) -> Result<NewsListing, CommandError> {
    let all = state.api.list_news().await?;
    let authors = news::authors(&all);
    let items = filter.apply(&all).into_iter().cloned().collect();
    Ok(NewsListing { items, authors })
}

pub async fn show_news(state: &AppState, id: &str) -> Result<NewsView, CommandError> {
    let article = state.api.get_news(id).await?;
    let uploads = &state.config.uploads_url;
    let can_edit = state
        .session
        .user()
        .map(|user| article.is_authored_by(&user))
        .unwrap_or(false);

    Ok(NewsView {
        html: news::render_markdown(&article.content),
        image_urls: article.image_urls(uploads),
        file_urls: article.file_urls(uploads),
        can_edit,
        news: article,
    })
}

pub async fn create_news(state: &AppState, draft: &NewsDraft) -> Result<News, CommandError> {
    let token = authorize(state, &Route::NewsCreate).await?;
    if !draft.is_submittable() {
        return Err(CommandError::EmptyTitle);
    }
    Ok(state.api.create_news(&token, draft).await?)
}

pub async fn edit_news(
    state: &AppState,
    id: &str,
    changes: NewsChanges,
) -> Result<News, CommandError> {
    let token = authorize(state, &Route::NewsEdit(id.to_string())).await?;
    let current = authored(state, id, "edit").await?;

    let mut draft = NewsDraft::from_news(&current);
    changes.apply(&mut draft);
    debug!(
        "Edited draft attachments: images={:?} files={:?}",
        draft.image_previews(),
        draft.file_previews()
    );
    if !draft.is_submittable() {
        return Err(CommandError::EmptyTitle);
    }
    Ok(state.api.update_news(&token, id, &draft).await?)
}

pub async fn delete_news(state: &AppState, id: &str) -> Result<(), CommandError> {
    let token = authorize(state, &Route::NewsDetail(id.to_string())).await?;
    authored(state, id, "delete").await?;
    state.api.delete_news(&token, id).await?;
    state.session.navigator().navigate(Route::Home);
    Ok(())
}

pub async fn publish_news(state: &AppState, id: &str) -> Result<(), CommandError> {
    let token = authorize(state, &Route::NewsDetail(id.to_string())).await?;
    authored(state, id, "publish").await?;
    Ok(state.api.publish_news(&token, id).await?)
}

/// Guard decision for an application path
pub async fn open_route(state: &AppState, path: &str) -> Result<(Route, Access), CommandError> {
    let route = Route::parse(path).ok_or_else(|| CommandError::UnknownRoute(path.to_string()))?;
    let access = RouteGuard::resolve(&state.session, &route).await;
    debug!("Guard decision for {}: {:?}", route, access);
    Ok((route, access))
}

pub fn load_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>, CommandError> {
    paths.iter().map(|path| load_attachment(path)).collect()
}

/// Like [`load_attachments`], rejecting anything that is not an image
pub fn load_images(paths: &[PathBuf]) -> Result<Vec<Attachment>, CommandError> {
    let images = load_attachments(paths)?;
    for (path, image) in paths.iter().zip(&images) {
        if !image.is_image() {
            return Err(CommandError::NotAnImage { path: path.clone() });
        }
    }
    Ok(images)
}

fn load_attachment(path: &Path) -> Result<Attachment, CommandError> {
    Attachment::from_path(path).map_err(|source| CommandError::Attachment {
        path: path.to_path_buf(),
        source,
    })
}

/// Signed-in check for mutating actions. Article actions are gated like a
/// protected route even though the detail page itself is public.
async fn authorize(state: &AppState, route: &Route) -> Result<String, CommandError> {
    if route.is_protected() {
        RouteGuard::require(&state.session, route).await?;
    }
    state.session.bearer_token().ok_or_else(|| {
        CommandError::Access(AccessDenied {
            route: route.clone(),
        })
    })
}

async fn authored(state: &AppState, id: &str, action: &'static str) -> Result<News, CommandError> {
    let article = state.api.get_news(id).await?;
    let is_author = state
        .session
        .user()
        .map(|user| article.is_authored_by(&user))
        .unwrap_or(false);
    if !is_author {
        return Err(CommandError::NotAuthor { action });
    }
    Ok(article)
}
