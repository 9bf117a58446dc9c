//! API Client Module
//!
//! HTTP communication with the news platform: credential exchange,
//! token verification and the news endpoints.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ApiRoutes;
use crate::news::{Attachment, News, NewsDraft};

/// API client for the news backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange credentials for a token and user
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let url = self.url(ApiRoutes::LOGIN);
        debug!("Logging in at: {}", url);

        let response = send(self.client.post(&url).json(&Credentials { email, password })).await?;
        let data = parse::<AuthResponse>(response).await?;

        info!("Login accepted for user: {}", data.user.id);
        Ok(data)
    }

    /// Create an account and receive a token and user
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let url = self.url(ApiRoutes::REGISTER);
        debug!("Registering at: {}", url);

        let response = send(self.client.post(&url).json(&Credentials { email, password })).await?;
        let data = parse::<AuthResponse>(response).await?;

        info!("Registration accepted for user: {}", data.user.id);
        Ok(data)
    }

    /// Resolve a persisted token into the user it belongs to
    pub async fn verify(&self, access_token: &str) -> Result<VerifyResponse, ApiError> {
        let url = self.url(ApiRoutes::VERIFY);
        debug!("Verifying token at: {}", url);

        let response = send(self.client.get(&url).bearer_auth(access_token)).await?;
        parse::<VerifyResponse>(response).await
    }

    pub async fn list_news(&self) -> Result<Vec<News>, ApiError> {
        let response = send(self.client.get(self.url(ApiRoutes::NEWS))).await?;
        let news = parse::<Vec<News>>(response).await?;
        debug!("Fetched {} news items", news.len());
        Ok(news)
    }

    pub async fn get_news(&self, id: &str) -> Result<News, ApiError> {
        let response = send(self.client.get(self.url(&ApiRoutes::news_by_id(id)))).await?;
        parse::<News>(response).await
    }

    /// Publish a new article with its attachments
    pub async fn create_news(
        &self,
        access_token: &str,
        draft: &NewsDraft,
    ) -> Result<News, ApiError> {
        info!("Creating news: {}", draft.title);

        let form = news_form(draft)?;
        let request = self
            .client
            .post(self.url(ApiRoutes::NEWS))
            .bearer_auth(access_token)
            .multipart(form);
        let news = parse::<News>(send(request).await?).await?;

        info!("News created: {}", news.id);
        Ok(news)
    }

    /// Replace title/content and append new attachments
    pub async fn update_news(
        &self,
        access_token: &str,
        id: &str,
        draft: &NewsDraft,
    ) -> Result<News, ApiError> {
        info!("Updating news: {}", id);

        let form = news_form(draft)?;
        let request = self
            .client
            .patch(self.url(&ApiRoutes::news_by_id(id)))
            .bearer_auth(access_token)
            .multipart(form);
        parse::<News>(send(request).await?).await
    }

    pub async fn delete_news(&self, access_token: &str, id: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .delete(self.url(&ApiRoutes::news_by_id(id)))
            .bearer_auth(access_token);
        send(request).await?;

        info!("News deleted: {}", id);
        Ok(())
    }

    pub async fn publish_news(&self, access_token: &str, id: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url(&ApiRoutes::publish(id)))
            .bearer_auth(access_token);
        send(request).await?;

        info!("News published: {}", id);
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.message.or(body.error),
        Err(_) => None,
    }
    .unwrap_or_else(|| format!("Status: {}", status));

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Parse(e.to_string()))
}

fn news_form(draft: &NewsDraft) -> Result<Form, ApiError> {
    let mut form = Form::new()
        .text("title", draft.title.clone())
        .text("content", draft.content.clone());

    for image in draft.new_images() {
        form = form.part("images", attachment_part(image)?);
    }
    for file in draft.new_files() {
        form = form.part("files", attachment_part(file)?);
    }
    Ok(form)
}

fn attachment_part(attachment: &Attachment) -> Result<Part, ApiError> {
    Part::bytes(attachment.bytes.clone())
        .file_name(attachment.file_name.clone())
        .mime_str(&attachment.content_type)
        .map_err(|e| ApiError::Parse(e.to_string()))
}

// Request/Response types

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Identity returned by the API. Stored and displayed, never derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    pub user: User,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    error: Option<String>,
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}
