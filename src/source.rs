use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UNSPLASH_API_URL: &str = "https://api.unsplash.com";
pub const DEFAULT_PER_PAGE: u32 = 24;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed for {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {url}: {detail}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        detail: String,
    },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    MissingCredentials(&'static str),
    #[error("image {0} was not found")]
    NotFound(String),
}

/// An image as the viewer sees it, independent of where it was listed.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryImage {
    pub id: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub author_username: Option<String>,
    pub width: u32,
    pub height: u32,
    pub likes: u32,
    pub display_url: String,
    pub full_url: String,
    pub page_url: Option<String>,
    pub download_location: Option<String>,
    pub source_prefix: &'static str,
}

impl GalleryImage {
    pub fn title(&self) -> String {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Image {}", self.id))
    }
}

pub trait ImageSource: Send + Sync {
    /// Prefix for downloaded file names, e.g. `unsplash`.
    fn prefix(&self) -> &'static str;

    fn list(&self, page: u32) -> Result<Vec<GalleryImage>, SourceError>;

    fn search(&self, query: &str, page: u32) -> Result<Vec<GalleryImage>, SourceError>;

    fn get_photo(&self, id: &str) -> Result<GalleryImage, SourceError>;

    /// Reports a download to the source when it asks for that. Failures are only logged.
    fn track_download(&self, _image: &GalleryImage) {}
}

fn build_http_client() -> Result<Client, SourceError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|source| SourceError::Http {
            url: String::from("<client>"),
            source,
        })
}

fn send_json<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T, SourceError> {
    let response = request
        .header(ACCEPT, "application/json")
        .send()
        .map_err(|source| SourceError::Http {
            url: url.to_string(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .unwrap_or_else(|_| String::from("unable to read error body"));
        return Err(SourceError::Status {
            url: url.to_string(),
            status,
            detail: error_message_from_body(&detail),
        });
    }
    let body = response.text().map_err(|source| SourceError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|source| SourceError::Decode {
        url: url.to_string(),
        source,
    })
}

fn error_message_from_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        errors: Option<Vec<String>>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorBody {
            errors: Some(errors),
            ..
        }) if !errors.is_empty() => errors.join("; "),
        _ => body.trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    id: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    likes: u32,
    description: Option<String>,
    alt_description: Option<String>,
    urls: UnsplashUrls,
    #[serde(default)]
    links: UnsplashLinks,
    user: Option<UnsplashUser>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    full: String,
    regular: String,
}

#[derive(Debug, Default, Deserialize)]
struct UnsplashLinks {
    html: Option<String>,
    download_location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUser {
    name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnsplashSearchResponse {
    results: Vec<UnsplashPhoto>,
}

impl From<UnsplashPhoto> for GalleryImage {
    fn from(photo: UnsplashPhoto) -> Self {
        let (author, author_username) = photo
            .user
            .map(|user| (user.name, user.username))
            .unwrap_or_default();
        Self {
            id: photo.id,
            description: photo.description.or(photo.alt_description),
            author,
            author_username,
            width: photo.width,
            height: photo.height,
            likes: photo.likes,
            display_url: photo.urls.regular,
            full_url: photo.urls.full,
            page_url: photo.links.html,
            download_location: photo.links.download_location,
            source_prefix: UnsplashSource::PREFIX,
        }
    }
}

pub struct UnsplashSource {
    client: Client,
    base_url: String,
    access_key: String,
    per_page: u32,
}

impl UnsplashSource {
    pub const PREFIX: &'static str = "unsplash";

    pub fn new(access_key: &str, per_page: u32) -> Result<Self, SourceError> {
        Self::with_base_url(UNSPLASH_API_URL, access_key, per_page)
    }

    pub fn with_base_url(
        base_url: &str,
        access_key: &str,
        per_page: u32,
    ) -> Result<Self, SourceError> {
        if access_key.trim().is_empty() {
            return Err(SourceError::MissingCredentials(
                "Unsplash access key is not set (UNSPLASH_ACCESS_KEY or settings.toml)",
            ));
        }
        Ok(Self {
            client: build_http_client()?,
            base_url: normalize_base_url(base_url),
            access_key: access_key.trim().to_string(),
            per_page: per_page.max(1),
        })
    }

    fn list_url(&self, page: u32) -> String {
        format!(
            "{}/photos?page={}&per_page={}",
            self.base_url,
            page.max(1),
            self.per_page
        )
    }

    fn search_url(&self, query: &str, page: u32) -> String {
        format!(
            "{}/search/photos?query={}&page={}&per_page={}",
            self.base_url,
            percent_encode(query.trim()),
            page.max(1),
            self.per_page
        )
    }

    fn photo_url(&self, id: &str) -> String {
        format!("{}/photos/{}", self.base_url, percent_encode(id.trim()))
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .query(&[("client_id", self.access_key.as_str())])
    }
}

impl ImageSource for UnsplashSource {
    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn list(&self, page: u32) -> Result<Vec<GalleryImage>, SourceError> {
        let url = self.list_url(page);
        log::debug!("listing Unsplash photos: {url}");
        let photos: Vec<UnsplashPhoto> = send_json(self.get(&url), &url)?;
        Ok(photos.into_iter().map(GalleryImage::from).collect())
    }

    fn search(&self, query: &str, page: u32) -> Result<Vec<GalleryImage>, SourceError> {
        if query.trim().is_empty() {
            return self.list(page);
        }
        let url = self.search_url(query, page);
        log::debug!("searching Unsplash photos: {url}");
        let response: UnsplashSearchResponse = send_json(self.get(&url), &url)?;
        Ok(response
            .results
            .into_iter()
            .map(GalleryImage::from)
            .collect())
    }

    fn get_photo(&self, id: &str) -> Result<GalleryImage, SourceError> {
        let url = self.photo_url(id);
        let photo: UnsplashPhoto = send_json(self.get(&url), &url)?;
        Ok(GalleryImage::from(photo))
    }

    fn track_download(&self, image: &GalleryImage) {
        let Some(location) = image.download_location.as_deref() else {
            return;
        };
        match self.get(location).send() {
            Ok(response) if response.status().is_success() => {
                log::debug!("tracked download of {}", image.id);
            }
            Ok(response) => {
                log::warn!("download tracking for {} returned {}", image.id, response.status());
            }
            Err(err) => log::warn!("download tracking for {} failed: {err}", image.id),
        }
    }
}

/// Responses from the first-party backend are either bare or wrapped in `{ "data": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicImage {
    pub public_image_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedImage {
    pub saved_image_id: String,
    pub public_image_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub user: BackendUser,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveImageRequest<'a> {
    public_image_id: &'a str,
}

impl From<PublicImage> for GalleryImage {
    fn from(image: PublicImage) -> Self {
        let description = [image.title.trim(), image.description.trim()]
            .into_iter()
            .find(|value| !value.is_empty())
            .map(str::to_string);
        Self {
            id: image.public_image_id,
            description,
            author: None,
            author_username: None,
            width: 0,
            height: 0,
            likes: 0,
            display_url: image.image_url.clone(),
            full_url: image.image_url,
            page_url: None,
            download_location: None,
            source_prefix: BackendSource::PREFIX,
        }
    }
}

impl From<SavedImage> for GalleryImage {
    fn from(saved: SavedImage) -> Self {
        GalleryImage::from(PublicImage {
            public_image_id: saved.public_image_id,
            title: saved.title,
            description: saved.description,
            image_url: saved.image_url,
        })
    }
}

/// Thin first-party backend: listing plus saved-image CRUD behind a bearer token.
pub struct BackendSource {
    client: Client,
    base_url: String,
    token: String,
}

impl BackendSource {
    pub const PREFIX: &'static str = "snapsync";

    pub fn new(base_url: &str, token: &str) -> Result<Self, SourceError> {
        if base_url.trim().is_empty() {
            return Err(SourceError::MissingCredentials(
                "backend base URL is not set (SNAPVIEW_API_BASE_URL or settings.toml)",
            ));
        }
        if token.trim().is_empty() {
            return Err(SourceError::MissingCredentials(
                "backend token is not set (SNAPVIEW_API_TOKEN or settings.toml)",
            ));
        }
        Ok(Self {
            client: build_http_client()?,
            base_url: normalize_base_url(base_url),
            token: token.trim().to_string(),
        })
    }

    pub fn login(base_url: &str, email: &str, password: &str) -> Result<Session, SourceError> {
        let client = build_http_client()?;
        let url = format!("{}/users/login", normalize_base_url(base_url));
        let request = client
            .post(&url)
            .json(&LoginRequest { email, password });
        let envelope: Envelope<Session> = send_json(request, &url)?;
        let session = envelope.into_inner();
        log::info!("logged in as {}", session.user.username);
        Ok(session)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("ngrok-skip-browser-warning", "true")
    }

    pub fn fetch_images(&self) -> Result<Vec<PublicImage>, SourceError> {
        let url = format!("{}/images", self.base_url);
        let envelope: Envelope<Vec<PublicImage>> =
            send_json(self.authorized(self.client.get(&url)), &url)?;
        Ok(envelope.into_inner())
    }
}

impl ImageSource for BackendSource {
    fn prefix(&self) -> &'static str {
        Self::PREFIX
    }

    fn list(&self, _page: u32) -> Result<Vec<GalleryImage>, SourceError> {
        Ok(self
            .fetch_images()?
            .into_iter()
            .map(GalleryImage::from)
            .collect())
    }

    fn search(&self, query: &str, page: u32) -> Result<Vec<GalleryImage>, SourceError> {
        let images = self.list(page)?;
        Ok(filter_by_query(images, query))
    }

    fn get_photo(&self, id: &str) -> Result<GalleryImage, SourceError> {
        self.fetch_images()?
            .into_iter()
            .find(|image| image.public_image_id == id)
            .map(GalleryImage::from)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

impl crate::favorites::SavedImagesService for BackendSource {
    fn list_saved(&self) -> Result<Vec<SavedImage>, SourceError> {
        let url = format!("{}/saved-images", self.base_url);
        let envelope: Envelope<Vec<SavedImage>> =
            send_json(self.authorized(self.client.get(&url)), &url)?;
        Ok(envelope.into_inner())
    }

    fn save(&self, public_image_id: &str) -> Result<SavedImage, SourceError> {
        let url = format!("{}/saved-images", self.base_url);
        let request = self
            .authorized(self.client.post(&url))
            .json(&SaveImageRequest { public_image_id });
        let envelope: Envelope<SavedImage> = send_json(request, &url)?;
        Ok(envelope.into_inner())
    }

    fn delete(&self, saved_image_id: &str) -> Result<(), SourceError> {
        let url = format!("{}/saved-images/{saved_image_id}", self.base_url);
        let response = self
            .authorized(self.client.delete(&url))
            .send()
            .map_err(|source| SourceError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status,
                detail: String::from("Failed to delete saved image"),
            });
        }
        Ok(())
    }
}

/// Case-insensitive match on title/description; a blank query keeps everything.
pub fn filter_by_query(images: Vec<GalleryImage>, query: &str) -> Vec<GalleryImage> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return images;
    }
    images
        .into_iter()
        .filter(|image| {
            image
                .description
                .as_deref()
                .map(|text| text.to_lowercase().contains(&query))
                .unwrap_or(false)
        })
        .collect()
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

pub fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
