use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eframe::egui::{
    self, ColorImage, ResizeDirection, Sense, TextureHandle, TextureOptions, ViewportCommand,
};
use reqwest::blocking::Client;

use crate::config::{favorites_file_path, settings_file_path, Settings, SourceKind};
use crate::download::{
    DirectorySaver, DownloadController, DownloadOutcome, DownloadRequest, HttpTransport,
};
use crate::favorites::{
    execute_remote, resolve_favorite_images, FavoritesStore, PendingToggle, RemoteResult,
    SavedImages, SavedImagesService,
};
use crate::gesture::{GestureEngine, Point};
use crate::launch::LaunchRequest;
use crate::renderer::{decode_color_image, image_rect};
use crate::source::{
    BackendSource, GalleryImage, ImageSource, SavedImage, Session, SourceError, UnsplashSource,
};

const APP_TITLE: &str = "SnapView";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const GALLERY_PANEL_WIDTH: f32 = 260.0;
const DETAILS_PANEL_WIDTH: f32 = 300.0;
const PROGRESS_PANEL_WIDTH: f32 = 320.0;
const POLL_INTERVAL: Duration = Duration::from_millis(16);

type SourceHandles = (Arc<dyn ImageSource>, Option<Arc<dyn SavedImagesService>>);

struct PendingRemoteToggle {
    pending: PendingToggle,
    receiver: Receiver<Result<RemoteResult, String>>,
}

struct ViewerImage {
    image_id: String,
    texture: TextureHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GalleryMode {
    Browse,
    Favorites,
}

#[derive(Default)]
struct LoginForm {
    base_url: String,
    email: String,
    password: String,
    error: Option<String>,
    receiver: Option<Receiver<Result<Session, String>>>,
}

/// Stateful collaborators the shell is built from.
pub struct AppServices {
    pub settings_path: Option<PathBuf>,
    pub favorites: FavoritesStore,
    pub download: Option<DownloadController>,
    pub http: Option<Client>,
}

impl AppServices {
    pub fn for_settings(settings: &Settings) -> Self {
        let favorites = favorites_file_path()
            .map(FavoritesStore::load)
            .unwrap_or_else(FavoritesStore::in_memory);
        let download = build_download_controller(settings)
            .map_err(|err| log::error!("downloads unavailable: {err:#}"))
            .ok();
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| log::error!("could not initialize HTTP client: {err}"))
            .ok();
        Self {
            settings_path: settings_file_path(),
            favorites,
            download,
            http,
        }
    }
}

pub struct GalleryViewerApp {
    settings: Settings,
    settings_path: Option<PathBuf>,
    source_kind: SourceKind,
    source: Option<Arc<dyn ImageSource>>,
    saved_service: Option<Arc<dyn SavedImagesService>>,
    http: Option<Client>,
    favorites: FavoritesStore,
    saved_images: SavedImages,
    images: Vec<GalleryImage>,
    mode: GalleryMode,
    selected_index: Option<usize>,
    search_text: String,
    active_query: String,
    page: u32,
    pending_launch_request: Option<LaunchRequest>,
    pending_photo_id: Option<String>,
    gallery_receiver: Option<Receiver<Result<Vec<GalleryImage>, String>>>,
    saved_list_receiver: Option<Receiver<Result<Vec<SavedImage>, String>>>,
    remote_toggles: Vec<PendingRemoteToggle>,
    image_receiver: Option<Receiver<(String, Result<ColorImage, String>)>>,
    viewer_image: Option<ViewerImage>,
    gesture: GestureEngine,
    touches: HashMap<u64, egui::Pos2>,
    download: Option<DownloadController>,
    login: Option<LoginForm>,
    status_line: String,
}

impl GalleryViewerApp {
    pub fn new(
        settings: Settings,
        initial_request: Option<LaunchRequest>,
        initial_status: Option<String>,
    ) -> Self {
        let services = AppServices::for_settings(&settings);
        Self::with_services(settings, services, initial_request, initial_status)
    }

    pub fn with_services(
        settings: Settings,
        services: AppServices,
        initial_request: Option<LaunchRequest>,
        initial_status: Option<String>,
    ) -> Self {
        let AppServices {
            settings_path,
            favorites,
            download,
            http,
        } = services;
        let source_kind = initial_request
            .as_ref()
            .and_then(|request| request.source)
            .unwrap_or(settings.source);

        let mut app = Self {
            settings,
            settings_path,
            source_kind,
            source: None,
            saved_service: None,
            http,
            favorites,
            saved_images: SavedImages::new(),
            images: Vec::new(),
            mode: GalleryMode::Browse,
            selected_index: None,
            search_text: String::new(),
            active_query: String::new(),
            page: 1,
            pending_launch_request: Some(initial_request.unwrap_or_else(LaunchRequest::browse)),
            pending_photo_id: None,
            gallery_receiver: None,
            saved_list_receiver: None,
            remote_toggles: Vec::new(),
            image_receiver: None,
            viewer_image: None,
            gesture: GestureEngine::new(),
            touches: HashMap::new(),
            download,
            login: None,
            status_line: initial_status.unwrap_or_default(),
        };
        app.connect_source();
        app
    }

    fn apply_dark_background(ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        let line_base = egui::Color32::from_gray(28);
        let line_hover = egui::Color32::from_gray(48);

        visuals.panel_fill = egui::Color32::from_gray(8);
        visuals.window_fill = egui::Color32::from_gray(12);
        visuals.extreme_bg_color = egui::Color32::BLACK;
        visuals.window_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.hovered.bg_stroke = egui::Stroke::new(1.0, line_hover);
        ctx.set_visuals(visuals);
    }

    fn connect_source(&mut self) {
        self.source = None;
        self.saved_service = None;
        match build_source(self.source_kind, &self.settings) {
            Ok((source, saved_service)) => {
                log::info!("using image source {}", source.prefix());
                self.source = Some(source);
                self.saved_service = saved_service;
            }
            Err(err) => {
                log::error!("image source unavailable: {err}");
                self.status_line = format!("Source error: {err}");
            }
        }
    }

    fn persist_settings(&self) {
        let Some(path) = self.settings_path.as_deref() else {
            return;
        };
        if let Err(err) = self.settings.save(path) {
            log::warn!("could not save settings: {err:#}");
        }
    }

    /// Reconnects the current source and reloads whatever the gallery shows.
    fn reload_source(&mut self) {
        self.images.clear();
        self.close_viewer();
        self.connect_source();
        match self.mode {
            GalleryMode::Browse => self.request_gallery(self.search_text.clone(), 1),
            GalleryMode::Favorites => self.request_favorites(),
        }
        self.request_saved_list();
    }

    fn is_loading(&self) -> bool {
        self.gallery_receiver.is_some()
            || self.image_receiver.is_some()
            || self.saved_list_receiver.is_some()
            || !self.remote_toggles.is_empty()
    }

    fn download_in_progress(&self) -> bool {
        self.download
            .as_ref()
            .is_some_and(DownloadController::is_in_progress)
    }

    fn selected_image(&self) -> Option<&GalleryImage> {
        self.selected_index.and_then(|index| self.images.get(index))
    }

    fn favorites_count(&self) -> usize {
        if self.saved_service.is_some() {
            self.saved_images.len()
        } else {
            self.favorites.favorites().len()
        }
    }

    fn has_favorites(&self) -> bool {
        if self.saved_service.is_some() {
            !self.saved_images.is_empty()
        } else {
            !self.favorites.favorites().is_empty()
        }
    }

    fn is_favorite(&self, image_id: &str) -> bool {
        if self.saved_service.is_some() {
            self.saved_images.is_saved(image_id)
        } else {
            self.favorites.is_favorite(image_id)
        }
    }

    fn handle_launch_request(&mut self, request: LaunchRequest) {
        if let Some(kind) = request.source {
            if kind != self.source_kind {
                self.source_kind = kind;
                self.connect_source();
            }
        }
        self.pending_photo_id = request.photo_id;
        let query = request.query.unwrap_or_default();
        self.search_text = query.clone();
        self.request_gallery(query, request.page);
        self.request_saved_list();
    }

    fn request_gallery(&mut self, query: String, page: u32) {
        let Some(source) = self.source.clone() else {
            return;
        };
        self.mode = GalleryMode::Browse;
        self.active_query = query.clone();
        self.page = page.max(1);
        let page = self.page;
        self.status_line = if query.trim().is_empty() {
            format!("Loading page {page}...")
        } else {
            format!("Searching \"{}\"...", query.trim())
        };

        let (tx, rx) = mpsc::channel::<Result<Vec<GalleryImage>, String>>();
        thread::spawn(move || {
            let result = source.search(&query, page).map_err(|err| err.to_string());
            let _ = tx.send(result);
        });
        self.gallery_receiver = Some(rx);
    }

    fn request_favorites(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        self.mode = GalleryMode::Favorites;
        self.status_line = "Loading favorites...".to_string();
        let saved_service = self.saved_service.clone();
        let ids = self
            .favorites
            .favorites()
            .iter()
            .map(|favorite| favorite.id.clone())
            .collect::<Vec<_>>();

        let (tx, rx) = mpsc::channel::<Result<Vec<GalleryImage>, String>>();
        thread::spawn(move || {
            let result = match saved_service {
                Some(service) => service
                    .list_saved()
                    .map(|records| records.into_iter().map(GalleryImage::from).collect())
                    .map_err(|err| err.to_string()),
                None => Ok(resolve_favorite_images(source.as_ref(), &ids)),
            };
            let _ = tx.send(result);
        });
        self.gallery_receiver = Some(rx);
    }

    fn request_saved_list(&mut self) {
        let Some(service) = self.saved_service.clone() else {
            return;
        };
        let (tx, rx) = mpsc::channel::<Result<Vec<SavedImage>, String>>();
        thread::spawn(move || {
            let result = service.list_saved().map_err(|err| err.to_string());
            let _ = tx.send(result);
        });
        self.saved_list_receiver = Some(rx);
    }

    fn poll_gallery(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.gallery_receiver.take() else {
            return;
        };

        match receiver.try_recv() {
            Ok(Ok(images)) => {
                self.status_line = match (self.mode, images.len()) {
                    (GalleryMode::Favorites, 0) => "No saved images yet.".to_string(),
                    (GalleryMode::Favorites, count) => format!("{count} favorites."),
                    (GalleryMode::Browse, 0) => "No images found.".to_string(),
                    (GalleryMode::Browse, count) => format!("Page {}: {count} images.", self.page),
                };
                self.images = images;
                self.close_viewer();
                if let Some(photo_id) = self.pending_photo_id.take() {
                    match self.images.iter().position(|image| image.id == photo_id) {
                        Some(index) => self.select_image(index),
                        None => {
                            self.status_line = format!("Photo {photo_id} is not on this page.");
                        }
                    }
                }
            }
            Ok(Err(err)) => {
                self.status_line = format!("Could not load images: {err}");
            }
            Err(TryRecvError::Empty) => {
                self.gallery_receiver = Some(receiver);
                ctx.request_repaint_after(POLL_INTERVAL);
            }
            Err(TryRecvError::Disconnected) => {
                self.status_line = "Gallery worker disconnected.".to_string();
            }
        }
    }

    fn poll_saved_list(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.saved_list_receiver.take() else {
            return;
        };

        match receiver.try_recv() {
            Ok(Ok(records)) => {
                log::info!("loaded {} saved images", records.len());
                self.saved_images.replace_all(records);
            }
            Ok(Err(err)) => {
                log::error!("could not load saved images: {err}");
            }
            Err(TryRecvError::Empty) => {
                self.saved_list_receiver = Some(receiver);
                ctx.request_repaint_after(POLL_INTERVAL);
            }
            Err(TryRecvError::Disconnected) => {}
        }
    }

    fn poll_remote_toggles(&mut self, ctx: &egui::Context) {
        let mut still_pending = Vec::with_capacity(self.remote_toggles.len());
        for toggle in std::mem::take(&mut self.remote_toggles) {
            match toggle.receiver.try_recv() {
                Ok(result) => {
                    if let Err(err) = &result {
                        self.status_line = format!("Could not update saved images: {err}");
                    }
                    self.saved_images.complete(toggle.pending, result);
                }
                Err(TryRecvError::Empty) => still_pending.push(toggle),
                Err(TryRecvError::Disconnected) => {
                    self.saved_images
                        .complete(toggle.pending, Err("worker disconnected".to_string()));
                }
            }
        }
        if !still_pending.is_empty() {
            ctx.request_repaint_after(POLL_INTERVAL);
        }
        self.remote_toggles = still_pending;
    }

    fn toggle_favorite(&mut self, image_id: &str) {
        if let Some(service) = self.saved_service.clone() {
            let Some(pending) = self.saved_images.begin_toggle(image_id) else {
                return;
            };
            let action = pending.action.clone();
            let (tx, rx) = mpsc::channel::<Result<RemoteResult, String>>();
            thread::spawn(move || {
                let _ = tx.send(execute_remote(service.as_ref(), &action));
            });
            self.remote_toggles.push(PendingRemoteToggle {
                pending,
                receiver: rx,
            });
            return;
        }

        self.favorites.toggle(image_id);
        self.persist_favorites();
    }

    fn persist_favorites(&mut self) {
        if let Err(err) = self.favorites.save() {
            log::warn!("could not persist favorites: {err:#}");
            self.status_line = format!("Could not save favorites: {err:#}");
        }
    }

    fn clear_local_favorites(&mut self) {
        self.favorites.clear();
        self.persist_favorites();
        if self.mode == GalleryMode::Favorites && self.saved_service.is_none() {
            self.images.clear();
            self.close_viewer();
        }
        self.status_line = "Local favorites cleared.".to_string();
    }

    fn open_login(&mut self) {
        self.login = Some(LoginForm {
            base_url: self.settings.api_base_url.clone(),
            ..LoginForm::default()
        });
    }

    fn submit_login(&mut self) {
        let Some(form) = self.login.as_mut() else {
            return;
        };
        if form.base_url.trim().is_empty() || form.email.trim().is_empty() || form.password.is_empty()
        {
            form.error = Some("Server, email and password are required.".to_string());
            return;
        }
        form.error = None;
        let base_url = form.base_url.trim().to_string();
        let email = form.email.trim().to_string();
        let password = form.password.clone();
        let (tx, rx) = mpsc::channel::<Result<Session, String>>();
        thread::spawn(move || {
            let result =
                BackendSource::login(&base_url, &email, &password).map_err(|err| err.to_string());
            let _ = tx.send(result);
        });
        form.receiver = Some(rx);
    }

    fn poll_login(&mut self, ctx: &egui::Context) {
        let Some(form) = self.login.as_mut() else {
            return;
        };
        let Some(receiver) = form.receiver.take() else {
            return;
        };

        match receiver.try_recv() {
            Ok(Ok(session)) => {
                let base_url = form.base_url.trim().to_string();
                self.login = None;
                self.apply_session(base_url, session);
            }
            Ok(Err(err)) => {
                form.password.clear();
                form.error = Some(err);
            }
            Err(TryRecvError::Empty) => {
                form.receiver = Some(receiver);
                ctx.request_repaint_after(POLL_INTERVAL);
            }
            Err(TryRecvError::Disconnected) => {
                form.error = Some("Sign-in worker disconnected.".to_string());
            }
        }
    }

    fn apply_session(&mut self, base_url: String, session: Session) {
        self.settings.api_base_url = base_url;
        self.settings
            .sign_in(&session.access_token, &session.user.username);
        self.persist_settings();
        self.source_kind = SourceKind::Backend;
        self.reload_source();
        self.status_line = format!("Signed in as {}.", session.user.username);
    }

    fn sign_out(&mut self) {
        self.settings.sign_out();
        self.persist_settings();
        self.saved_images = SavedImages::new();
        self.remote_toggles.clear();
        if self.source_kind == SourceKind::Backend {
            self.reload_source();
        }
        if self.source.is_some() {
            self.status_line = "Signed out.".to_string();
        }
    }

    fn select_image(&mut self, index: usize) {
        let Some(image) = self.images.get(index) else {
            return;
        };
        let image_id = image.id.clone();
        let url = image.display_url.clone();
        self.selected_index = Some(index);
        self.gesture.reset_for_new_image(&image_id);
        self.touches.clear();
        if self
            .viewer_image
            .as_ref()
            .is_some_and(|viewer| viewer.image_id == image_id)
        {
            return;
        }
        self.viewer_image = None;

        let Some(client) = self.http.clone() else {
            self.status_line = "HTTP client unavailable.".to_string();
            return;
        };
        let (tx, rx) = mpsc::channel::<(String, Result<ColorImage, String>)>();
        thread::spawn(move || {
            let result = fetch_color_image(&client, &url).map_err(|err| format!("{err:#}"));
            let _ = tx.send((image_id, result));
        });
        self.image_receiver = Some(rx);
    }

    fn close_viewer(&mut self) {
        self.selected_index = None;
        self.viewer_image = None;
        self.image_receiver = None;
        self.touches.clear();
        self.gesture = GestureEngine::new();
    }

    fn step_selection(&mut self, direction: i32) {
        if self.images.is_empty() {
            return;
        }
        let len = self.images.len() as i32;
        let current = self.selected_index.map(|index| index as i32).unwrap_or(-1);
        let next = (current + direction).rem_euclid(len) as usize;
        self.select_image(next);
    }

    fn poll_viewer_image(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.image_receiver.take() else {
            return;
        };

        match receiver.try_recv() {
            Ok((image_id, result)) => {
                if self.gesture.image_id() != Some(image_id.as_str()) {
                    return;
                }
                match result {
                    Ok(color_image) => {
                        let texture = ctx.load_texture(
                            format!("viewer-{image_id}"),
                            color_image,
                            TextureOptions::LINEAR,
                        );
                        self.viewer_image = Some(ViewerImage { image_id, texture });
                    }
                    Err(err) => {
                        self.status_line = format!("Could not load image: {err}");
                    }
                }
            }
            Err(TryRecvError::Empty) => {
                self.image_receiver = Some(receiver);
                ctx.request_repaint_after(POLL_INTERVAL);
            }
            Err(TryRecvError::Disconnected) => {
                self.status_line = "Image worker disconnected.".to_string();
            }
        }
    }

    fn start_download(&mut self) {
        let Some(image) = self.selected_image().cloned() else {
            return;
        };
        let Some(download) = self.download.as_mut() else {
            self.status_line = "Downloads are unavailable.".to_string();
            return;
        };
        let request = DownloadRequest::for_image(image.source_prefix, &image.id, &image.full_url);
        if let Err(err) = download.start(request) {
            self.status_line = format!("Download not started: {err}");
            return;
        }
        if let Some(source) = self.source.clone() {
            thread::spawn(move || source.track_download(&image));
        }
    }

    fn cancel_download(&mut self) {
        if let Some(download) = self.download.as_mut() {
            if download.cancel() {
                self.status_line = "Download cancelled.".to_string();
            }
        }
    }

    fn poll_download(&mut self, ctx: &egui::Context) {
        let Some(download) = self.download.as_mut() else {
            return;
        };
        match download.poll(Instant::now()) {
            Some(DownloadOutcome::Completed(saved)) => {
                self.status_line = format!("Saved {}", saved.path.display());
            }
            Some(DownloadOutcome::Failed(err)) => {
                self.status_line = format!("Download failed: {err}");
            }
            None => {}
        }
        if download.progress().is_some() {
            ctx.request_repaint_after(POLL_INTERVAL);
        }
    }

    fn choose_download_folder(&mut self) {
        let Some(folder) = rfd::FileDialog::new()
            .set_directory(self.settings.download_dir())
            .pick_folder()
        else {
            return;
        };
        self.settings.download_dir = Some(folder.clone());
        if let Some(download) = self.download.as_mut() {
            download.set_saver(Arc::new(DirectorySaver::new(folder.clone())));
        }
        self.persist_settings();
        self.status_line = format!("Downloads go to {}", folder.display());
    }

    fn handle_keyboard(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() || self.selected_index.is_none() {
            return;
        }

        let (zoom_in, zoom_out, close, next, previous) = ctx.input(|input| {
            (
                input.key_pressed(egui::Key::Plus) || input.key_pressed(egui::Key::Equals),
                input.key_pressed(egui::Key::Minus),
                input.key_pressed(egui::Key::Escape),
                input.key_pressed(egui::Key::ArrowRight),
                input.key_pressed(egui::Key::ArrowLeft),
            )
        });
        if zoom_in {
            self.gesture.zoom_in();
        }
        if zoom_out {
            self.gesture.zoom_out();
        }
        if next {
            self.step_selection(1);
        } else if previous {
            self.step_selection(-1);
        }
        if close {
            self.close_viewer();
        }
    }

    fn route_touch_events(&mut self, ctx: &egui::Context) {
        let mut touched = false;
        ctx.input(|input| {
            for event in &input.events {
                if let egui::Event::Touch { id, phase, pos, .. } = event {
                    match phase {
                        egui::TouchPhase::Start | egui::TouchPhase::Move => {
                            self.touches.insert(id.0, *pos);
                            touched = true;
                        }
                        egui::TouchPhase::End | egui::TouchPhase::Cancel => {
                            // Ends are applied in event order so a finger landing in the
                            // same frame starts a fresh pinch.
                            self.touches.remove(&id.0);
                            self.gesture.on_touch_end(self.touches.len());
                        }
                    }
                }
            }
        });

        if touched {
            if let Some(distance) = pinch_distance(&self.touches) {
                self.gesture.on_pinch_update(distance);
            }
        }
    }

    fn show_viewer(&mut self, ui: &mut egui::Ui) {
        let Some(texture) = self.viewer_image.as_ref().map(|viewer| viewer.texture.clone()) else {
            ui.allocate_ui_with_layout(
                ui.available_size(),
                egui::Layout::centered_and_justified(egui::Direction::TopDown),
                |ui| {
                    if self.image_receiver.is_some() {
                        ui.label("Loading image...");
                    } else {
                        ui.label("Image unavailable.");
                    }
                },
            );
            return;
        };

        let available = ui.available_size();
        let (canvas_rect, response) = ui.allocate_exact_size(available, Sense::click_and_drag());
        let image_size = texture.size_vec2();
        if image_size.x <= 0.0 || image_size.y <= 0.0 || !canvas_rect.is_positive() {
            return;
        }

        if response.double_clicked() {
            self.gesture.reset();
        }

        let multi_touch = self.touches.len() >= 2;
        if !multi_touch {
            if response.drag_started() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.gesture.on_drag_start(Point::new(pos.x, pos.y));
                }
            }
            if response.dragged() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.gesture.on_drag_move(Point::new(pos.x, pos.y));
                }
            }
        }
        if response.drag_stopped() {
            self.gesture.on_drag_end();
        }

        if response.hovered() {
            // egui reports wheel-up as positive y; the engine expects DOM-style deltaY.
            let scroll = ui.input(|input| input.raw_scroll_delta.y);
            if scroll.abs() > f32::EPSILON {
                self.gesture.on_wheel(-scroll);
            }
        }

        if self.gesture.transform().is_zoomed() {
            let icon = if self.gesture.is_dragging() {
                egui::CursorIcon::Grabbing
            } else {
                egui::CursorIcon::Grab
            };
            response.on_hover_cursor(icon);
        }

        let rect = image_rect(canvas_rect, image_size, &self.gesture.transform());
        ui.painter_at(canvas_rect).image(
            texture.id(),
            rect,
            egui::Rect::from_min_max(egui::Pos2::ZERO, egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    fn show_zoom_controls(&mut self, ctx: &egui::Context) {
        let mut zoom_in = false;
        let mut zoom_out = false;
        let can_zoom_in = self.gesture.can_zoom_in();
        let can_zoom_out = self.gesture.can_zoom_out();
        let percent = (self.gesture.transform().scale * 100.0).round();

        egui::Area::new(egui::Id::new("zoom-controls"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -16.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.horizontal(|ui| {
                        zoom_out = ui
                            .add_enabled(can_zoom_out, egui::Button::new("−"))
                            .on_hover_text("Zoom out (-)")
                            .clicked();
                        ui.label(format!("{percent:.0}%"));
                        zoom_in = ui
                            .add_enabled(can_zoom_in, egui::Button::new("+"))
                            .on_hover_text("Zoom in (+)")
                            .clicked();
                    });
                });
            });

        if zoom_in {
            self.gesture.zoom_in();
        }
        if zoom_out {
            self.gesture.zoom_out();
        }
    }

    fn show_details(&mut self, ctx: &egui::Context) {
        let Some(image) = self.selected_image().cloned() else {
            return;
        };
        let is_favorite = self.is_favorite(&image.id);
        let favorite_pending = self.saved_images.is_pending(&image.id);
        let download_busy = self.download_in_progress() || self.download.is_none();
        let mut toggle_favorite = false;
        let mut download_clicked = false;
        let mut close_clicked = false;

        egui::Area::new(egui::Id::new("details-overlay-right"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-10.0, 36.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.set_min_width(DETAILS_PANEL_WIDTH);
                    ui.set_max_width(DETAILS_PANEL_WIDTH);
                    ui.horizontal(|ui| {
                        ui.strong("Image Details");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            close_clicked = ui.button("X").on_hover_text("Close (Esc)").clicked();
                        });
                    });
                    ui.separator();

                    if let Some(author) = image.author.as_deref() {
                        ui.label(egui::RichText::new("PHOTOGRAPHER").small().weak());
                        match image.author_username.as_deref() {
                            Some(username) => ui.label(format!("{author} (@{username})")),
                            None => ui.label(author),
                        };
                        ui.add_space(6.0);
                    }
                    if let Some(description) = image.description.as_deref() {
                        ui.label(egui::RichText::new("DESCRIPTION").small().weak());
                        ui.label(description);
                        ui.add_space(6.0);
                    }
                    if image.width > 0 && image.height > 0 {
                        ui.label(format!("Dimensions: {} × {}", image.width, image.height));
                    }
                    if image.likes > 0 {
                        ui.label(format!("{} likes", image.likes));
                    }
                    ui.add_space(8.0);

                    ui.horizontal(|ui| {
                        let favorite_label = if is_favorite { "♥ Favorited" } else { "♡ Favorite" };
                        toggle_favorite = ui
                            .add_enabled(!favorite_pending, egui::Button::new(favorite_label))
                            .clicked();
                        download_clicked = ui
                            .add_enabled(!download_busy, egui::Button::new("Download"))
                            .clicked();
                    });
                    if let Some(page_url) = image.page_url.as_deref() {
                        ui.add_space(4.0);
                        ui.hyperlink_to("View on Unsplash", page_url);
                    }
                });
            });

        if toggle_favorite {
            self.toggle_favorite(&image.id);
        }
        if download_clicked {
            self.start_download();
        }
        if close_clicked {
            self.close_viewer();
        }
    }

    fn show_download_progress(&mut self, ctx: &egui::Context) {
        let Some((percent, file_name)) = self.download.as_ref().and_then(|download| {
            download
                .progress_view()
                .map(|view| (view.percent, view.file_name.to_string()))
        }) else {
            return;
        };
        let mut cancel_clicked = false;

        egui::Area::new(egui::Id::new("download-progress"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-24.0, -24.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.set_min_width(PROGRESS_PANEL_WIDTH);
                    ui.set_max_width(PROGRESS_PANEL_WIDTH);
                    ui.horizontal(|ui| {
                        ui.vertical(|ui| {
                            ui.label("Downloading");
                            ui.label(egui::RichText::new(&file_name).small().weak());
                        });
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Min), |ui| {
                            cancel_clicked = ui
                                .small_button("X")
                                .on_hover_text("Cancel download")
                                .clicked();
                        });
                    });
                    ui.add(
                        egui::ProgressBar::new((percent / 100.0).clamp(0.0, 1.0))
                            .text(format!("{}%", percent.round())),
                    );
                });
            });

        if cancel_clicked {
            self.cancel_download();
        }
    }

    fn show_gallery_list(&mut self, ui: &mut egui::Ui) -> Option<GalleryAction> {
        let mut action = None;
        let loading = self.gallery_receiver.is_some();
        let browsing = self.mode == GalleryMode::Browse;

        ui.horizontal(|ui| {
            if ui.selectable_label(browsing, "Browse").clicked() && !browsing {
                action = Some(GalleryAction::Browse);
            }
            let favorites_label = format!("♥ Favorites ({})", self.favorites_count());
            if ui.selectable_label(!browsing, favorites_label).clicked() {
                action = Some(GalleryAction::Favorites);
            }
        });
        ui.separator();

        if browsing {
            ui.horizontal(|ui| {
                if ui
                    .add_enabled(!loading && self.page > 1, egui::Button::new("‹ Prev"))
                    .clicked()
                {
                    action = Some(GalleryAction::Page(self.page - 1));
                }
                ui.label(format!("Page {}", self.page));
                if ui
                    .add_enabled(!loading && !self.images.is_empty(), egui::Button::new("Next ›"))
                    .clicked()
                {
                    action = Some(GalleryAction::Page(self.page + 1));
                }
            });
            ui.separator();
        }

        if self.images.is_empty() {
            let message = if loading {
                "Loading..."
            } else if !browsing && !self.has_favorites() {
                "No saved images yet. Tap ♡ on an image to save it here."
            } else {
                "No images."
            };
            ui.label(message);
            return action;
        }

        egui::ScrollArea::vertical()
            .id_salt("gallery-list")
            .show(ui, |ui| {
                for (index, image) in self.images.iter().enumerate() {
                    let is_selected = self.selected_index == Some(index);
                    let is_favorite = self.is_favorite(&image.id);
                    let pending = self.saved_images.is_pending(&image.id);
                    ui.horizontal(|ui| {
                        let heart = if is_favorite { "♥" } else { "♡" };
                        if ui
                            .add_enabled(!pending, egui::Button::new(heart).small())
                            .on_hover_text(if is_favorite {
                                "Remove from favorites"
                            } else {
                                "Add to favorites"
                            })
                            .clicked()
                        {
                            action = Some(GalleryAction::ToggleFavorite(image.id.clone()));
                        }
                        let mut title = image.title();
                        if let Some(author) = image.author.as_deref() {
                            title.push_str(&format!(" · {author}"));
                        }
                        if ui
                            .add(egui::SelectableLabel::new(is_selected, title))
                            .clicked()
                        {
                            action = Some(GalleryAction::Open(index));
                        }
                    });
                }
            });

        action
    }

    fn show_login_window(&mut self, ctx: &egui::Context) {
        let Some(form) = self.login.as_mut() else {
            return;
        };
        let busy = form.receiver.is_some();
        let mut submit = false;
        let mut cancel = false;

        egui::Window::new("Sign in")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                egui::Grid::new("login-form")
                    .num_columns(2)
                    .spacing([8.0, 6.0])
                    .show(ui, |ui| {
                        ui.label("Server");
                        ui.add(
                            egui::TextEdit::singleline(&mut form.base_url)
                                .hint_text("https://api.example.com")
                                .desired_width(240.0),
                        );
                        ui.end_row();
                        ui.label("Email");
                        ui.add(egui::TextEdit::singleline(&mut form.email).desired_width(240.0));
                        ui.end_row();
                        ui.label("Password");
                        let password = ui.add(
                            egui::TextEdit::singleline(&mut form.password)
                                .password(true)
                                .desired_width(240.0),
                        );
                        if password.lost_focus()
                            && ui.input(|input| input.key_pressed(egui::Key::Enter))
                        {
                            submit = true;
                        }
                        ui.end_row();
                    });

                if let Some(error) = form.error.as_deref() {
                    ui.colored_label(ui.visuals().error_fg_color, error);
                }
                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(!busy, egui::Button::new("Sign in"))
                        .clicked()
                    {
                        submit = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                    if busy {
                        ui.spinner();
                    }
                });
            });

        if cancel {
            self.login = None;
        } else if submit && !busy {
            self.submit_login();
        }
    }

    fn show_resize_grip(&self, ctx: &egui::Context) {
        const GRIP_SIZE: f32 = 18.0;
        const MARGIN: f32 = 1.0;

        egui::Area::new(egui::Id::new("window-resize-grip"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(MARGIN, -MARGIN))
            .show(ctx, |ui| {
                let (rect, response) = ui
                    .allocate_exact_size(egui::vec2(GRIP_SIZE, GRIP_SIZE), Sense::click_and_drag());

                if response.drag_started() {
                    ui.ctx().send_viewport_cmd(ViewportCommand::BeginResize(
                        ResizeDirection::SouthWest,
                    ));
                }
                if response.hovered() && !response.dragged() {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeSouthWest);
                }

                let stroke = egui::Stroke::new(1.0, egui::Color32::from_gray(72));
                let r = rect.shrink(3.0);
                for offset in [0.0_f32, 4.0, 8.0] {
                    ui.painter().line_segment(
                        [
                            egui::pos2(r.left() + 4.0 + offset, r.bottom()),
                            egui::pos2(r.left(), r.bottom() - 4.0 - offset),
                        ],
                        stroke,
                    );
                }
            });
    }
}

enum GalleryAction {
    Browse,
    Favorites,
    Open(usize),
    ToggleFavorite(String),
    Page(u32),
}

impl eframe::App for GalleryViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        Self::apply_dark_background(ctx);

        if let Some(request) = self.pending_launch_request.take() {
            self.handle_launch_request(request);
        }

        self.poll_gallery(ctx);
        self.poll_saved_list(ctx);
        self.poll_remote_toggles(ctx);
        self.poll_viewer_image(ctx);
        self.poll_download(ctx);
        self.poll_login(ctx);

        if self.selected_index.is_some() {
            self.route_touch_events(ctx);
        }
        self.handle_keyboard(ctx);

        let mut close_requested = false;
        ctx.input_mut(|input| {
            if input.consume_key(egui::Modifiers::COMMAND, egui::Key::W) {
                close_requested = true;
            }
        });
        if close_requested {
            ctx.send_viewport_cmd(ViewportCommand::Close);
            return;
        }

        let mut search_submitted = false;
        let mut choose_folder_clicked = false;
        let mut clear_favorites_clicked = false;
        let mut sign_in_clicked = false;
        let mut sign_out_clicked = false;
        let mut switch_source = None;
        let has_local_favorites = !self.favorites.favorites().is_empty();
        let signed_in_as = self
            .settings
            .is_signed_in()
            .then(|| self.settings.api_username.clone());

        let is_maximized = ctx.input(|input| input.viewport().maximized.unwrap_or(false));
        let title_text = format!("{APP_TITLE} v{APP_VERSION}");
        let bar_fill = ctx.style().visuals.panel_fill;
        egui::TopBottomPanel::top("titlebar")
            .show_separator_line(false)
            .frame(egui::Frame::none().fill(bar_fill))
            .exact_height(30.0)
            .show(ctx, |ui| {
                let button_size = egui::vec2(28.0, 22.0);
                ui.add_space(2.0);
                ui.horizontal(|ui| {
                    ui.add_space(4.0);
                    ui.menu_button("☰", |ui| {
                        if ui.button("Choose download folder...").clicked() {
                            choose_folder_clicked = true;
                            ui.close_menu();
                        }
                        if ui
                            .add_enabled(
                                has_local_favorites,
                                egui::Button::new("Clear local favorites"),
                            )
                            .clicked()
                        {
                            clear_favorites_clicked = true;
                            ui.close_menu();
                        }
                        ui.separator();
                        match signed_in_as.as_deref() {
                            Some(username) => {
                                let label = if username.is_empty() {
                                    "Sign out".to_string()
                                } else {
                                    format!("Sign out ({username})")
                                };
                                if ui.button(label).clicked() {
                                    sign_out_clicked = true;
                                    ui.close_menu();
                                }
                            }
                            None => {
                                if ui.button("Sign in...").clicked() {
                                    sign_in_clicked = true;
                                    ui.close_menu();
                                }
                            }
                        }
                        ui.separator();
                        for (label, kind) in
                            [("Unsplash", SourceKind::Unsplash), ("Backend", SourceKind::Backend)]
                        {
                            if ui
                                .radio(self.source_kind == kind, label)
                                .clicked()
                            {
                                switch_source = Some(kind);
                                ui.close_menu();
                            }
                        }
                    });

                    let search = ui.add(
                        egui::TextEdit::singleline(&mut self.search_text)
                            .hint_text("Search images...")
                            .desired_width(260.0),
                    );
                    if search.lost_focus() && ui.input(|input| input.key_pressed(egui::Key::Enter))
                    {
                        search_submitted = true;
                    }

                    let (title_rect, drag_response) = ui.allocate_exact_size(
                        egui::vec2(
                            (ui.available_width() - button_size.x * 3.0 - 16.0).max(0.0),
                            button_size.y,
                        ),
                        Sense::click_and_drag(),
                    );
                    ui.painter().text(
                        title_rect.center(),
                        egui::Align2::CENTER_CENTER,
                        &title_text,
                        egui::FontId::proportional(14.0),
                        ui.visuals().text_color(),
                    );
                    if drag_response.is_pointer_button_down_on() {
                        ctx.send_viewport_cmd(ViewportCommand::StartDrag);
                    }
                    if drag_response.double_clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Maximized(!is_maximized));
                    }

                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        for (label, command) in [
                            ("X", ViewportCommand::Close),
                            ("□", ViewportCommand::Maximized(!is_maximized)),
                            ("_", ViewportCommand::Minimized(true)),
                        ] {
                            if ui
                                .add_sized(
                                    button_size,
                                    egui::Button::new(label)
                                        .fill(bar_fill)
                                        .stroke(egui::Stroke::NONE),
                                )
                                .clicked()
                            {
                                ctx.send_viewport_cmd(command);
                            }
                        }
                    });
                });
            });

        if choose_folder_clicked {
            self.choose_download_folder();
        }
        if clear_favorites_clicked {
            self.clear_local_favorites();
        }
        if sign_in_clicked {
            self.open_login();
        }
        if sign_out_clicked {
            self.sign_out();
        }
        if let Some(kind) = switch_source {
            if kind != self.source_kind {
                self.source_kind = kind;
                self.reload_source();
            }
        }
        if search_submitted && self.search_text.trim() != self.active_query.trim() {
            self.request_gallery(self.search_text.clone(), 1);
        }

        egui::TopBottomPanel::bottom("status")
            .show_separator_line(false)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.add_space(20.0);
                    ui.label(egui::RichText::new(&self.status_line).small());
                });
            });

        let gallery_action = egui::SidePanel::left("gallery")
            .resizable(true)
            .default_width(GALLERY_PANEL_WIDTH)
            .show(ctx, |ui| self.show_gallery_list(ui))
            .inner;
        match gallery_action {
            Some(GalleryAction::Browse) => {
                self.request_gallery(self.active_query.clone(), self.page);
            }
            Some(GalleryAction::Favorites) => self.request_favorites(),
            Some(GalleryAction::Open(index)) => self.select_image(index),
            Some(GalleryAction::ToggleFavorite(image_id)) => self.toggle_favorite(&image_id),
            Some(GalleryAction::Page(page)) => {
                self.request_gallery(self.active_query.clone(), page);
            }
            None => {}
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.selected_index.is_some() {
                self.show_viewer(ui);
            } else {
                ui.allocate_ui_with_layout(
                    ui.available_size(),
                    egui::Layout::centered_and_justified(egui::Direction::TopDown),
                    |ui| {
                        if self.source.is_none() {
                            ui.label("Configure an image source to start.");
                        } else {
                            ui.label("Select an image to view it.");
                        }
                    },
                );
            }
        });

        if self.selected_index.is_some() {
            self.show_zoom_controls(ctx);
            self.show_details(ctx);
        }
        self.show_download_progress(ctx);
        self.show_login_window(ctx);
        self.show_resize_grip(ctx);

        if self.is_loading() || self.download_in_progress() {
            ctx.set_cursor_icon(egui::CursorIcon::Progress);
        }
    }
}

fn build_source(kind: SourceKind, settings: &Settings) -> Result<SourceHandles, SourceError> {
    match kind {
        SourceKind::Unsplash => {
            let source: Arc<dyn ImageSource> = Arc::new(UnsplashSource::new(
                &settings.unsplash_access_key,
                settings.per_page,
            )?);
            Ok((source, None))
        }
        SourceKind::Backend => {
            let backend = Arc::new(BackendSource::new(
                &settings.api_base_url,
                &settings.api_token,
            )?);
            let source: Arc<dyn ImageSource> = backend.clone();
            let saved: Arc<dyn SavedImagesService> = backend;
            Ok((source, Some(saved)))
        }
    }
}

fn build_download_controller(settings: &Settings) -> anyhow::Result<DownloadController> {
    let transport = HttpTransport::new()?;
    let saver = DirectorySaver::new(settings.download_dir());
    log::info!("downloads go to {}", saver.dir().display());
    Ok(DownloadController::new(Arc::new(transport), Arc::new(saver)))
}

fn fetch_color_image(client: &Client, url: &str) -> anyhow::Result<ColorImage> {
    use anyhow::Context;

    let response = client
        .get(url)
        .send()
        .with_context(|| format!("HTTP request failed for {url}"))?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP {status} for {url}");
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("Could not read response body from {url}"))?;
    decode_color_image(&bytes)
}

/// Distance between the two lowest-numbered active touches.
fn pinch_distance(touches: &HashMap<u64, egui::Pos2>) -> Option<f32> {
    let mut points = touches.iter().collect::<Vec<_>>();
    if points.len() < 2 {
        return None;
    }
    points.sort_by_key(|(id, _)| **id);
    let a = points[0].1;
    let b = points[1].1;
    Some(Point::new(a.x, a.y).distance(Point::new(b.x, b.y)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app(settings: Settings) -> GalleryViewerApp {
        let services = AppServices {
            settings_path: None,
            favorites: FavoritesStore::in_memory(),
            download: None,
            http: None,
        };
        GalleryViewerApp::with_services(settings, services, None, None)
    }

    fn viewer_app() -> GalleryViewerApp {
        let mut app = test_app(Settings::default());
        app.images = vec![sample_image("a"), sample_image("b")];
        app.select_image(0);
        app
    }

    fn key(key: egui::Key, modifiers: egui::Modifiers) -> egui::Event {
        egui::Event::Key {
            key,
            physical_key: None,
            pressed: true,
            repeat: false,
            modifiers,
        }
    }

    fn touch(id: u64, phase: egui::TouchPhase, x: f32, y: f32) -> egui::Event {
        egui::Event::Touch {
            device_id: egui::TouchDeviceId(0),
            id: egui::TouchId(id),
            phase,
            pos: egui::pos2(x, y),
            force: None,
        }
    }

    fn run_frame(
        ctx: &egui::Context,
        events: Vec<egui::Event>,
        mut frame: impl FnMut(&egui::Context),
    ) {
        let input = egui::RawInput {
            events,
            ..Default::default()
        };
        let _ = ctx.run(input, |ctx| frame(ctx));
    }

    #[test]
    fn pinch_distance_needs_two_touches() {
        let mut touches = HashMap::new();
        touches.insert(7_u64, egui::pos2(0.0, 0.0));
        assert_eq!(pinch_distance(&touches), None);

        touches.insert(3, egui::pos2(30.0, 40.0));
        touches.insert(9, egui::pos2(1000.0, 1000.0));
        assert_eq!(pinch_distance(&touches), Some(50.0));
    }

    #[test]
    fn favorites_fall_back_to_local_store_without_backend() {
        let mut app = test_app(Settings::default());
        assert!(app.saved_service.is_none());
        assert!(!app.is_favorite("abc"));
        app.toggle_favorite("abc");
        assert!(app.is_favorite("abc"));
        assert_eq!(app.favorites_count(), 1);
        app.toggle_favorite("abc");
        assert!(!app.is_favorite("abc"));
        assert!(!app.has_favorites());
    }

    #[test]
    fn clearing_local_favorites_empties_the_store() {
        let mut app = test_app(Settings::default());
        app.toggle_favorite("a");
        app.toggle_favorite("b");
        assert_eq!(app.favorites_count(), 2);

        app.clear_local_favorites();
        assert_eq!(app.favorites_count(), 0);
        assert_eq!(app.status_line, "Local favorites cleared.");
    }

    #[test]
    fn missing_unsplash_key_is_reported_on_status_line() {
        let app = test_app(Settings::default());
        assert!(app.source.is_none());
        assert!(app.status_line.starts_with("Source error"));
    }

    #[test]
    fn new_selection_resets_view_transform() {
        let mut app = viewer_app();
        app.gesture.zoom_in();
        app.gesture.zoom_in();
        assert!(app.gesture.transform().is_zoomed());

        app.step_selection(1);
        assert_eq!(app.selected_index, Some(1));
        assert!(!app.gesture.transform().is_zoomed());
        assert_eq!(app.gesture.image_id(), Some("b"));

        app.step_selection(1);
        assert_eq!(app.selected_index, Some(0));

        app.close_viewer();
        assert_eq!(app.selected_index, None);
    }

    #[test]
    fn keyboard_steps_zoom_and_escape_closes_viewer() {
        let ctx = egui::Context::default();
        let mut app = viewer_app();
        let none = egui::Modifiers::NONE;

        let steps = [
            (key(egui::Key::Plus, none), 1.5),
            (key(egui::Key::Equals, none), 2.0),
            (key(egui::Key::Minus, none), 1.5),
            (key(egui::Key::Minus, egui::Modifiers::SHIFT), 1.0),
        ];
        for (event, expected) in steps {
            run_frame(&ctx, vec![event], |ctx| app.handle_keyboard(ctx));
            assert_eq!(app.gesture.transform().scale, expected);
        }

        run_frame(&ctx, vec![key(egui::Key::Escape, none)], |ctx| {
            app.handle_keyboard(ctx)
        });
        assert_eq!(app.selected_index, None);
    }

    #[test]
    fn lifted_finger_ends_pinch_before_new_finger_lands() {
        use egui::TouchPhase::{End, Move, Start};

        let ctx = egui::Context::default();
        let mut app = viewer_app();

        run_frame(
            &ctx,
            vec![touch(1, Start, 0.0, 0.0), touch(2, Start, 100.0, 0.0)],
            |ctx| app.route_touch_events(ctx),
        );
        assert_eq!(app.gesture.transform().scale, 1.0);

        run_frame(&ctx, vec![touch(2, Move, 150.0, 0.0)], |ctx| {
            app.route_touch_events(ctx)
        });
        assert_eq!(app.gesture.transform().scale, 1.5);

        // The jump from 150 to 400 must not be read as a pinch.
        run_frame(
            &ctx,
            vec![touch(2, End, 150.0, 0.0), touch(3, Start, 400.0, 0.0)],
            |ctx| app.route_touch_events(ctx),
        );
        assert_eq!(app.gesture.transform().scale, 1.5);

        run_frame(
            &ctx,
            vec![touch(1, End, 0.0, 0.0), touch(3, End, 400.0, 0.0)],
            |ctx| app.route_touch_events(ctx),
        );
        assert!(app.touches.is_empty());
        assert_eq!(app.gesture.transform().scale, 1.5);
    }

    #[test]
    fn dropped_gallery_worker_is_reported() {
        let ctx = egui::Context::default();
        let mut app = test_app(Settings::default());
        let (tx, rx) = mpsc::channel::<Result<Vec<GalleryImage>, String>>();
        drop(tx);
        app.gallery_receiver = Some(rx);

        app.poll_gallery(&ctx);
        assert!(app.gallery_receiver.is_none());
        assert_eq!(app.status_line, "Gallery worker disconnected.");
    }

    #[test]
    fn login_requires_every_field() {
        let mut app = test_app(Settings::default());
        app.open_login();
        if let Some(form) = app.login.as_mut() {
            form.base_url = "http://127.0.0.1:9".to_string();
            form.email = "me@example.com".to_string();
        }

        app.submit_login();
        let form = app.login.as_ref().expect("login form stays open");
        assert!(form.error.is_some());
        assert!(form.receiver.is_none());
    }

    #[test]
    fn sign_out_forgets_the_session() {
        let mut settings = Settings::default();
        settings.api_base_url = "http://127.0.0.1:9".to_string();
        settings.sign_in("secret", "casey");
        let mut app = test_app(settings);
        assert!(app.saved_service.is_some());

        app.sign_out();
        assert!(!app.settings.is_signed_in());
        assert!(app.settings.api_token.is_empty());
        assert!(app.saved_service.is_none());
        assert!(app.source.is_none());
    }

    fn sample_image(id: &str) -> GalleryImage {
        GalleryImage {
            id: id.to_string(),
            description: None,
            author: None,
            author_username: None,
            width: 10,
            height: 10,
            likes: 0,
            display_url: format!("http://127.0.0.1:9/{id}"),
            full_url: format!("http://127.0.0.1:9/{id}/full"),
            page_url: None,
            download_location: None,
            source_prefix: UnsplashSource::PREFIX,
        }
    }
}
