mod app;
mod config;
mod download;
mod favorites;
mod gesture;
mod launch;
mod renderer;
mod source;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (initial_request, initial_status) = match launch::parse_launch_request_from_args(&cli_args)
    {
        Ok(request) => (request, None),
        Err(err) => {
            log::warn!("ignoring launch arguments: {err}");
            (None, Some(format!("Launch URL/args error: {err}")))
        }
    };
    let settings = config::Settings::load();

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_min_inner_size([640.0, 420.0])
            .with_decorations(false)
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "SnapView",
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(app::GalleryViewerApp::new(
                settings.clone(),
                initial_request.clone(),
                initial_status.clone(),
            )))
        }),
    )
}
