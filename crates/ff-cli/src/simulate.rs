use std::fs;
use std::sync::Arc;

use ff_bridge::{BroadcastTransport, Command, Controller, ControllerMode};
use ff_core::BlockingConfig;
use ff_page::{Page, RecordingNavigator, RecordingSurface, Settings, UserAction};
use log::info;

pub struct SimulateOptions {
    pub url: String,
    pub sites: Vec<String>,
    pub action: Option<UserAction>,
    pub mode: ControllerMode,
    pub settings: Option<String>,
}

pub fn run_simulation(opts: SimulateOptions) -> Result<(), String> {
    let settings = match &opts.settings {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(run_simulation_async(opts, settings))
}

fn load_settings(path: &str) -> Result<Settings, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid settings '{}': {}", path, e))
}

async fn run_simulation_async(opts: SimulateOptions, settings: Settings) -> Result<(), String> {
    let transport = Arc::new(BroadcastTransport::new());
    let controller = Controller::new(BlockingConfig::default());
    controller.serve(transport.clone());

    let start = Command::StartBlocking {
        blocked_sites: opts.sites.clone(),
        session_id: None,
    };
    let payload = serde_json::to_value(&start).map_err(|e| e.to_string())?;
    controller.handle(payload)?;
    controller.set_mode(opts.mode);

    let surface = RecordingSurface::new();
    let navigator = RecordingNavigator::new();
    let page = Page::start(
        Arc::new(controller.clone()),
        transport.clone(),
        settings,
        opts.url.as_str(),
        surface.clone(),
        navigator.clone(),
    )
    .spawn();

    let initial = page
        .state()
        .await
        .ok_or_else(|| "Page stopped unexpectedly".to_string())?;
    println!("Location:    {}", opts.url);
    println!("State:       {}", initial);

    if let Some(action) = opts.action {
        if !initial.is_blocked() {
            info!("Page is not blocked, {:?} has nothing to do", action);
        }
        page.act(action).await;
        let after = page
            .state()
            .await
            .ok_or_else(|| "Page stopped unexpectedly".to_string())?;
        println!("After {:?}: {}", action, after);
    }

    page.flush().await;
    let blocker = page
        .close()
        .await
        .map_err(|e| format!("Page task failed: {}", e))?;
    controller.shutdown();

    let status = serde_json::to_string_pretty(&controller.status()).map_err(|e| e.to_string())?;
    println!("Final state: {}", blocker.state());
    println!("Surface:     shown {}, removed {}", surface.shown(), surface.removed());
    println!("Navigations: {:?}", navigator.destinations());
    println!("Controller ({:?}):", controller.mode());
    println!("{}", status);

    Ok(())
}
