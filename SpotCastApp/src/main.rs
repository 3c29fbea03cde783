use spotcast::{SpotcastConfigExt, SpotcastExt};
use spotconfig::get_config;
use spotserver::ServerBuilder;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure HTTP ==========
    let mut server = ServerBuilder::new_configured().build();
    server.init_logging().await;

    let config = get_config();
    info!("⚙️ Configuration loaded from {}", config.directory());

    // ========== PHASE 2 : Moteur de diffusion ==========
    info!("📻 Initializing broadcast engine...");
    let controller = server.init_spotcast().await?;
    info!(
        "🎵 Ready to broadcast {} ({} listener(s))",
        config.get_spotcast_current_song()?,
        controller.registry().len()
    );

    // ========== PHASE 3 : Démarrage ==========
    server.start().await?;

    let info = server.info();
    info!(
        "🎧 Listen at http://{}:{}/home, control at http://{}:{}/controller",
        info.base_url, info.http_port, info.base_url, info.http_port
    );

    server.wait().await;

    // Arrêt propre de la diffusion
    controller.stop().await?;
    info!("👋 SpotCast stopped");
    Ok(())
}
