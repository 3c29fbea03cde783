//! Extension spotserver pour SpotCast
//!
//! Ce module fournit un trait d'extension pour monter le moteur de
//! diffusion sur un `spotserver::Server`, sans que spotserver dépende de
//! spotcast.

use std::sync::Arc;

use anyhow::Result;
use spotconfig::get_config;
use spotserver::Server;
use tracing::info;
use utoipa::OpenApi;

use crate::api::{PublicAssets, SpotcastApiDoc, SpotcastState, create_api_router, create_router};
use crate::config_ext::EngineSettings;
use crate::controller::BroadcastController;
use crate::process::SystemRunner;

/// Trait pour étendre spotserver avec la diffusion SpotCast
///
/// # Exemple
///
/// ```rust,no_run
/// use spotcast::SpotcastExt;
/// use spotserver::ServerBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut server = ServerBuilder::new_configured().build();
///     server.init_spotcast().await?;
///
///     server.start().await?;
///     server.wait().await;
///     Ok(())
/// }
/// ```
pub trait SpotcastExt {
    /// Crée le contrôleur depuis la configuration et enregistre les routes
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /` - Redirection vers `/home`
    /// - `GET /home`, `GET /controller` - Pages embarquées
    /// - `POST /controller` - Commandes `start`, `stop` ou nom d'effet
    /// - `GET /stream` - Flux audio en direct
    /// - `GET /api/spotcast/status`, `GET /api/spotcast/listeners`
    /// - Tout autre `GET` - Fichiers de `public/` (404 si absent)
    async fn init_spotcast(&mut self) -> Result<BroadcastController>;

    /// Enregistre les routes pour un contrôleur existant
    async fn init_spotcast_with(&mut self, controller: BroadcastController);
}

impl SpotcastExt for Server {
    async fn init_spotcast(&mut self) -> Result<BroadcastController> {
        let config = get_config();
        let settings = EngineSettings::from_config(&config)?;
        info!(
            songs = %settings.songs_dir.display(),
            effects = %settings.fx_dir.display(),
            song = %settings.current_song,
            "Initializing SpotCast"
        );

        let controller = BroadcastController::spawn(settings, Arc::new(SystemRunner));
        self.init_spotcast_with(controller.clone()).await;
        Ok(controller)
    }

    async fn init_spotcast_with(&mut self, controller: BroadcastController) {
        let state = SpotcastState::new(controller);

        self.add_router("/", create_router(state.clone())).await;
        self.add_openapi(
            create_api_router(state),
            SpotcastApiDoc::openapi(),
            "spotcast",
        )
        .await;
        self.add_dir::<PublicAssets>("/").await;

        info!("✅ SpotCast routes registered");
    }
}
