//! Router construction and server host.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{
    auth_challenge, auth_change_password, auth_login, auth_logout, auth_setup, auth_status,
    require_session,
};
use crate::downloads::{
    create_download, delete_download, get_download, list_downloads, pause_download,
    resume_download,
};
use crate::install::{display_image, install_manifest, install_payload};
use crate::packages::{list_packages, package_file};
use crate::proxy::{bag_proxy, search_proxy};
use crate::settings::{get_settings, put_settings};
use crate::state::ApiState;
use crate::tunnel::wisp_upgrade;

/// Failure starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// Binding the listener failed.
    #[error("failed to bind api listener")]
    Bind {
        /// Source I/O error.
        source: std::io::Error,
    },
    /// The server terminated unexpectedly.
    #[error("api server terminated")]
    Serve {
        /// Source I/O error.
        source: std::io::Error,
    },
}

/// Axum router wrapper hosting the Pomar API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the full route tree over the given state.
    #[must_use]
    pub fn new(state: ApiState) -> Self {
        Self {
            router: build_router(Arc::new(state)),
        }
    }

    /// Serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns an error when binding or serving fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), ApiServerError> {
        info!(addr = %addr, "starting api listener");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { source })?;
        axum::serve(listener, self.router)
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}

fn build_router(state: Arc<ApiState>) -> Router {
    let require = middleware::from_fn_with_state(Arc::clone(&state), require_session);

    let api = Router::new()
        .route("/auth/status", get(auth_status))
        .route("/auth/challenge", get(auth_challenge))
        .route("/auth/setup", post(auth_setup))
        .route("/auth/login", post(auth_login))
        .route("/auth/logout", post(auth_logout))
        .route("/auth/change-password", post(auth_change_password))
        .route(
            "/downloads",
            post(create_download)
                .get(list_downloads)
                .route_layer(require.clone()),
        )
        .route(
            "/downloads/{id}",
            get(get_download)
                .delete(delete_download)
                .route_layer(require.clone()),
        )
        .route(
            "/downloads/{id}/pause",
            post(pause_download).route_layer(require.clone()),
        )
        .route(
            "/downloads/{id}/resume",
            post(resume_download).route_layer(require.clone()),
        )
        .route(
            "/packages",
            get(list_packages).route_layer(require.clone()),
        )
        .route(
            "/packages/{id}/file",
            get(package_file).route_layer(require.clone()),
        )
        .route(
            "/settings",
            get(get_settings)
                .put(put_settings)
                .route_layer(require.clone()),
        )
        .route("/install/{id}/manifest.plist", get(install_manifest))
        .route("/install/{id}/payload.ipa", get(install_payload))
        .route("/install/{id}/display-image.png", get(display_image))
        .route("/bag", get(bag_proxy))
        .route("/search", get(search_proxy));

    Router::new()
        .nest("/api", api)
        .route("/wisp", get(wisp_upgrade).route_layer(require))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
