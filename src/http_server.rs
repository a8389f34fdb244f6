use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::config::{ConfigUpdate, DisplayConfig};
use crate::gallery::{Gallery, GalleryCommand};

#[derive(Debug)]
struct ControlError(String);
impl warp::reject::Reject for ControlError {}

#[derive(Debug)]
struct ConfigError(String);
impl warp::reject::Reject for ConfigError {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.to_string(),
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            message: message.to_string(),
        }
    }
}

/// Handles shared by every route.
#[derive(Clone)]
pub struct ApiState {
    pub gallery: Gallery,
    pub config: Arc<RwLock<DisplayConfig>>,
    pub config_path: PathBuf,
    pub commands: broadcast::Sender<GalleryCommand>,
    pub rescan: mpsc::Sender<()>,
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(state: ApiState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    // Health check endpoint
    let health = warp::path("health")
        .and(warp::get())
        .map(|| reply::json(&ApiResponse::success("healthy", "Gallery wall is running")));

    // Version endpoint
    let version = warp::path("version").and(warp::get()).map(|| {
        let version_info = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "commit_hash": env!("GALLERY_GIT_COMMIT"),
            "commit_short": env!("GALLERY_GIT_SHORT"),
            "branch": env!("GALLERY_GIT_BRANCH"),
            "build_time": env!("GALLERY_BUILD_TIME")
        });
        reply::json(&ApiResponse::success(version_info, "Version information"))
    });

    let status = warp::path("status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(|state: ApiState| async move {
            let status = serde_json::json!({
                "gallery": state.gallery.status().await,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            Ok::<_, Infallible>(reply::json(&ApiResponse::success(status, "Status retrieved")))
        });

    let control = warp::path("control")
        .and(warp::post())
        .and(warp::body::json::<ControlRequest>())
        .and(with_state(state.clone()))
        .and_then(|req: ControlRequest, state: ApiState| async move {
            match handle_control_request(req, &state.commands) {
                Ok(msg) => Ok::<_, Rejection>(reply::json(&ApiResponse::success((), &msg))),
                Err(e) => Err(warp::reject::custom(ControlError(e))),
            }
        });

    let get_config = warp::path("config")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(|state: ApiState| async move {
            let config = state.config.read().await.clone();
            Ok::<_, Infallible>(reply::json(&ApiResponse::success(config, "Configuration retrieved")))
        });

    let put_config = warp::path("config")
        .and(warp::put())
        .and(warp::body::json::<ConfigUpdate>())
        .and(with_state(state.clone()))
        .and_then(|update: ConfigUpdate, state: ApiState| async move {
            match handle_config_update(update, &state).await {
                Ok(config) => Ok::<_, Rejection>(reply::json(&ApiResponse::success(
                    config,
                    "Configuration updated successfully",
                ))),
                Err(e) => Err(warp::reject::custom(ConfigError(e))),
            }
        });

    let images = warp::path("images")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(|state: ApiState| async move {
            let images = get_image_list(&state.gallery).await;
            Ok::<_, Infallible>(reply::json(&ApiResponse::success(images, "Images retrieved")))
        });

    let rescan = warp::path("rescan")
        .and(warp::post())
        .and(with_state(state))
        .and_then(|state: ApiState| async move {
            match state.rescan.try_send(()) {
                // A full queue means a rescan is already pending.
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {
                    Ok::<_, Rejection>(reply::json(&ApiResponse::success((), "Rescan requested")))
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    Err(warp::reject::custom(ControlError("folder scanner is not running".into())))
                }
            }
        });

    let api = warp::path("api")
        .and(
            health
                .or(version)
                .or(status)
                .or(control)
                .or(get_config)
                .or(put_config)
                .or(images)
                .or(rescan),
        )
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_headers(vec!["content-type"])
                .allow_methods(vec!["GET", "POST", "PUT"]),
        );

    let root = warp::path::end().map(|| {
        reply::html(
            r#"
            <html>
            <head><title>Gallery Wall</title></head>
            <body>
            <h1>Gallery Wall</h1>
            <p>API endpoints:</p>
            <ul>
            <li>GET /api/health - Health check</li>
            <li>GET /api/version - Version information</li>
            <li>GET /api/status - Grid and rotation status</li>
            <li>POST /api/control - start, stop, pause, resume, toggle, shuffle</li>
            <li>GET /api/config - Current configuration</li>
            <li>PUT /api/config - Update configuration</li>
            <li>GET /api/images - Loaded media</li>
            <li>POST /api/rescan - Rescan the image folder</li>
            </ul>
            </body>
            </html>
            "#,
        )
    });

    root.or(api).recover(handle_rejection)
}

pub async fn run_http_server(port: u16, state: ApiState) {
    info!(port, "starting HTTP server");
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(ControlError(msg)) = err.find() {
        (StatusCode::BAD_REQUEST, msg.clone())
    } else if let Some(ConfigError(msg)) = err.find() {
        (StatusCode::BAD_REQUEST, msg.clone())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        warn!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };
    Ok(reply::with_status(reply::json(&ApiResponse::<()>::failure(&message)), code))
}

async fn get_image_list(gallery: &Gallery) -> serde_json::Value {
    let media = gallery.media().await;
    serde_json::json!({
        "count": media.len(),
        "images": media.iter().map(|item| serde_json::json!({
            "url": item.url,
            "kind": item.kind,
            "title": item.title,
            "source": item.source_label,
            "restricted": item.restricted,
        })).collect::<Vec<_>>()
    })
}

fn handle_control_request(
    req: ControlRequest,
    command_sender: &broadcast::Sender<GalleryCommand>,
) -> Result<String, String> {
    let command = match req.action.as_str() {
        "start" => GalleryCommand::Start,
        "stop" => GalleryCommand::Stop,
        "pause" => GalleryCommand::Pause,
        "resume" => GalleryCommand::Resume,
        "toggle" => GalleryCommand::TogglePause,
        "shuffle" => GalleryCommand::Shuffle,
        _ => return Err(format!("Unknown action: {}", req.action)),
    };

    command_sender
        .send(command)
        .map_err(|e| format!("Failed to send command: {}", e))?;

    Ok(format!("Command '{}' sent successfully", req.action))
}

async fn handle_config_update(update: ConfigUpdate, state: &ApiState) -> Result<DisplayConfig, String> {
    let mut config = state.config.write().await;
    let commands = config.apply(update).map_err(|e| e.to_string())?;
    config
        .save(&state.config_path)
        .map_err(|e| format!("Failed to save configuration: {}", e))?;

    for command in commands {
        state
            .commands
            .send(command)
            .map_err(|e| format!("Failed to send config update: {}", e))?;
    }
    Ok(config.clone())
}
