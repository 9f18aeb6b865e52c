//! Request routing and handlers.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Serialize, de::DeserializeOwned};
use tower_http::trace::TraceLayer;

use hdvol::VolumeDriver;
use hdvol_common::{HdvolError, HdvolResult, VolumeName};

use super::types::{
    ActivateResponse, CapabilitiesBody, CapabilitiesResponse, CreateRequest, Empty,
    ErrorResponse, GetResponse, ListResponse, MountRequest, MountpointResponse, NameRequest,
};

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

type Driver = Arc<VolumeDriver>;

/// Build the plugin router.
pub fn app(driver: Driver) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

/// Successful plugin reply.
struct Plugin<T>(T);

impl<T: Serialize> IntoResponse for Plugin<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => plugin_response(StatusCode::OK, body),
            Err(e) => ApiError(e.to_string()).into_response(),
        }
    }
}

/// Failed plugin reply, sent as `{"Err": "..."}`.
#[derive(Debug)]
struct ApiError(String);

impl From<HdvolError> for ApiError {
    fn from(e: HdvolError) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("Can't decode request: {e}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self(format!("Request handler failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self.0, "Request failed");
        let body = serde_json::to_vec(&ErrorResponse { err: self.0 })
            .unwrap_or_else(|_| br#"{"Err":"internal error"}"#.to_vec());
        plugin_response(StatusCode::INTERNAL_SERVER_ERROR, body)
    }
}

fn plugin_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Body::from(body).into_response();
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PLUGIN_CONTENT_TYPE),
    );
    response
}

type ApiResult<T> = Result<Plugin<T>, ApiError>;

/// Decode a request body; an empty body decodes to the default request.
fn decode<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

/// Run a driver call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> HdvolResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

async fn activate() -> ApiResult<ActivateResponse> {
    tracing::debug!("Activating plugin");
    Ok(Plugin(ActivateResponse {
        implements: vec!["VolumeDriver"],
    }))
}

async fn create(State(driver): State<Driver>, body: Bytes) -> ApiResult<Empty> {
    let req: CreateRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;
    let opts = req.opts.unwrap_or_default();

    blocking(move || driver.create(&name, &opts)).await?;
    Ok(Plugin(Empty {}))
}

async fn remove(State(driver): State<Driver>, body: Bytes) -> ApiResult<Empty> {
    let req: NameRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;

    blocking(move || driver.remove(&name)).await?;
    Ok(Plugin(Empty {}))
}

async fn mount(State(driver): State<Driver>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: MountRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;
    tracing::debug!(%name, id = %req.id, "Mount request");

    let mountpoint = blocking(move || driver.mount(&name)).await?;
    Ok(Plugin(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn unmount(State(driver): State<Driver>, body: Bytes) -> ApiResult<Empty> {
    let req: MountRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;
    tracing::debug!(%name, id = %req.id, "Unmount request");

    blocking(move || driver.unmount(&name)).await?;
    Ok(Plugin(Empty {}))
}

async fn get(State(driver): State<Driver>, body: Bytes) -> ApiResult<GetResponse> {
    let req: NameRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;

    let info = blocking(move || driver.get(&name)).await?;
    Ok(Plugin(GetResponse {
        volume: info.into(),
    }))
}

async fn list(State(driver): State<Driver>) -> ApiResult<ListResponse> {
    let volumes = blocking(move || driver.list()).await?;
    Ok(Plugin(ListResponse {
        volumes: volumes.into_iter().map(Into::into).collect(),
    }))
}

async fn path(State(driver): State<Driver>, body: Bytes) -> ApiResult<MountpointResponse> {
    let req: NameRequest = decode(&body)?;
    let name = VolumeName::new(req.name)?;

    let mountpoint = blocking(move || driver.path(&name)).await?;
    Ok(Plugin(MountpointResponse {
        mountpoint: mountpoint.display().to_string(),
    }))
}

async fn capabilities(State(driver): State<Driver>) -> ApiResult<CapabilitiesResponse> {
    Ok(Plugin(CapabilitiesResponse {
        capabilities: CapabilitiesBody {
            scope: driver.capabilities().scope,
        },
    }))
}
