//! Manifest endpoint (`/`, `/manifest`, `/index.exp`)

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};

use xdl_core::prelude::*;
use xdl_core::urls::{bundle_query_params, construct_base_url, debugger_host};
use xdl_core::{validate_package_json, Environment, PackageJson, SignArgs};

use crate::server::ServerState;

/// Request header asking for a signed manifest
pub const ACCEPT_SIGNATURE_HEADER: &str = "exponent-accept-signature";

/// Status for manifest failures (non-standard, understood by clients)
pub const MANIFEST_ERROR_STATUS: u16 = 520;

/// Serve the app manifest, signed when the client asks and a user is logged in.
pub async fn manifest_handler<E: Environment>(
    State(state): State<ServerState<E>>,
    headers: HeaderMap,
) -> Response {
    // Validation only reports through events; the response never waits for it.
    {
        let env = state.env.clone();
        let root = state.project_root.clone();
        let events = state.events.clone();
        tokio::spawn(async move {
            validate_package_json(&*env, &root, &events).await;
        });
    }

    match manifest_string(&state, &headers).await {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!("Error in manifest handler: {}", e);
            manifest_error(&e)
        }
    }
}

fn manifest_error(e: &Error) -> Response {
    let status =
        StatusCode::from_u16(MANIFEST_ERROR_STATUS).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn manifest_string<E: Environment>(
    state: &ServerState<E>,
    headers: &HeaderMap,
) -> Result<String> {
    let (manifest, pkg) = build_manifest(state).await?;
    let unsigned = serde_json::to_string(&manifest)?;

    if !headers.contains_key(ACCEPT_SIGNATURE_HEADER) {
        return Ok(unsigned);
    }
    let Some(user) = state.env.current_user().await else {
        debug!("signature requested while logged out, serving unsigned manifest");
        return Ok(unsigned);
    };

    let args = SignArgs::for_project(&user, pkg.as_ref(), &state.project_short_name);
    state
        .cache
        .get_signed(&unsigned, || state.env.sign_manifest(&args, &manifest))
        .await
}

/// The `exp` section of package.json plus the URLs a client needs.
pub async fn build_manifest<E: Environment>(
    state: &ServerState<E>,
) -> Result<(Map<String, Value>, Option<PackageJson>)> {
    let root = &state.project_root;
    let pkg = state.env.read_manifest(root).await?;
    let mut manifest = pkg
        .as_ref()
        .and_then(|pkg| pkg.exp.clone())
        .unwrap_or_default();

    let settings = state.env.read_settings(root).await?;
    let query = bundle_query_params(&settings);
    let info = state.env.read_packager_info(root).await?;
    let base_url = construct_base_url(settings.host_type, &info, state.lan_ip)?;

    manifest.insert(
        "bundlePath".to_string(),
        Value::String(format!("bundle?{}", query)),
    );
    manifest.insert("xde".to_string(), Value::Bool(true));
    manifest.insert(
        "bundleUrl".to_string(),
        Value::String(format!("{}/bundle?{}", base_url, query)),
    );
    manifest.insert(
        "debuggerHost".to_string(),
        Value::String(debugger_host(state.lan_ip, state.packager_port)),
    );
    manifest.insert(
        "mainModuleName".to_string(),
        Value::String(state.main_module_path.clone()),
    );

    Ok((manifest, pkg))
}
