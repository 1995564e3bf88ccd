//! End-to-end tests of the session client and merge pipeline over HTTP.
//!
//! Each test starts an in-process fake console management server (axum on
//! 127.0.0.1, plain HTTP) that enforces the session header and a rotating
//! anti-forgery token the way the real API does.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use consolesync_core::config::ClientConfig;
use consolesync_core::errors::{MergeCause, RegistryError, SessionError};
use consolesync_core::merge::{MergeOrchestrator, MergeSettings, MergeStage, TARGET_STAGING};
use consolesync_core::registry::ConfigRegistry;
use consolesync_core::session::{ApiClient, Session};

const USER: &str = "ops";
const PASSWORD: &str = "secret";
const TOKEN: &str = "sess-abc";

// ===========================================================================
// Fake server
// ===========================================================================

#[derive(Default)]
struct Server {
    /// Zip snapshotted by "create saved configuration".
    current_state: Vec<u8>,
    configs: HashMap<String, (String, Vec<u8>)>,
    uploads: Vec<Upload>,
    xsrf_serial: u32,
    /// Mutating requests that arrived without a valid token pair.
    rejected_writes: u32,
    reject_uploads: bool,
}

#[derive(Clone, Debug)]
struct Upload {
    field: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

type Shared = Arc<Mutex<Server>>;

impl Server {
    fn current_xsrf(&self) -> String {
        format!("xsrf-{}", self.xsrf_serial)
    }

    /// Issue a fresh anti-forgery token.
    fn rotate(&mut self) -> String {
        self.xsrf_serial += 1;
        format!("XSRF-TOKEN={}; Path=/", self.current_xsrf())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn authorized(headers: &HeaderMap) -> bool {
    header(headers, "x-api-session") == Some(TOKEN)
}

/// Check session and CSRF for a write; rotate the token on success.
fn check_write(server: &mut Server, headers: &HeaderMap) -> Result<String, Response> {
    let xsrf_ok = header(headers, "x-xsrf-token") == Some(server.current_xsrf().as_str());
    if !authorized(headers) || !xsrf_ok {
        server.rejected_writes += 1;
        return Err(StatusCode::FORBIDDEN.into_response());
    }
    Ok(server.rotate())
}

async fn product_info(State(state): State<Shared>) -> Response {
    let cookie = state.lock().unwrap().rotate();
    ([(SET_COOKIE, cookie)], Json(json!({ "product": "fake console" }))).into_response()
}

#[derive(Deserialize)]
struct Logon {
    userid: String,
    password: String,
}

async fn logon(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Logon>) -> Response {
    let mut server = state.lock().unwrap();
    if header(&headers, "x-xsrf-token") != Some(server.current_xsrf().as_str()) {
        server.rejected_writes += 1;
        return StatusCode::FORBIDDEN.into_response();
    }
    if body.userid != USER || body.password != PASSWORD {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let xsrf = server.rotate();
    let session = format!("x-api-session={}; Path=/", TOKEN);
    let mut resp = Json(json!({ "status": "ok" })).into_response();
    for cookie in [session, xsrf] {
        resp.headers_mut()
            .append(SET_COOKIE, cookie.parse().unwrap());
    }
    resp
}

async fn list_configs(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let server = state.lock().unwrap();
    let mut items: Vec<_> = server
        .configs
        .iter()
        .map(|(name, (description, _))| {
            json!({ "name": name, "description": description, "date": "2025-02-13", "user": null })
        })
        .collect();
    items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    Json(items).into_response()
}

async fn get_config(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.lock().unwrap().configs.get(&name) {
        Some((_, bytes)) => ([(CONTENT_TYPE, "application/zip")], bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct CreateBody {
    name: String,
    description: Option<String>,
}

async fn create_config(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Response {
    let mut server = state.lock().unwrap();
    let cookie = match check_write(&mut server, &headers) {
        Ok(cookie) => cookie,
        Err(resp) => return resp,
    };
    if body.name != name || server.configs.contains_key(&name) {
        return ([(SET_COOKIE, cookie)], (StatusCode::CONFLICT, "already exists")).into_response();
    }
    let snapshot = server.current_state.clone();
    server
        .configs
        .insert(name, (body.description.unwrap_or_default(), snapshot));
    ([(SET_COOKIE, cookie)], StatusCode::CREATED).into_response()
}

async fn delete_config(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut server = state.lock().unwrap();
    let cookie = match check_write(&mut server, &headers) {
        Ok(cookie) => cookie,
        Err(resp) => return resp,
    };
    match server.configs.remove(&name) {
        Some(_) => ([(SET_COOKIE, cookie)], StatusCode::NO_CONTENT).into_response(),
        None => ([(SET_COOKIE, cookie)], StatusCode::NOT_FOUND).into_response(),
    }
}

async fn restore_config(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut server = state.lock().unwrap();
    let cookie = match check_write(&mut server, &headers) {
        Ok(cookie) => cookie,
        Err(resp) => return resp,
    };
    match server.configs.get(&name).map(|(_, bytes)| bytes.clone()) {
        Some(bytes) => {
            server.current_state = bytes;
            ([(SET_COOKIE, cookie)], StatusCode::ACCEPTED).into_response()
        }
        None => ([(SET_COOKIE, cookie)], StatusCode::NOT_FOUND).into_response(),
    }
}

async fn upload_config(
    State(state): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let cookie = {
        let mut server = state.lock().unwrap();
        let cookie = match check_write(&mut server, &headers) {
            Ok(cookie) => cookie,
            Err(resp) => return resp,
        };
        if server.reject_uploads {
            return ([(SET_COOKIE, cookie)], (StatusCode::PAYLOAD_TOO_LARGE, "too large"))
                .into_response();
        }
        cookie
    };

    let mut received = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes: Bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        received.push(Upload {
            field: field_name,
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    state.lock().unwrap().uploads.extend(received);
    ([(SET_COOKIE, cookie)], StatusCode::OK).into_response()
}

async fn ccs_servers(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "servers": [
        { "name": "CCS01", "upstreamHost": "mainframe-a" },
        { "name": "CCS02", "upstreamHost": "mainframe-b" }
    ]}))
    .into_response()
}

async fn ccs_sessions(Path(server): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if server != "CCS01" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({ "sessions": [
        { "name": "S1", "luName": "LU01", "upstreamPort": 23 }
    ]}))
    .into_response()
}

async fn start_server(current_state: Vec<u8>) -> (SocketAddr, Shared) {
    let state: Shared = Arc::new(Mutex::new(Server {
        current_state,
        ..Server::default()
    }));

    let app = Router::new()
        .route("/mvcm-api/productinfo", get(product_info))
        .route("/mvcm-api/viewerlogon", post(logon))
        .route(
            "/mvcm-api/saved-configurations",
            get(list_configs).post(upload_config),
        )
        .route(
            "/mvcm-api/saved-configurations/:name",
            get(get_config).post(create_config).delete(delete_config),
        )
        .route(
            "/mvcm-api/saved-configurations/:name/operations/restore",
            post(restore_config),
        )
        .route("/mvcm-api/ccs/servers", get(ccs_servers))
        .route("/mvcm-api/ccs/servers/:name/sessions", get(ccs_sessions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

// ===========================================================================
// Helpers
// ===========================================================================

fn client() -> ApiClient {
    ApiClient::new(&ClientConfig {
        use_tls: false,
        request_timeout_secs: Some(10),
        ..ClientConfig::default()
    })
}

async fn connect(addr: SocketAddr) -> Session {
    client()
        .connect(&addr.to_string(), USER, PASSWORD)
        .await
        .unwrap()
}

fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn read_entry(zip: &[u8], name: &str) -> Option<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip)).unwrap();
    let mut entry = archive.by_name(name).ok()?;
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    Some(text)
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_logon_sets_session_token() {
    let (addr, state) = start_server(Vec::new()).await;
    let session = connect(addr).await;

    assert!(session.is_authenticated());
    assert_eq!(session.host(), addr.to_string());
    assert_eq!(state.lock().unwrap().rejected_writes, 0);
}

#[tokio::test]
async fn test_bad_password_is_authentication_failure() {
    let (addr, _state) = start_server(Vec::new()).await;
    let err = client()
        .connect(&addr.to_string(), USER, "wrong")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::AuthenticationFailed { status: 401, .. }
    ));
}

#[tokio::test]
async fn test_registry_round_trip_with_rotating_csrf() {
    let state_zip = zip_bytes(&[("descriptor.xml", "<descriptor/>")]);
    let (addr, state) = start_server(state_zip.clone()).await;
    let session = connect(addr).await;

    assert!(session.list_configurations().await.is_empty());

    // Every write rotates the token; each must still be accepted.
    session
        .create_configuration("nightly", Some("nightly backup"))
        .await
        .unwrap();
    session.create_configuration("weekly", None).await.unwrap();

    let listed = session.list_configurations().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "nightly");
    assert_eq!(listed[0].description, "nightly backup");
    assert_eq!(listed[0].user, "");

    assert_eq!(session.download_configuration("nightly").await.unwrap(), state_zip);
    session.restore_configuration("nightly").await.unwrap();

    session.delete_configuration("weekly").await.unwrap();
    let err = session.delete_configuration("weekly").await.unwrap_err();
    assert!(err.is_not_found());

    let err = session.create_configuration("nightly", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::Rejected { status: 409, .. }));

    assert_eq!(state.lock().unwrap().rejected_writes, 0);
}

#[tokio::test]
async fn test_download_to_file_and_upload_multipart() {
    let state_zip = zip_bytes(&[("app/x.cfg", "x")]);
    let (addr, state) = start_server(state_zip.clone()).await;
    let session = connect(addr).await;
    session.create_configuration("snap", None).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested/snap.zip");
    let written = session.download_configuration_to("snap", &dest).await.unwrap();
    assert_eq!(written, state_zip.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), state_zip);

    session.upload_configuration(&dest).await.unwrap();
    let uploads = state.lock().unwrap().uploads.clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].field, "file");
    assert_eq!(uploads[0].file_name.as_deref(), Some("snap.zip"));
    assert_eq!(
        uploads[0].content_type.as_deref(),
        Some("application/octet-stream")
    );
    assert_eq!(uploads[0].bytes, state_zip);
}

#[tokio::test]
async fn test_missing_download_is_not_found() {
    let (addr, _state) = start_server(Vec::new()).await;
    let session = connect(addr).await;
    let err = session.download_configuration("ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_ccs_listing() {
    let (addr, _state) = start_server(Vec::new()).await;
    let session = connect(addr).await;

    let servers = session.list_ccs_servers().await;
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].upstream_host, "mainframe-a");

    let sessions = session.list_ccs_sessions("CCS01").await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].lu_name, "LU01");
    assert_eq!(sessions[0].upstream_port, Some(23));

    assert!(session.list_ccs_sessions("CCS99").await.is_empty());
}

#[tokio::test]
async fn test_merge_end_to_end_over_http() {
    let source_zip = zip_bytes(&[
        (
            "descriptor.xml",
            "<?xml version=\"1.0\"?><descriptor><name>src</name><description>d</description><build>77</build></descriptor>",
        ),
        ("licensemanager/a.lic", "source-license"),
        ("tomcat/server.xml", "source-tomcat"),
        ("app/x.cfg", "source-app"),
    ]);
    let target_zip = zip_bytes(&[
        ("descriptor.xml", "<descriptor><name>tgt</name></descriptor>"),
        ("licensemanager/b.lic", "target-license"),
        ("security/realm.xml", "target-realm"),
        ("app/x.cfg", "target-app"),
    ]);
    let (source_addr, source_state) = start_server(source_zip).await;
    let (target_addr, target_state) = start_server(target_zip).await;

    let (source, target) = tokio::join!(connect(source_addr), connect(target_addr));

    // A leftover staging configuration from an earlier run.
    target
        .create_configuration(TARGET_STAGING, Some("stale"))
        .await
        .unwrap();

    let work = tempfile::tempdir().unwrap();
    let settings = MergeSettings {
        work_dir: Some(work.path().to_path_buf()),
        ..MergeSettings::default()
    }
    .with_date(NaiveDate::from_ymd_opt(2025, 2, 13).unwrap());

    let outcome = MergeOrchestrator::new(&source, &target, settings)
        .run()
        .await
        .unwrap();
    assert_eq!(outcome.archive_name, "127_127_Merged_V4.1.05_13FEB2025");
    assert!(std::fs::read_dir(work.path()).unwrap().next().is_none());

    let target_server = target_state.lock().unwrap();
    assert_eq!(target_server.rejected_writes, 0);
    assert_eq!(
        target_server.configs[TARGET_STAGING].0,
        "Newly created target config to be merged"
    );
    assert_eq!(target_server.uploads.len(), 1);
    let merged = &target_server.uploads[0].bytes;

    assert_eq!(read_entry(merged, "licensemanager/b.lic").as_deref(), Some("target-license"));
    assert_eq!(read_entry(merged, "licensemanager/a.lic"), None);
    assert_eq!(read_entry(merged, "tomcat/server.xml"), None);
    assert_eq!(read_entry(merged, "security/realm.xml").as_deref(), Some("target-realm"));
    assert_eq!(read_entry(merged, "app/x.cfg").as_deref(), Some("source-app"));

    let descriptor = read_entry(merged, "descriptor.xml").unwrap();
    assert!(descriptor.contains("<name>127_127_Merged_V4.1.05_13FEB2025</name>"));
    assert!(descriptor.contains("<build>77</build>"));

    let source_server = source_state.lock().unwrap();
    assert!(source_server.configs.contains_key("source_Merge"));
    assert!(source_server.uploads.is_empty());
}

#[tokio::test]
async fn test_merge_reports_upload_stage_on_rejection() {
    let (source_addr, _s) = start_server(zip_bytes(&[("app/x.cfg", "x")])).await;
    let (target_addr, target_state) = start_server(zip_bytes(&[("app/x.cfg", "y")])).await;
    let source = connect(source_addr).await;
    let target = connect(target_addr).await;
    target_state.lock().unwrap().reject_uploads = true;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let settings =
        MergeSettings::default().with_date(NaiveDate::from_ymd_opt(2025, 2, 13).unwrap());
    let err = MergeOrchestrator::new(&source, &target, settings)
        .with_progress(tx)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, MergeStage::Upload);
    assert!(matches!(
        err.cause,
        MergeCause::Registry(RegistryError::Rejected { status: 413, .. })
    ));

    let mut stages = Vec::new();
    while let Ok(stage) = rx.try_recv() {
        stages.push(stage);
    }
    assert_eq!(
        &stages[stages.len() - 3..],
        &[MergeStage::Upload, MergeStage::Cleanup, MergeStage::Failed]
    );
}
