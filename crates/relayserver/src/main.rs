use actix_cors::Cors;
use actix_web::{delete, get, post, put, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use relaycore::{IggyHistoryConfig, IggyHistorySink, OperationError, Value, Variables};
use relayruntime::engine::{EngineError, InMemoryEngine};
use relayruntime::{DylibArchiveLoader, ManifestArchiveLoader, PeriodStatistic, RelayRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<RelayRuntime>,
    engine: InMemoryEngine,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    statistic: bool,
}

#[derive(Debug, Deserialize)]
struct ThreadsQuery {
    threads: usize,
}

#[derive(Debug, Deserialize)]
struct PerformanceQuery {
    period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitQuery {
    /// Answer with the outcome instead of the job key
    #[serde(default)]
    wait: bool,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

fn operation_error(e: &OperationError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.human_information(),
        code: e.code().to_string(),
    };
    match e {
        OperationError::NotFound(_) | OperationError::ArchiveNotFound(_) => HttpResponse::NotFound().json(body),
        OperationError::AlreadyStarted(_) | OperationError::AlreadyStopped(_) => HttpResponse::Conflict().json(body),
        _ => {
            error!("{}", e.human_information());
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let connected = data.runtime.container().is_ok().await;
    HttpResponse::Ok().json(serde_json::json!({
        "status": if connected { "healthy" } else { "disconnected" },
        "version": env!("CARGO_PKG_VERSION"),
        "service": "relay",
        "runners": data.runtime.dispatch().running_types().await.len(),
    }))
}

#[get("/api/runners")]
async fn list_runners(data: web::Data<AppState>, query: web::Query<ListQuery>) -> ActixResult<impl Responder> {
    let list = data.runtime.admin().list_runners(query.status, query.statistic).await;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/api/runners/{name}")]
async fn get_runner(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    match data.runtime.admin().runner_detail(&path.into_inner()).await {
        Ok(information) => Ok(HttpResponse::Ok().json(information)),
        Err(e) => Ok(operation_error(&e)),
    }
}

#[put("/api/runners/{name}/start")]
async fn start_runner(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    let name = path.into_inner();
    info!("Start runner requested: {}", name);
    match data.runtime.admin().start_runner(&name).await {
        Ok(state) => Ok(HttpResponse::Ok().json(serde_json::json!({ "name": name, "state": state }))),
        Err(e) => Ok(operation_error(&e)),
    }
}

#[put("/api/runners/{name}/stop")]
async fn stop_runner(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    let name = path.into_inner();
    info!("Stop runner requested: {}", name);
    match data.runtime.admin().stop_runner(&name).await {
        Ok(state) => Ok(HttpResponse::Ok().json(serde_json::json!({ "name": name, "state": state }))),
        Err(e) => Ok(operation_error(&e)),
    }
}

#[get("/api/runners/{runner_type}/performance")]
async fn runner_performance(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PerformanceQuery>,
) -> ActixResult<HttpResponse> {
    let period = match query.period.as_deref() {
        None => PeriodStatistic::OneDay,
        Some(text) => match text.parse::<PeriodStatistic>() {
            Ok(period) => period,
            Err(message) => {
                return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                    error: message,
                    code: "BAD_PERIOD".to_string(),
                }))
            }
        },
    };
    let performance = data.runtime.admin().performance(&path.into_inner(), period).await;
    Ok(HttpResponse::Ok().json(performance))
}

#[get("/api/runtime/threads")]
async fn get_threads(data: web::Data<AppState>) -> impl Responder {
    let threads = data.runtime.dispatch().number_of_threads().await;
    HttpResponse::Ok().json(serde_json::json!({ "threads": threads }))
}

#[put("/api/runtime/threads")]
async fn set_threads(data: web::Data<AppState>, query: web::Query<ThreadsQuery>) -> ActixResult<HttpResponse> {
    info!("Set number of threads requested: {}", query.threads);
    match data.runtime.dispatch().set_number_of_threads(query.threads).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({ "threads": query.threads }))),
        Err(e) => Ok(operation_error(&e)),
    }
}

#[get("/api/operations")]
async fn list_operations(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.runtime.admin().operations())
}

#[put("/api/archives/{name}")]
async fn upload_archive(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> ActixResult<impl Responder> {
    let name = path.into_inner();
    info!("Archive uploaded: {} ({} bytes)", name, body.len());
    let definitions = data.runtime.admin().upload_archive(&name, body.to_vec()).await;
    Ok(HttpResponse::Created().json(definitions))
}

#[delete("/api/archives/{name}")]
async fn delete_archive(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<HttpResponse> {
    let name = path.into_inner();
    match data.runtime.admin().delete_archive(&name).await {
        Ok(deleted) => {
            info!("Deleted archive {} with runners {:?}", name, deleted);
            Ok(HttpResponse::Ok().json(serde_json::json!({ "archive": name, "runners": deleted })))
        }
        Err(e) => Ok(operation_error(&e)),
    }
}

fn engine_error(e: &EngineError) -> HttpResponse {
    warn!("Job not handled: {}", e);
    HttpResponse::ServiceUnavailable().json(ErrorResponse {
        error: e.to_string(),
        code: "ENGINE".to_string(),
    })
}

/// Creates a job on the engine, for the runner subscribed to its type
#[post("/api/jobs/{job_type}")]
async fn submit_job(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<SubmitQuery>,
    body: Option<web::Json<serde_json::Map<String, serde_json::Value>>>,
) -> ActixResult<HttpResponse> {
    let job_type = path.into_inner();
    if data.engine.open_subscriptions(&job_type) == 0 {
        return Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("No runner is subscribed to [{}]", job_type),
            code: "NO_SUBSCRIPTION".to_string(),
        }));
    }
    let variables: Variables = body
        .map(|json| json.into_inner().into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        .unwrap_or_default();

    if query.wait {
        return match data.engine.run_job(&job_type, variables).await {
            Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
            Err(e) => Ok(engine_error(&e)),
        };
    }
    let key = data.engine.submit_job(&job_type, variables);
    info!("Job {} submitted to [{}]", key, job_type);
    Ok(HttpResponse::Accepted().json(serde_json::json!({ "jobKey": key, "jobType": job_type })))
}

/// Outcome of a submitted job, once acknowledged
#[get("/api/jobs/{key}")]
async fn job_outcome(data: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let key = path.into_inner();
    match data.engine.outcome(key) {
        Some(outcome) => HttpResponse::Ok().json(outcome),
        None => HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Job {} is not acknowledged", key),
            code: "PENDING".to_string(),
        }),
    }
}

/// WebSocket endpoint for runtime events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging, {} events skipped", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

async fn history_mirror() -> Option<IggyHistorySink> {
    let url = std::env::var("RELAY_IGGY_URL").ok().filter(|u| !u.trim().is_empty())?;
    let config = IggyHistoryConfig {
        connection_string: url,
        ..IggyHistoryConfig::default()
    };
    match IggyHistorySink::connect(config).await {
        Ok(sink) => Some(sink),
        Err(e) => {
            warn!("Execution history is not published to Iggy: {}", e);
            None
        }
    }
}

/// Routes of the administration API
fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_runners)
        .service(runner_performance)
        .service(get_runner)
        .service(start_runner)
        .service(stop_runner)
        .service(get_threads)
        .service(set_threads)
        .service(list_operations)
        .service(upload_archive)
        .service(delete_archive)
        .service(submit_job)
        .service(job_outcome)
        .service(websocket_events);
}

/// Native libraries first, JSON manifests for everything else
fn archive_loader() -> DylibArchiveLoader {
    let manifests = ManifestArchiveLoader::new(relayrunners::class_catalog());
    let loader = match std::env::var("RELAY_PLUGIN_CACHE").ok().filter(|p| !p.trim().is_empty()) {
        Some(dir) => DylibArchiveLoader::new(dir),
        None => DylibArchiveLoader::in_temp_dir(),
    };
    loader.with_fallback(Arc::new(manifests))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting relay server");

    let config = RuntimeConfig::from_env();
    let engine = InMemoryEngine::new();
    let mut builder = RelayRuntime::builder(config, Arc::new(engine.clone()))
        .embedded(relayrunners::embedded_catalog())
        .archive_loader(Arc::new(archive_loader()));
    if let Some(sink) = history_mirror().await {
        builder = builder.history_mirror(Arc::new(sink));
    }
    let runtime = Arc::new(builder.build());

    match runtime.start().await {
        Ok(started) => info!("Runtime started with {} runners", started),
        Err(e) => error!("Runtime started without runners: {}", e),
    }

    let app_state = web::Data::new(AppState {
        runtime: runtime.clone(),
        engine,
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!("Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    runtime.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use relayruntime::engine::JobOutcome;

    async fn state() -> web::Data<AppState> {
        let engine = InMemoryEngine::new();
        let runtime = RelayRuntime::builder(RuntimeConfig::default(), Arc::new(engine.clone()))
            .embedded(relayrunners::embedded_catalog())
            .build();
        runtime.start().await.unwrap();
        web::Data::new(AppState {
            runtime: Arc::new(runtime),
            engine,
        })
    }

    #[actix_web::test]
    async fn job_runs_and_returns_its_outcome() {
        let data = state().await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/api/jobs/c-set-variables?wait=true")
            .set_json(serde_json::json!({ "operations": "color=\"blue\"" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["outcome"], "COMPLETED");
        assert_eq!(body["detail"]["color"], "blue");

        data.runtime.shutdown().await;
    }

    #[actix_web::test]
    async fn submitted_job_is_acknowledged_later() {
        let data = state().await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let request = test::TestRequest::post()
            .uri("/api/jobs/c-set-variables")
            .set_json(serde_json::json!({ "operations": "size=3" }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: serde_json::Value = test::read_body_json(response).await;
        let key = body["jobKey"].as_i64().unwrap();

        let mut outcome = None;
        for _ in 0..50 {
            outcome = data.engine.outcome(key);
            if outcome.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(matches!(outcome, Some(JobOutcome::Completed(_))));

        let request = test::TestRequest::get().uri(&format!("/api/jobs/{}", key)).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        data.runtime.shutdown().await;
    }

    #[actix_web::test]
    async fn job_without_runner_is_refused() {
        let data = state().await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let request = test::TestRequest::post().uri("/api/jobs/t-nobody").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["code"], "NO_SUBSCRIPTION");

        let request = test::TestRequest::get().uri("/api/jobs/999999").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        data.runtime.shutdown().await;
    }
}
