//! HTTP surface. Every outcome is HTTP 200 with a JSON envelope, except a
//! successful console read, which is the raw transcript as `text/plain`.

use std::{fmt::Display, time::Instant};

use axum::{
    Form, Json, Router,
    extract::{Path, Query, Request, State, rejection::FormRejection},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Serialize};

use crate::console::ConsoleLimit;
use crate::launch::{MAX_PORT, MIN_PORT};
use crate::supervisor::Supervisor;

#[derive(Debug, Serialize)]
pub struct Header {
    pub process_time: String,
    pub is_success: bool,
    pub messages: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub header: Header,
    pub data: Option<T>,
}

fn process_time(started: Instant) -> String {
    format!("{}ms", started.elapsed().as_secs_f64() * 1000.0)
}

fn respond<T: Serialize, E: Display>(started: Instant, result: Result<T, E>) -> Response {
    let envelope = match result {
        Ok(data) => Envelope {
            header: Header {
                process_time: process_time(started),
                is_success: true,
                messages: None,
            },
            data: Some(data),
        },
        Err(err) => Envelope {
            header: Header {
                process_time: process_time(started),
                is_success: false,
                messages: Some(err.to_string()),
            },
            data: None,
        },
    };
    Json(envelope).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct StartForm {
    pub ram_gb: Option<String>,
    pub port: Option<String>,
    pub world_name: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct StartArgs {
    pub ram_gb: u32,
    pub port: u16,
    pub world_name: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{name} is required"))
}

fn parse_int(raw: &str, name: &str) -> Result<i64, String> {
    raw.parse::<i64>()
        .map_err(|e| format!("invalid {name} {raw:?}: {e}"))
}

impl StartForm {
    pub fn validate(&self) -> Result<StartArgs, String> {
        let ram_gb = parse_int(required(&self.ram_gb, "ram_gb")?, "ram_gb")?;
        if ram_gb <= 0 {
            return Err("ram_gb cannot <= 0".to_string());
        }
        let ram_gb = u32::try_from(ram_gb).map_err(|_| format!("ram_gb too large: {ram_gb}"))?;

        let port = parse_int(required(&self.port, "port")?, "port")?;
        if port < i64::from(MIN_PORT) {
            return Err(format!("port cannot <= {MIN_PORT}"));
        }
        if port > i64::from(MAX_PORT) {
            return Err(format!("port cannot >= {MAX_PORT}"));
        }

        Ok(StartArgs {
            ram_gb,
            port: port as u16,
            world_name: self.world_name.clone().filter(|w| !w.is_empty()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandForm {
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsoleQuery {
    pub limit: Option<String>,
}

async fn list_servers(State(sup): State<Supervisor>) -> Response {
    let started = Instant::now();
    let rows = sup.statuses().await;
    respond::<_, String>(started, Ok(rows))
}

async fn create_server(State(sup): State<Supervisor>) -> Response {
    let started = Instant::now();
    respond(started, sup.create().await)
}

async fn delete_server(State(sup): State<Supervisor>, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let result = sup.delete(&id).await.map(|()| "server successfully deleted");
    respond(started, result)
}

async fn agree_eula(State(sup): State<Supervisor>, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let result = sup.agree_eula(&id).await.map(|()| "eula set to agree");
    respond(started, result)
}

async fn start_server(
    State(sup): State<Supervisor>,
    Path(id): Path<String>,
    form: Result<Form<StartForm>, FormRejection>,
) -> Response {
    let started = Instant::now();
    let args = match form {
        Ok(Form(form)) => form.validate(),
        Err(rejection) => Err(rejection.body_text()),
    };
    let args = match args {
        Ok(args) => args,
        Err(msg) => return respond::<(), _>(started, Err(msg)),
    };

    let result = sup
        .start(&id, args.ram_gb, args.port, args.world_name.as_deref())
        .await
        .map(|()| "attempted to start");
    respond(started, result)
}

async fn stop_server(State(sup): State<Supervisor>, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let result = sup.stop(&id).await.map(|()| "attempted to stop");
    respond(started, result)
}

async fn read_console(
    State(sup): State<Supervisor>,
    Path(id): Path<String>,
    Query(query): Query<ConsoleQuery>,
) -> Response {
    let started = Instant::now();
    let limit = match query.limit.as_deref().filter(|l| !l.is_empty()) {
        None => None,
        Some(raw) => match ConsoleLimit::parse(raw) {
            Ok(limit) => Some(limit),
            Err(err) => return respond::<(), _>(started, Err(err)),
        },
    };

    match sup.read_console(&id, limit).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain")], text).into_response(),
        Err(err) => respond::<(), _>(started, Err(err)),
    }
}

async fn execute_command(
    State(sup): State<Supervisor>,
    Path(id): Path<String>,
    form: Result<Form<CommandForm>, FormRejection>,
) -> Response {
    let started = Instant::now();
    let command = match form {
        Ok(Form(form)) => form.command.unwrap_or_default(),
        Err(rejection) => return respond::<(), _>(started, Err(rejection.body_text())),
    };
    let result = sup
        .send_command(&id, &command)
        .await
        .map(|()| "command executed");
    respond(started, result)
}

async fn log_request(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let res = next.run(req).await;
    tracing::info!(
        %method,
        %uri,
        status = res.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http request"
    );
    res
}

pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/servers", get(list_servers))
        .route("/servers/create", post(create_server))
        .route("/server/:id/delete", delete(delete_server))
        .route("/server/:id/agree-eula", patch(agree_eula))
        .route("/server/:id/start", patch(start_server))
        .route("/server/:id/stop", patch(stop_server))
        .route("/server/:id/console", get(read_console))
        .route("/server/:id/console/execute", post(execute_command))
        .layer(middleware::from_fn(log_request))
        .with_state(supervisor)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AgentConfig;
    use crate::watchdog::TracingObserver;

    fn form(ram: &str, port: &str, world: &str) -> StartForm {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        StartForm {
            ram_gb: opt(ram),
            port: opt(port),
            world_name: opt(world),
        }
    }

    #[test]
    fn start_form_validation_messages() {
        assert_eq!(form("", "25005", "").validate().unwrap_err(), "ram_gb is required");
        assert_eq!(form("2", "", "").validate().unwrap_err(), "port is required");
        assert_eq!(form("0", "25005", "").validate().unwrap_err(), "ram_gb cannot <= 0");
        assert_eq!(form("2", "24999", "").validate().unwrap_err(), "port cannot <= 25000");
        assert_eq!(form("2", "30001", "").validate().unwrap_err(), "port cannot >= 30000");
        assert!(form("two", "25005", "").validate().unwrap_err().contains("ram_gb"));
    }

    #[test]
    fn start_form_accepts_bounds_and_blank_world() {
        let args = form("2", "25000", "").validate().unwrap();
        assert_eq!(
            args,
            StartArgs {
                ram_gb: 2,
                port: 25000,
                world_name: None
            }
        );
        let args = form("4", "30000", "survival").validate().unwrap();
        assert_eq!(args.world_name.as_deref(), Some("survival"));
        let args = form("4", "30000", " survival ").validate().unwrap();
        assert_eq!(args.world_name.as_deref(), Some(" survival "));
    }

    #[test]
    fn envelope_shape() {
        let ok = serde_json::to_value(Envelope {
            header: Header {
                process_time: "0.5ms".to_string(),
                is_success: true,
                messages: None,
            },
            data: Some("attempted to start"),
        })
        .unwrap();
        assert_eq!(
            ok,
            serde_json::json!({
                "header": {"process_time": "0.5ms", "is_success": true, "messages": null},
                "data": "attempted to start"
            })
        );
    }

    #[test]
    fn process_time_is_milliseconds() {
        let s = process_time(Instant::now());
        assert!(s.ends_with("ms"));
        assert!(s.trim_end_matches("ms").parse::<f64>().is_ok());
    }

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn handlers_wrap_results_in_envelope() {
        let root = tempfile::tempdir().unwrap();
        let config = AgentConfig::with_server_root(root.path().join("server"));
        let sup = Supervisor::new(config, Arc::new(TracingObserver))
            .await
            .unwrap();

        let created = body_json(create_server(State(sup.clone())).await).await;
        assert_eq!(created["header"]["is_success"], true);
        let id = created["data"].as_str().unwrap().to_string();

        let listed = body_json(list_servers(State(sup.clone())).await).await;
        assert_eq!(listed["data"][0]["server_id"], id.as_str());
        assert_eq!(listed["data"][0]["status"], "stopped");
        assert_eq!(listed["data"][0]["last_error"], "need to accept eula");

        let res = stop_server(State(sup.clone()), Path(id.clone())).await;
        assert_eq!(res.status(), axum::http::StatusCode::OK);
        let stopped = body_json(res).await;
        assert_eq!(stopped["header"]["is_success"], false);
        assert_eq!(stopped["header"]["messages"], "server is not started");
        assert!(stopped["data"].is_null());

        let console = read_console(
            State(sup.clone()),
            Path(id.clone()),
            Query(ConsoleQuery {
                limit: Some("0".to_string()),
            }),
        )
        .await;
        assert_eq!(body_json(console).await["header"]["messages"], "limit cannot <= 0");

        let deleted = body_json(delete_server(State(sup.clone()), Path(id)).await).await;
        assert_eq!(deleted["data"], "server successfully deleted");
    }
}
