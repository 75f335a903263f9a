//! HTTP surface of the migrator

use actix_web::{
    HttpRequest, HttpResponse, Responder, get, post,
    web::{Data, Path, ServiceConfig},
};
use migrator_changes::ApplyMetrics;
use serde::Serialize;
use tracing::{Span, field, instrument, warn};

use crate::runner::State;
use crate::{Error, telemetry};

/// Outcome of an apply request
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    /// Name of the applied migration
    pub migration: String,
    /// What was applied, as far as the migration got
    pub metrics: Option<ApplyMetrics>,
    /// Every failure, one message each
    pub errors: Vec<String>,
    /// Trace of the request, when traces are exported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(mut builder: actix_web::HttpResponseBuilder, err: &Error) -> HttpResponse {
    builder.json(ErrorResponse {
        error: err.to_string(),
    })
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[get("/migrations")]
async fn list(c: Data<State>) -> impl Responder {
    match c.engine.list().await {
        Ok(infos) => HttpResponse::Ok().json(infos),
        Err(err) => {
            warn!(error = %err, "listing migrations failed");
            error_response(HttpResponse::ServiceUnavailable(), &err)
        }
    }
}

#[post("/migrations/{name}/apply")]
#[instrument(skip(c), fields(trace_id = field::Empty))]
async fn apply(c: Data<State>, name: Path<String>) -> impl Responder {
    let name = name.into_inner();

    if !c.is_leader() {
        return error_response(
            HttpResponse::Conflict(),
            &Error::Message("not the leader, retry against the current leader".into()),
        );
    }

    if let Err(err) = c.engine.registry().by_name(&name) {
        return error_response(HttpResponse::NotFound(), &Error::from(err));
    }

    let trace_id = telemetry::current_trace_id();
    if let Some(id) = &trace_id {
        Span::current().record("trace_id", field::display(id));
    }

    let report = c.engine.apply(&name).await;
    c.record([(name.clone(), report.metrics)].into(), &report.result)
        .await;

    let errors: Vec<String> = match &report.result {
        Ok(()) => Vec::new(),
        Err(err) => err.causes().iter().map(ToString::to_string).collect(),
    };

    let mut builder = if errors.is_empty() {
        HttpResponse::Ok()
    } else {
        HttpResponse::InternalServerError()
    };

    builder.json(ApplyResponse {
        migration: name,
        metrics: report.metrics,
        errors,
        trace_id,
    })
}

/// Registers every route on an actix app
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(health)
        .service(index)
        .service(list)
        .service(apply);
}
