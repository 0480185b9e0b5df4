use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::metrics::METRICS;

#[derive(Serialize)]
struct HealthResp<'a> {
    status: &'a str,
}

#[get("/k8s/readyz")]
async fn readyz() -> impl Responder {
    if METRICS.is_ready() {
        HttpResponse::Ok().json(HealthResp { status: "ok" })
    } else {
        HttpResponse::ServiceUnavailable().json(HealthResp { status: "starting" })
    }
}

#[get("/k8s/livez")]
async fn livez() -> impl Responder {
    HttpResponse::Ok().json(HealthResp { status: "ok" })
}

#[get("/k8s/metrics")]
async fn metrics() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(METRICS.snapshot().render())
}

pub async fn run_http(bind: Option<String>) -> std::io::Result<()> {
    let bind_addr = bind.unwrap_or_else(|| format!("{}:{}", Ipv4Addr::UNSPECIFIED, 3000));
    let server = HttpServer::new(|| App::new().service(readyz).service(livez).service(metrics))
        .bind(bind_addr)?
        .workers(1)
        .run();
    server.await
}

#[cfg(test)]
mod tests {
    use actix_web::{test, App};

    use super::*;

    #[actix_web::test]
    async fn livez_is_always_ok() {
        let app = test::init_service(App::new().service(livez)).await;
        let req = test::TestRequest::get().uri("/k8s/livez").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn metrics_are_plain_text() {
        let app = test::init_service(App::new().service(metrics)).await;
        let req = test::TestRequest::get().uri("/k8s/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("maqam_uptime_seconds"));
    }
}
