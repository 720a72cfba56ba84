use std::{convert::Infallible, sync::Arc};

use cdcwatch_result::errors::{BoxedErr, ErrorType, InternalError};
use chrono::{SecondsFormat, Utc};
use http_body_util::Full;
use hyper::{
  body::{Bytes, Incoming},
  header::{HeaderValue, CONTENT_TYPE},
  server::conn::http1::Builder,
  service::service_fn,
  Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus::{
  core::Collector, CounterVec, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry,
  TextEncoder,
};
use serde_json::json;
use tokio::{net::TcpListener, spawn};
use tracing::{debug, error, info};

use crate::controller::lifecycle::ConsumerLifecycle;

/// Prometheus metrics for the change consumer
#[derive(Clone, Debug)]
pub struct MetricsCollector {
  registry: Arc<Registry>,
  pub messages_received: IntCounter,
  pub messages_processed: IntCounter,
  pub messages_failed: CounterVec,
  pub messages_skipped: CounterVec,
  pub receive_errors: IntCounter,
  pub ack_failures: IntCounter,
  pub connect_attempts: CounterVec,
  pub processing_duration_seconds: Histogram,
  pub consumer_running: IntGauge,
}

fn register<C: Collector + Clone + 'static>(
  registry: &Registry,
  metric: C,
  name: &str,
) -> Result<C, BoxedErr> {
  registry.register(Box::new(metric.clone())).map_err(|err| {
    let path = "consumer.server.observability.register".into();
    let msg = format!("failed to register {}", name);
    Box::new(InternalError::new(path, Box::new(err), ErrorType::InternalError, false, msg))
      as BoxedErr
  })?;
  Ok(metric)
}

impl MetricsCollector {
  pub fn new() -> Result<Self, BoxedErr> {
    let ie = |msg: &str, err: prometheus::Error| {
      let path = "consumer.server.observability.new".into();
      let err_type = ErrorType::InternalError;
      Box::new(InternalError { err_type, temp: false, err: Box::new(err), msg: msg.into(), path })
        as BoxedErr
    };

    let registry = Registry::new();

    // --- Message Metrics ---
    let messages_received =
      IntCounter::new("cdc_messages_received_total", "Total messages pulled from the broker")
        .map_err(|err| ie("failed to create messages_received", err))?;
    let messages_received = register(&registry, messages_received, "messages_received")?;

    let messages_processed =
      IntCounter::new("cdc_messages_processed_total", "Total change records emitted")
        .map_err(|err| ie("failed to create messages_processed", err))?;
    let messages_processed = register(&registry, messages_processed, "messages_processed")?;

    let messages_failed = CounterVec::new(
      Opts::new("cdc_messages_failed_total", "Total messages that failed processing"),
      &["reason"],
    )
    .map_err(|err| ie("failed to create messages_failed", err))?;
    let messages_failed = register(&registry, messages_failed, "messages_failed")?;

    let messages_skipped = CounterVec::new(
      Opts::new("cdc_messages_skipped_total", "Total messages skipped without processing"),
      &["reason"],
    )
    .map_err(|err| ie("failed to create messages_skipped", err))?;
    let messages_skipped = register(&registry, messages_skipped, "messages_skipped")?;

    let processing_duration_seconds = Histogram::with_opts(
      HistogramOpts::new("cdc_message_processing_seconds", "Time spent handling one message")
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
    )
    .map_err(|err| ie("failed to create processing_duration_seconds", err))?;
    let processing_duration_seconds =
      register(&registry, processing_duration_seconds, "processing_duration_seconds")?;

    // --- Broker Metrics ---
    let receive_errors =
      IntCounter::new("cdc_receive_errors_total", "Total broker receive errors")
        .map_err(|err| ie("failed to create receive_errors", err))?;
    let receive_errors = register(&registry, receive_errors, "receive_errors")?;

    let ack_failures =
      IntCounter::new("cdc_ack_failures_total", "Total failures to store a processed offset")
        .map_err(|err| ie("failed to create ack_failures", err))?;
    let ack_failures = register(&registry, ack_failures, "ack_failures")?;

    let connect_attempts = CounterVec::new(
      Opts::new("cdc_connect_attempts_total", "Broker connection attempts at startup"),
      &["outcome"],
    )
    .map_err(|err| ie("failed to create connect_attempts", err))?;
    let connect_attempts = register(&registry, connect_attempts, "connect_attempts")?;

    let consumer_running =
      IntGauge::new("cdc_consumer_running", "1 while the message loop is running")
        .map_err(|err| ie("failed to create consumer_running", err))?;
    let consumer_running = register(&registry, consumer_running, "consumer_running")?;

    Ok(MetricsCollector {
      registry: Arc::new(registry),
      messages_received,
      messages_processed,
      messages_failed,
      messages_skipped,
      receive_errors,
      ack_failures,
      connect_attempts,
      processing_duration_seconds,
      consumer_running,
    })
  }

  pub fn record_received(&self) {
    self.messages_received.inc();
  }

  pub fn record_processed(&self, elapsed_secs: f64) {
    self.messages_processed.inc();
    self.processing_duration_seconds.observe(elapsed_secs);
  }

  pub fn record_failed(&self, reason: &str) {
    self.messages_failed.with_label_values(&[reason]).inc();
  }

  pub fn record_skipped(&self, reason: &str) {
    self.messages_skipped.with_label_values(&[reason]).inc();
  }

  pub fn record_connect_attempt(&self, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    self.connect_attempts.with_label_values(&[outcome]).inc();
  }

  pub fn set_running(&self, running: bool) {
    self.consumer_running.set(i64::from(running));
  }

  pub fn encode(&self) -> String {
    TextEncoder::new().encode_to_string(&self.registry.gather()).unwrap_or_else(|err| {
      error!("failed to encode metrics: {}", err);
      String::new()
    })
  }
}

/// Answers liveness probes (`/health`) and exposes metrics (`/metrics`)
#[derive(Clone)]
pub struct LivenessReporter {
  service: String,
  lifecycle: Arc<ConsumerLifecycle>,
  metrics: Arc<MetricsCollector>,
}

fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
  let mut res = Response::new(Full::new(Bytes::from(body)));
  *res.status_mut() = status;
  res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
  res
}

impl LivenessReporter {
  pub fn new(
    service: String,
    lifecycle: Arc<ConsumerLifecycle>,
    metrics: Arc<MetricsCollector>,
  ) -> Self {
    Self { service, lifecycle, metrics }
  }

  pub fn health(&self) -> (StatusCode, serde_json::Value) {
    let healthy = self.lifecycle.is_running();
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = json!({
      "status": if healthy { "healthy" } else { "unhealthy" },
      "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      "service": self.service,
    });
    (status, body)
  }

  pub fn route(&self, path: &str) -> Response<Full<Bytes>> {
    match path {
      "/health" => {
        let (status, body) = self.health();
        respond(status, "application/json", body.to_string())
      }
      "/metrics" => {
        respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", self.metrics.encode())
      }
      _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    }
  }

  pub async fn bind(addr: &str) -> Result<TcpListener, BoxedErr> {
    TcpListener::bind(addr).await.map_err(|err| {
      let path = "consumer.server.observability.bind".into();
      let msg = format!("failed to bind liveness listener on {}", addr);
      Box::new(InternalError::new(path, Box::new(err), ErrorType::Connection, false, msg))
        as BoxedErr
    })
  }

  /// Serve probes until the process exits. Never touches the broker.
  pub async fn run(self, listener: TcpListener) {
    match listener.local_addr() {
      Ok(addr) => info!("Liveness server listening on {}", addr),
      Err(err) => error!("Liveness server has no local address: {}", err),
    }

    loop {
      let socket = match listener.accept().await {
        Ok((socket, _)) => socket,
        Err(err) => {
          error!("Failed to accept liveness connection: {}", err);
          continue;
        }
      };
      let io = TokioIo::new(socket);
      let reporter = self.clone();

      spawn(async move {
        let svc = service_fn(move |req: Request<Incoming>| {
          let res = reporter.route(req.uri().path());
          debug!(path = req.uri().path(), status = res.status().as_u16(), "liveness request");
          async move { Ok::<_, Infallible>(res) }
        });

        if let Err(err) = Builder::new().serve_connection(io, svc).await {
          error!("Error serving liveness connection: {}", err);
        }
      });
    }
  }
}
