use std::sync::Arc;

use cdcwatch_config::{config, load_warnings, LogFormat, Logging, Settings};
use cdcwatch_result::errors::{BoxedErr, ErrorType, SimpleError};
use tokio::{select, spawn, task::JoinError, time::timeout};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::{
  controller::{
    emitter::ChangeEmitter, kafka::KafkaBroker, lifecycle::ConsumerLifecycle,
    shutdown::shutdown_listener, CdcConsumerController, CdcConsumerControllerArgs,
    ControllerError,
  },
  server::observability::{LivenessReporter, MetricsCollector},
};

pub mod observability;

pub struct CdcConsumerServer {
  pub(super) config: Arc<Settings>,
  pub(super) metrics: Arc<MetricsCollector>,
  pub(super) lifecycle: Arc<ConsumerLifecycle>,
}

impl CdcConsumerServer {
  pub async fn new() -> Result<CdcConsumerServer, BoxedErr> {
    let config = config().await;
    CdcConsumerServer::setup_logging(&config.logging)?;
    // config was loaded before any subscriber existed
    for warning in load_warnings().await {
      warn!("{}", warning);
    }

    let metrics = MetricsCollector::new()?;

    let server = CdcConsumerServer {
      config: Arc::new(config),
      metrics: Arc::new(metrics),
      lifecycle: Arc::new(ConsumerLifecycle::new()),
    };

    Ok(server)
  }

  /// Serve liveness, consume until a termination signal, then give the
  /// consumer `shutdown.grace_period_secs` to finish and disconnect
  pub async fn run(&self) -> Result<(), BoxedErr> {
    let listener = LivenessReporter::bind(&self.config.hosts.liveness).await?;
    let reporter = LivenessReporter::new(
      self.config.service_name.clone(),
      self.lifecycle.clone(),
      self.metrics.clone(),
    );
    spawn(reporter.run(listener));

    shutdown_listener(self.lifecycle.clone());

    let ctr_args = CdcConsumerControllerArgs {
      config: self.config.clone(),
      metrics: self.metrics.clone(),
      lifecycle: self.lifecycle.clone(),
      broker: Arc::new(KafkaBroker::new(&self.config.kafka)),
      emitter: Arc::new(ChangeEmitter::stdout()),
    };
    let controller = CdcConsumerController::new(ctr_args);

    info!(
      brokers = %self.config.kafka.brokers.join(","),
      topic = %self.config.topics.cdc_changes,
      "Starting {}",
      self.config.service_name
    );
    let mut handle = spawn(controller.run());

    select! {
      res = &mut handle => return CdcConsumerServer::finish(res),
      _ = self.lifecycle.cancelled() => {}
    }

    let grace = self.config.shutdown.grace_period();
    match timeout(grace, &mut handle).await {
      Ok(res) => CdcConsumerServer::finish(res),
      Err(_) => {
        warn!("Consumer did not stop within {:?}, aborting", grace);
        handle.abort();
        Ok(())
      }
    }
  }

  fn finish(res: Result<Result<(), ControllerError>, JoinError>) -> Result<(), BoxedErr> {
    let se = |err: BoxedErr, err_type: ErrorType, message: String| -> BoxedErr {
      Box::new(SimpleError { message, err_type, err })
    };

    match res {
      Ok(Ok(())) => {
        info!("Consumer stopped");
        Ok(())
      }
      Ok(Err(err)) => {
        error!("Consumer failed: {}", err);
        let message = err.to_string();
        Err(se(Box::new(err), ErrorType::Connection, message))
      }
      Err(err) => {
        error!("Consumer task failed: {}", err);
        Err(se(Box::new(err), ErrorType::TaskFailed, "consumer task failed".into()))
      }
    }
  }

  fn setup_logging(logging: &Logging) -> Result<(), BoxedErr> {
    let env_filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let res = match logging.format {
      LogFormat::Json => tracing::subscriber::set_global_default(
        registry.with(fmt::layer().json().flatten_event(true).with_current_span(false)),
      ),
      LogFormat::Pretty => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };

    res.map_err(|err| {
      Box::new(SimpleError {
        message: "failed to set tracing subscriber".into(),
        err_type: ErrorType::ConfigError,
        err: Box::new(err),
      }) as BoxedErr
    })
  }
}
