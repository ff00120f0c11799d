use anyhow::{Context, Result};
use kiosk_core::{
    ArcFaceEncoder, DetectionAdapter, EmotionClassifier, EuclideanMatcher, FaceDetector,
    FerPlusClassifier, MessagingChannel, Registry, UnknownEmotion, ARCFACE_DIMENSION,
};
use kiosk_hw::SensorFeed;
use kiosk_store::SqliteStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod dispatch;
mod engine;
mod gate;
mod gateway;
mod greeter;
mod services;
mod status;
mod visits;

use config::{Config, Secrets};
use gateway::{Backoff, PersistenceGateway, RetryPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("kioskd starting");

    let config = Config::load()?;
    let secrets = Secrets::from_env();
    tracing::debug!(?config, ?secrets, "configuration loaded");

    // Durable store and registry (fail-fast)
    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("open customer store {}", config.db_path.display()))?;
    let policy = RetryPolicy {
        max_attempts: config.store_max_attempts,
        delay: Duration::from_millis(config.store_retry_delay_ms),
        backoff: match config.store_backoff_cap_ms {
            0 => Backoff::Fixed,
            cap => Backoff::Exponential {
                cap: Duration::from_millis(cap),
            },
        },
        attempt_timeout: Duration::from_millis(config.store_timeout_ms),
        ..RetryPolicy::default()
    };
    let gateway = Arc::new(PersistenceGateway::new(Arc::new(store), policy));
    let documents = gateway
        .load_registry_documents()
        .await
        .context("load known customers")?;
    let registry = Arc::new(Registry::build(
        ARCFACE_DIMENSION,
        documents.iter().map(|d| d.to_known_customer()),
    ));
    if registry.is_empty() {
        tracing::warn!("no known customers; every face will be unrecognized");
    }

    // Models (fail-fast, except emotion which degrades to "unknown")
    let detector = FaceDetector::load(&config.scrfd_model_path())?;
    tracing::info!(path = %config.scrfd_model_path(), "SCRFD detector loaded");
    let encoder = ArcFaceEncoder::load(&config.arcface_model_path())?;
    tracing::info!(path = %config.arcface_model_path(), "ArcFace encoder loaded");
    let classifier: Box<dyn EmotionClassifier> =
        match FerPlusClassifier::load(&config.emotion_model_path()) {
            Ok(c) => {
                tracing::info!(
                    path = %config.emotion_model_path(),
                    "FER+ emotion classifier loaded"
                );
                Box::new(c)
            }
            Err(e) => {
                tracing::warn!(error = %e, "emotion model unavailable; emotions will be unknown");
                Box::new(UnknownEmotion)
            }
        };

    // Collaborators
    let text = Arc::new(services::ChatTextGenerator::new(
        config.text_api_url.clone(),
        config.text_model.clone(),
        secrets.groq_api_key.clone(),
    ));
    let speech = Arc::new(services::EspeakSynthesizer::new(
        config.speech_command.clone(),
        config.speech_rate_wpm,
    ));
    let messaging: Arc<dyn MessagingChannel> = match (
        secrets.twilio_account_sid,
        secrets.twilio_auth_token,
        secrets.twilio_whatsapp_number,
    ) {
        (Some(sid), Some(token), Some(from)) => {
            Arc::new(services::TwilioChannel::new(sid, token, &from))
        }
        _ => {
            tracing::warn!("Twilio credentials missing; follow-up messages disabled");
            Arc::new(services::DisabledChannel)
        }
    };

    let tracker = TaskTracker::new();
    let stats = Arc::new(status::KioskStats::default());
    stats.registry_size.store(registry.len(), Ordering::Relaxed);

    let dispatcher = dispatch::NotificationDispatcher::new(
        text,
        speech,
        messaging,
        config.worker_permits,
        config.message_delay(),
        tracker.clone(),
    );
    let visits = Arc::new(visits::VisitStateStore::new(
        gateway.clone(),
        Arc::new(visits::SystemClock),
        config.visit_window(),
        config.lock_shards,
    ));
    let greeter = Arc::new(greeter::Greeter::new(
        registry.clone(),
        visits.clone(),
        dispatcher,
        stats.clone(),
    ));

    // D-Bus status surface (optional)
    let _dbus = if config.dbus_enabled {
        let service = dbus_interface::GreeterService::new(stats.clone(), visits.clone());
        match serve_dbus(service).await {
            Ok(conn) => {
                tracing::info!(name = dbus_interface::BUS_NAME, "D-Bus interface registered");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "D-Bus unavailable; status interface disabled");
                None
            }
        }
    } else {
        None
    };

    // Sensing loop
    let timeout = config.sensor_timeout();
    let sensor = SensorFeed::open(&config.sensor_device, config.sensor_baud, timeout)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "sensor not available yet; will keep retrying");
            SensorFeed::unopened(&config.sensor_device, config.sensor_baud, timeout)
        });
    let stop = CancellationToken::new();
    let sensing = engine::spawn_sensing(
        sensor,
        gate::CameraFactory::new(config.camera_device.clone()),
        config.proximity_threshold_cm,
        engine::Vision {
            adapter: DetectionAdapter::new(detector, encoder),
            classifier,
            matcher: Box::new(EuclideanMatcher),
            tolerance: config.match_tolerance,
        },
        registry,
        engine::Handoff {
            greeter,
            tracker: tracker.clone(),
            runtime: tokio::runtime::Handle::current(),
            stats,
        },
        stop.clone(),
    )
    .context("spawn sensing thread")?;

    tracing::info!("kioskd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("kioskd shutting down");

    stop.cancel();
    match tokio::task::spawn_blocking(move || sensing.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => tracing::error!("sensing thread panicked"),
        Err(e) => tracing::error!(error = %e, "failed to join sensing thread"),
    }

    tracker.close();
    tracing::info!(pending = tracker.len(), "waiting for notification tasks");
    tracker.wait().await;

    tracing::info!("kioskd stopped");
    Ok(())
}

async fn serve_dbus(service: dbus_interface::GreeterService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
}
