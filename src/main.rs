use std::sync::Arc;

use chrono::NaiveTime;
use ride_engine::api;
use ride_engine::backend::memory::InMemoryBackend;
use ride_engine::backend::{RequestFilter, SystemClock};
use ride_engine::config::Config;
use ride_engine::engine::session::run_event_loop;
use ride_engine::error::AppError;
use ride_engine::geo::StraightLineRouter;
use ride_engine::models::driver::DriverProfile;
use ride_engine::models::tariff::Tariff;
use ride_engine::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let clock = SystemClock::new(config.utc_offset_minutes).ok_or_else(|| {
        AppError::Internal(format!(
            "invalid UTC_OFFSET_MINUTES: {}",
            config.utc_offset_minutes
        ))
    })?;

    let backend = Arc::new(InMemoryBackend::new(config.event_buffer_size));
    backend.set_tariffs(default_tariffs()?).await;
    backend.insert_driver(DriverProfile {
        id: config.driver_id,
        full_name: "Local Driver".to_string(),
        vehicle_model: Some("Sedan".to_string()),
        license_plate: Some("LOC4L00".to_string()),
        balance: 0.0,
        fees_owed: 0.0,
        average_rating: None,
    });

    let (app_state, events_rx) = AppState::new(
        config.driver_id,
        backend,
        Arc::new(StraightLineRouter::new(config.average_speed_kmh)),
        Arc::new(clock),
        config.session_settings(),
        config.event_buffer_size,
    );
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_event_loop(shared_state.session.clone(), events_rx));
    shared_state
        .session
        .watch_requests(RequestFilter::default())
        .await
        .map_err(|err| AppError::Internal(format!("failed to watch ride requests: {err}")))?;

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        driver_id = %config.driver_id,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn default_tariffs() -> Result<Vec<Tariff>, AppError> {
    let at = |h: u32| {
        NaiveTime::from_hms_opt(h, 0, 0)
            .ok_or_else(|| AppError::Internal(format!("invalid tariff hour {h}")))
    };

    Ok(vec![
        Tariff {
            name: "night".to_string(),
            start_time: at(22)?,
            end_time: at(5)?,
            minimum_fare: 12.0,
            per_kilometer: 2.6,
            per_minute: 0.45,
        },
        Tariff {
            name: "day".to_string(),
            start_time: at(5)?,
            end_time: at(22)?,
            minimum_fare: 9.0,
            per_kilometer: 2.1,
            per_minute: 0.35,
        },
    ])
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
