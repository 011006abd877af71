//! Rollcall server binary.
//!
//! Opens one attendance session, logs the presenter view every tick, and lets
//! a crowd of simulated participants claim attendance against a simulated
//! verifier.
//!
//! # Usage
//!
//! ```bash
//! # Reference behaviour: 2 s codes, 3 s verification, 85% acceptance
//! rollcall-server --room "Computer Science - Room 301"
//!
//! # Busier room, stricter verifier
//! rollcall-server --participants 40 --accept-rate 0.6 --run-secs 60
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use rollcall_core::{
    AttemptTimeouts, CaptureSample, GracePolicy, OtpCode, ParticipantId, SessionConfig,
    SubmissionError, env::Environment,
};
use rollcall_server::{DriverConfig, ServerError, SessionDriver, SimulatedVerifier, SystemEnv};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

type Driver = SessionDriver<SystemEnv, SimulatedVerifier<SystemEnv>>;

/// Rollcall attendance session server
#[derive(Parser, Debug)]
#[command(name = "rollcall-server")]
#[command(about = "Rotating-code attendance session with simulated participants")]
#[command(version)]
struct Args {
    /// Room or class label shown on the presenter display
    #[arg(long, default_value = "Computer Science - Room 301")]
    room: String,

    /// Code lifetime in milliseconds
    #[arg(long, default_value = "2000")]
    cadence_ms: u64,

    /// How often the session is ticked, in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Grace window for the previous code, in milliseconds (0 disables)
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Seconds a participant has to provide a capture
    #[arg(long, default_value = "60")]
    capture_timeout_secs: u64,

    /// Milliseconds the verifier has to answer
    #[arg(long, default_value = "10000")]
    verifier_timeout_ms: u64,

    /// Simulated verifier processing delay in milliseconds
    #[arg(long, default_value = "3000")]
    verifier_delay_ms: u64,

    /// Probability the simulated verifier accepts a capture
    #[arg(long, default_value = "0.85")]
    accept_rate: f64,

    /// First code to display (four digits)
    #[arg(long)]
    initial_code: Option<String>,

    /// Number of simulated participants
    #[arg(long, default_value = "12")]
    participants: u32,

    /// Seconds before the presenter ends the session
    #[arg(long, default_value = "30")]
    run_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn driver_config(&self) -> Result<DriverConfig, ServerError> {
        let cadence = Duration::from_millis(self.cadence_ms);
        let grace = self.grace_ms.map_or(GracePolicy::new(cadence), |ms| {
            GracePolicy::new(Duration::from_millis(ms))
        });
        let initial_code = self
            .initial_code
            .as_deref()
            .map(str::parse::<OtpCode>)
            .transpose()
            .map_err(|e| ServerError::Config(format!("--initial-code: {e}")))?;

        Ok(DriverConfig {
            session: SessionConfig {
                cadence,
                grace,
                timeouts: AttemptTimeouts {
                    capture: Duration::from_secs(self.capture_timeout_secs),
                    verifier: Duration::from_millis(self.verifier_timeout_ms),
                },
            },
            tick_interval: Duration::from_millis(self.tick_ms),
            initial_code,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.driver_config()?;
    let env = SystemEnv::new();
    let verifier = SimulatedVerifier::with_params(
        env.clone(),
        Duration::from_millis(args.verifier_delay_ms),
        args.accept_rate,
    )?;

    let driver = Arc::new(SessionDriver::open(env.clone(), verifier, args.room.clone(), config)?);
    tracing::info!(session = %driver.id(), room = %args.room, "Rollcall session open");

    let presenter = tokio::spawn(present(Arc::clone(&driver), config.tick_interval));

    let window = Duration::from_secs(args.run_secs);
    let mut participants = Vec::new();
    for n in 0..args.participants {
        let arrival = jitter(&env, window / 2);
        participants.push(tokio::spawn(participate(Arc::clone(&driver), env.clone(), n, arrival)));
    }

    env.sleep(window).await;
    let summary = driver.close().await;
    presenter.abort();

    for participant in participants {
        if let Err(e) = participant.await {
            tracing::warn!("participant task failed: {}", e);
        }
    }

    tracing::info!(
        accepted = summary.accepted_count,
        attempts = summary.total_attempts,
        "Session ended"
    );

    Ok(())
}

/// Presenter display: log the snapshot every tick.
async fn present(driver: Arc<Driver>, interval: Duration) {
    loop {
        let snapshot = driver.snapshot().await;
        tracing::info!(
            code = %snapshot.current_code,
            refreshes_in = snapshot.remaining_validity_secs(),
            present = snapshot.accepted_count,
            attempts = snapshot.total_attempts,
            "presenter"
        );
        tokio::time::sleep(interval).await;
    }
}

/// One simulated participant: read the code, submit, capture, await verdict.
async fn participate(driver: Arc<Driver>, env: SystemEnv, n: u32, arrival: Duration) {
    let participant = ParticipantId::new(format!("student-{n:03}"));
    env.sleep(arrival).await;

    loop {
        // Reading the display and typing takes a moment; sometimes long
        // enough to fall into the grace window.
        let code = driver.snapshot().await.current_code.to_string();
        env.sleep(jitter(&env, Duration::from_millis(2500))).await;

        let attempt = match driver.submit_code(participant.clone(), &code).await {
            Ok(attempt) => attempt,
            Err(SubmissionError::CodeMismatch) => {
                tracing::info!(%participant, "code went stale, reading again");
                continue;
            },
            Err(e) => {
                tracing::info!(%participant, "submission refused: {}", e);
                return;
            },
        };

        env.sleep(jitter(&env, Duration::from_secs(2))).await;
        let mut frame = vec![0u8; 256];
        env.random_bytes(&mut frame);
        if let Err(e) = driver.provide_capture(attempt, CaptureSample::new(frame)).await {
            tracing::info!(%participant, "capture refused: {}", e);
            return;
        }

        match driver.wait_for_outcome(attempt).await {
            Ok(state) => tracing::info!(%participant, %attempt, outcome = state.name(), "done"),
            Err(e) => tracing::warn!(%participant, "lost attempt: {}", e),
        }
        return;
    }
}

fn jitter(env: &SystemEnv, max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(1);
    Duration::from_millis(env.random_u64() % max_ms)
}
