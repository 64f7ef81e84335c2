use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::Context;
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use blinds_common::{
    http,
    sim::{Relay, SimButton, SimRelay},
    BlindConfig, BlindController, BlindError, InputArbiter, MotorDriver, RuntimeConfig,
    ScheduleEngine, StdDelay, SystemClock, WallMinute,
};

type HostController = BlindController<SimRelay, StdDelay, SystemClock>;

struct ConfigStore {
    runtime_path: PathBuf,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    if runtime.timezone.parse::<Tz>().is_err() {
        warn!("unknown timezone {:?}, using UTC", runtime.timezone);
        runtime.timezone = "UTC".to_string();
    }

    let schedule = ScheduleEngine::from_config(&runtime.schedule)
        .context("invalid wake/sleep time in runtime config")?;
    for rule in schedule.rules() {
        info!(
            "{} rule at {} rolls {}",
            rule.label,
            rule.trigger,
            rule.action.as_str()
        );
    }

    let clock = SystemClock::new();
    let up = SimRelay::new(Relay::Up, clock);
    let down = up.sibling(Relay::Down);
    let motor = MotorDriver::new(up, down, StdDelay, clock)
        .context("failed to initialise simulated relays")?;
    let controller = Arc::new(BlindController::new(
        motor,
        Duration::from_millis(runtime.blind.calibration_poll_ms),
    ));

    let button = SimButton::new();
    spawn_control_loop(
        Arc::clone(&controller),
        InputArbiter::new(button.clone(), schedule),
        runtime.clone(),
    )?;
    spawn_stdin_button(button);
    spawn_status_log_loop(
        Arc::clone(&controller),
        Duration::from_millis(runtime.blind.status_log_interval_ms),
    );

    info!("press enter to simulate the button; hold it at boot to start setup");

    let port = std::env::var("BLINDS_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.blind.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind blinds server at {addr}"))?;

    info!("blinds listening on http://{addr}");
    tokio::select! {
        result = accept_loop(listener, controller, runtime.blind.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    controller: Arc<HostController>,
    limits: BlindConfig,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("failed to accept http connection")?;
        debug!("http connection from {peer}");
        let controller = Arc::clone(&controller);
        let limits = limits.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, controller, &limits).await {
                debug!("http connection from {peer} closed: {err:#}");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    controller: Arc<HostController>,
    limits: &BlindConfig,
) -> anyhow::Result<()> {
    if !controller.is_calibrated() {
        warn!("http request rejected: blinds not set up yet");
        stream.shutdown().await?;
        return Ok(());
    }

    let mut buf = vec![0u8; limits.max_request_bytes];
    let n = tokio::time::timeout(
        Duration::from_millis(limits.request_timeout_ms),
        stream.read(&mut buf),
    )
    .await
    .context("http request timed out")??;
    buf.truncate(n);

    // Rolls block for seconds, keep them off the async workers.
    let response =
        tokio::task::spawn_blocking(move || http::respond(controller.as_ref(), &buf)).await?;

    match response {
        Ok(response) => {
            stream.write_all(&response.to_bytes()).await?;
            stream.flush().await?;
        }
        Err(BlindError::NotCalibrated) => {
            warn!("http request rejected: blinds not set up yet");
        }
        Err(err) => debug!("http request dropped: {err}"),
    }

    stream.shutdown().await?;
    Ok(())
}

fn spawn_control_loop(
    controller: Arc<HostController>,
    mut arbiter: InputArbiter<SimButton>,
    runtime: RuntimeConfig,
) -> anyhow::Result<()> {
    let poll = Duration::from_millis(runtime.blind.poll_interval_ms);
    thread::Builder::new()
        .name("control-loop".into())
        .spawn(move || loop {
            let now = now_in_timezone(&runtime.timezone).map(|now| WallMinute::from_time(&now));
            if let Err(err) = arbiter.tick(controller.as_ref(), now) {
                warn!("control loop tick failed: {err}");
            }
            thread::sleep(poll);
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn spawn_stdin_button(button: SimButton) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(_)) => {
                    info!("button pressed");
                    button.press();
                }
                Ok(None) => {
                    debug!("stdin closed, button input disabled");
                    break;
                }
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            }
        }
    });
}

fn spawn_status_log_loop(controller: Arc<HostController>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match serde_json::to_string(&controller.status()) {
                Ok(body) => debug!("blinds status {body}"),
                Err(err) => warn!("blinds status serialization failed: {err}"),
            }
        }
    });
}

impl ConfigStore {
    fn new() -> Self {
        let runtime_path = std::env::var("BLINDS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.blinds/runtime.json"));

        Self { runtime_path }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => RuntimeConfig::from_json_slice(&raw)
                .with_context(|| format!("invalid config at {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}
