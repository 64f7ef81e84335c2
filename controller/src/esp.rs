use core::convert::TryInto;
use std::{
    io::Write as _,
    net::{Ipv4Addr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use blinds_common::{
    config::NetworkConfig, http, BlindController, BlindError, InputArbiter, MotorDriver,
    RuntimeConfig, ScheduleEngine, SystemClock, WallMinute,
};

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const CONTROL_STACK_SIZE: usize = 12 * 1024;
const HTTP_STACK_SIZE: usize = 8 * 1024;
const SNTP_POLL_MS: u64 = 250;

type Relay = PinDriver<'static, AnyOutputPin, Output>;
type Button = PinDriver<'static, AnyInputPin, Input>;
type DeviceController = BlindController<Relay, FreeRtos, SystemClock>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);
    info!(
        "blinds config: ssid=`{}`, relays up=GPIO{} down=GPIO{}, button=GPIO{}",
        runtime.network.wifi_ssid,
        runtime.pins.up_relay_gpio,
        runtime.pins.down_relay_gpio,
        runtime.pins.button_gpio,
    );

    let schedule = ScheduleEngine::from_config(&runtime.schedule)
        .context("invalid wake/sleep time in runtime config")?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let up = output_pin(runtime.pins.up_relay_gpio).context("failed to init up relay")?;
    let down = output_pin(runtime.pins.down_relay_gpio).context("failed to init down relay")?;
    let button = input_pin(runtime.pins.button_gpio).context("failed to init button")?;

    let clock = SystemClock::new();
    let motor = MotorDriver::new(up, down, FreeRtos, clock).context("failed to release relays")?;
    let controller = Arc::new(BlindController::new(
        motor,
        Duration::from_millis(runtime.blind.calibration_poll_ms),
    ));

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)?;
    let ip = wifi
        .sta_netif()
        .get_ip_info()
        .context("failed to read station IP")?
        .ip;
    info!("wifi connected, station ip {ip}");

    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    let time_synced = Arc::new(AtomicBool::new(false));
    match wait_for_sntp(&sntp, Duration::from_secs(runtime.blind.clock_sync_timeout_secs)) {
        Ok(()) => {
            time_synced.store(true, Ordering::Relaxed);
            info!("SNTP synchronized");
        }
        Err(err) => warn!("{err}, schedule paused until the clock arrives"),
    }

    spawn_control_loop(
        Arc::clone(&controller),
        InputArbiter::new(button, schedule),
        runtime.clone(),
        Arc::clone(&time_synced),
    )?;
    spawn_http_server(Arc::clone(&controller), ip, &runtime)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    loop {
        if !time_synced.load(Ordering::Relaxed) && sntp.get_sync_status() == SyncStatus::Completed
        {
            info!("SNTP synchronized late, schedule enabled");
            time_synced.store(true, Ordering::Relaxed);
        }
        thread::sleep(Duration::from_secs(1));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn output_pin(gpio: i32) -> anyhow::Result<Relay> {
    let mut pin = unsafe { PinDriver::output(AnyOutputPin::new(gpio)) }
        .with_context(|| format!("GPIO{gpio} unavailable as output"))?;
    pin.set_low()?;
    Ok(pin)
}

fn input_pin(gpio: i32) -> anyhow::Result<Button> {
    let mut pin = unsafe { PinDriver::input(AnyInputPin::new(gpio)) }
        .with_context(|| format!("GPIO{gpio} unavailable as input"))?;
    pin.set_pull(Pull::Down)?;
    Ok(pin)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.is_empty() {
        return Err(BlindError::NetworkUnavailable("wifi credentials missing".into()).into());
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => {
            drop(wifi);
            Ok(esp_wifi)
        }
        Some(err) => Err(BlindError::NetworkUnavailable(format!(
            "all {WIFI_CONNECT_ATTEMPTS} connect attempts failed, last error: {err}"
        ))
        .into()),
    }
}

fn wait_for_sntp(sntp: &EspSntp<'_>, timeout: Duration) -> Result<(), BlindError> {
    let started = Instant::now();
    while sntp.get_sync_status() != SyncStatus::Completed {
        if started.elapsed() >= timeout {
            return Err(BlindError::ClockSyncFailed(format!(
                "no time after {}s",
                timeout.as_secs()
            )));
        }
        thread::sleep(Duration::from_millis(SNTP_POLL_MS));
    }
    Ok(())
}

fn spawn_control_loop(
    controller: Arc<DeviceController>,
    mut arbiter: InputArbiter<Button>,
    runtime: RuntimeConfig,
    time_synced: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let poll = Duration::from_millis(runtime.blind.poll_interval_ms);
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(CONTROL_STACK_SIZE)
        .spawn(move || {
            info!("hold the button to start setup");
            loop {
                let now = time_synced
                    .load(Ordering::Relaxed)
                    .then(|| now_in_timezone(&runtime.timezone))
                    .flatten()
                    .map(|now| WallMinute::from_time(&now));
                if let Err(err) = arbiter.tick(controller.as_ref(), now) {
                    warn!("control loop tick failed: {err}");
                }
                thread::sleep(poll);
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn spawn_http_server(
    controller: Arc<DeviceController>,
    ip: Ipv4Addr,
    runtime: &RuntimeConfig,
) -> anyhow::Result<()> {
    let port = runtime.blind.http_port;
    let max_request_bytes = runtime.blind.max_request_bytes;
    let read_timeout = Duration::from_millis(runtime.blind.request_timeout_ms);
    let listener = TcpListener::bind((ip, port))
        .with_context(|| format!("failed to bind blinds server at {ip}:{port}"))?;
    info!("blinds listening on http://{ip}:{port}");

    thread::Builder::new()
        .name("http-accept".into())
        .stack_size(HTTP_STACK_SIZE)
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if let Err(err) = stream.set_read_timeout(Some(read_timeout)) {
                            warn!("http read timeout unavailable: {err}");
                        }
                        spawn_connection(Arc::clone(&controller), stream, max_request_bytes)
                    }
                    Err(err) => warn!("http accept failed: {err}"),
                }
            }
        })
        .context("failed to spawn http accept thread")?;
    Ok(())
}

fn spawn_connection(controller: Arc<DeviceController>, mut stream: TcpStream, max_bytes: usize) {
    let spawned = thread::Builder::new()
        .name("http-conn".into())
        .stack_size(HTTP_STACK_SIZE)
        .spawn(move || {
            match http::serve_connection(&mut stream, controller.as_ref(), max_bytes) {
                Ok(()) => {}
                Err(BlindError::NotCalibrated) => {
                    warn!("http request rejected: blinds not set up yet")
                }
                Err(err) => debug!("http request dropped: {err}"),
            }
            let _ = stream.flush();
        });
    if let Err(err) = spawned {
        warn!("failed to spawn http connection thread: {err}");
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}
