use clap::{Parser, Subcommand};
use imu_cal::cal::{self, CalibrationReport, CenterStrategy, ShapeStrategy, StrategyKind};
use imu_cal::config::AppConfig;
use imu_cal::data_provider::{DataSelector, DeviceOffsets, ImuDevice};
use imu_cal::imu::Imu;
use imu_cal::logger;
use imu_cal::serial_data_provider::{list_ports, SerialTransport, BAUDRATES};
use imu_cal::store::SampleStore;
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Magnetometer and accelerometer calibration over a serial link.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// TOML configuration file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate, overrides the configuration.
    #[arg(long)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports and supported baud rates.
    Ports,
    /// List center and shape strategies.
    Strategies,
    /// Gather samples, fit and print a JSON report.
    Calibrate {
        /// Seconds to gather for.
        #[arg(long, default_value_t = 30)]
        secs: u64,
        #[arg(long)]
        data: Option<DataSelector>,
        #[arg(long)]
        center: Option<CenterStrategy>,
        #[arg(long)]
        shape: Option<ShapeStrategy>,
        /// Write the resulting offsets to the device.
        #[arg(long)]
        apply: bool,
    },
    /// Log live mag/accel readings.
    Watch {
        #[arg(long, default_value_t = 10)]
        secs: u64,
    },
    /// Log orientation matrices computed on the device.
    Orient {
        #[arg(long, default_value_t = 10)]
        secs: u64,
    },
}

fn main() {
    logger::init_logger();

    if let Err(err) = try_main() {
        error!("{err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(port) = cli.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    config.validate()?;

    match cli.command {
        Command::Ports => {
            for port in list_ports()? {
                println!("{port}");
            }
            println!("baud rates: {BAUDRATES:?}");
            Ok(())
        }
        Command::Strategies => {
            println!("center: {}", cal::list_strategies(StrategyKind::Center).join(", "));
            println!("shape:  {}", cal::list_strategies(StrategyKind::Shape).join(", "));
            Ok(())
        }
        Command::Calibrate {
            secs,
            data,
            center,
            shape,
            apply,
        } => {
            let data = data.unwrap_or(config.fit.data);
            let center = center.unwrap_or(config.fit.center);
            let shape = shape.unwrap_or(config.fit.shape);
            with_device(&config, |device| {
                calibrate(&config, device, Duration::from_secs(secs), data, center, shape, apply)
            })
        }
        Command::Watch { secs } => with_device(&config, |device| {
            watch(&config, device, Duration::from_secs(secs))
        }),
        Command::Orient { secs } => with_device(&config, |device| {
            orient(device.as_ref(), Duration::from_secs(secs))
        }),
    }
}

/// Opens the configured port on a fresh runtime, which lives as long as `f` runs.
fn with_device<F>(config: &AppConfig, f: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(Arc<Imu<SerialTransport>>) -> Result<(), Box<dyn Error>>,
{
    let port = config
        .serial
        .port
        .as_deref()
        .ok_or("no serial port, use --port or set [serial] port")?;

    let rt = tokio::runtime::Runtime::new()?;
    let transport = SerialTransport::open(rt.handle(), port, config.serial.baud_rate)?;
    f(Arc::new(Imu::new(transport)))
}

fn calibrate(
    config: &AppConfig,
    device: Arc<Imu<SerialTransport>>,
    duration: Duration,
    data: DataSelector,
    center: CenterStrategy,
    shape: ShapeStrategy,
    apply: bool,
) -> Result<(), Box<dyn Error>> {
    let store = SampleStore::new(device.clone(), &config.store);
    store.start()?;
    store.start_gathering();
    info!("gathering for {}s, rotate the sensor through all orientations", duration.as_secs());

    let deadline = Instant::now() + duration;
    let mut drained = 0;
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(500));
        drained += store.drain_points().0.len();
        let clouds: Vec<_> = DataSelector::ALL
            .iter()
            .map(|s| format!("{s} {}", store.cloud_len(*s)))
            .collect();
        info!("{drained} points, {}", clouds.join(", "));
    }

    store.stop();
    store.join();

    let fit = cal::compute_fit(&store, data, center, shape)?;
    let residuals = cal::evaluate_fit(&store, data, &fit.transform)?;
    let report = CalibrationReport::new(fit, residuals, store.cloud_len(data));
    println!("{}", serde_json::to_string_pretty(&report)?);

    if apply {
        let offsets = DeviceOffsets::from_transform(data, &fit.transform)?;
        device.write_offsets(&offsets)?;
    }
    Ok(())
}

fn watch(
    config: &AppConfig,
    device: Arc<Imu<SerialTransport>>,
    duration: Duration,
) -> Result<(), Box<dyn Error>> {
    let store = SampleStore::new(device, &config.store);
    store.start()?;
    store.start_displaying_orient();

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(250));
        let frame = store.orientation_frame();
        info!(
            "mag {:?} accel {:?} east {:?}",
            frame.mag.as_slice(),
            frame.accel.as_slice(),
            frame.east.as_slice()
        );
    }

    store.stop();
    store.join();
    Ok(())
}

fn orient(device: &dyn ImuDevice, duration: Duration) -> Result<(), Box<dyn Error>> {
    let mut stream = device.stream_orientation()?;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if let Some(orientation) = stream.next_orientation(Duration::from_millis(100))? {
            info!("orientation {orientation}");
        }
    }
    Ok(())
}
