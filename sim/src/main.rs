//! Synthetic dive scenario for the pose filter.
//!
//! Simulates an AUV cruising north at constant depth through a steady
//! horizontal current and feeds the generated gyro, accelerometer, DVL,
//! pressure and ADCP samples into the filter. The estimated trajectory can
//! be written to CSV for plotting; the filter summary is logged at the end.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use nalgebra::{Matrix2, Matrix3, SMatrix, Vector1, Vector2, Vector3};

use uwv_pose_ukf::dynamics::{LinearThreeDof, RigidBodyModel, UWVParameters};
use uwv_pose_ukf::geo::somigliana_gravity;
use uwv_pose_ukf::manifold::{Euclidean, Manifold, MatrixBlock, Rotation};
use uwv_pose_ukf::measurements::{
    Acceleration, Pressure, RotationRate, Velocity, WaterVelocityMeasurement,
};
use uwv_pose_ukf::process::{base_process_noise, ProcessNoiseStd};
use uwv_pose_ukf::state::PoseState;
use uwv_pose_ukf::{LocationConfiguration, PoseUKF, PoseUKFParameter};

#[derive(Parser, Debug)]
#[command(name = "pose-sim", about = "Run the pose filter on a synthetic dive")]
struct Args {
    /// Duration of the scenario in seconds
    #[arg(long, default_value_t = 120.0)]
    duration: f64,

    /// Sample interval in seconds
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// True northward speed of the vehicle in m/s
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// True northward water current in m/s
    #[arg(long, default_value_t = 0.2)]
    current: f64,

    /// Depth of the run in meters (positive down)
    #[arg(long, default_value_t = 10.0)]
    depth: f64,

    /// Output CSV path for the estimated trajectory
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Initialize the logger with the specified configuration
fn init_logger(log_level: &str) -> Result<(), Box<dyn Error>> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });
    builder.try_init()?;
    Ok(())
}

fn initial_state(latitude: f64, depth: f64) -> PoseState {
    PoseState {
        position: Euclidean(Vector3::new(0.0, 0.0, -depth)),
        orientation: Rotation::identity(),
        velocity: Euclidean(Vector3::zeros()),
        acceleration: Euclidean(Vector3::zeros()),
        bias_gyro: Euclidean(Vector3::zeros()),
        bias_acc: Euclidean(Vector3::zeros()),
        gravity: Euclidean(Vector1::new(somigliana_gravity(latitude))),
        inertia: MatrixBlock::new(Matrix3::identity() * 500.0),
        lin_damping: MatrixBlock::new(Matrix3::identity() * 50.0),
        quad_damping: MatrixBlock::new(Matrix3::identity() * 20.0),
        water_velocity: Euclidean(Vector2::zeros()),
        water_velocity_below: Euclidean(Vector2::zeros()),
        bias_adcp: Euclidean(Vector2::zeros()),
        water_density: Euclidean(Vector1::new(1025.0)),
    }
}

fn filter_parameter() -> PoseUKFParameter {
    PoseUKFParameter {
        imu_in_body: Vector3::zeros(),
        gyro_bias_offset: Vector3::zeros(),
        acc_bias_offset: Vector3::zeros(),
        gyro_bias_tau: 3600.0,
        acc_bias_tau: 3600.0,
        inertia_tau: 3600.0,
        lin_damping_tau: 3600.0,
        quad_damping_tau: 3600.0,
        water_velocity_tau: 600.0,
        adcp_bias_tau: 3600.0,
        water_density_tau: 3600.0,
        water_velocity_limits: 0.5,
        water_velocity_scale: 1e-4,
        atmospheric_pressure: 101325.0,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    let location = LocationConfiguration {
        latitude: 0.9,
        longitude: 0.15,
    };
    let state = initial_state(location.latitude, args.depth);
    let gravity = state.gravity.0[0];
    let water_density = state.water_density.0[0];
    let parameter = filter_parameter();

    let noise_std = ProcessNoiseStd {
        position: 0.0,
        orientation: 1e-4,
        velocity: 1e-3,
        acceleration: 1e-2,
        gravity: 1e-6,
        gyro_bias: 1e-5,
        acc_bias: 1e-4,
        inertia: 1.0,
        lin_damping: 1.0,
        quad_damping: 1.0,
        adcp_bias: 1e-3,
        water_density: 0.1,
    };
    let process_noise = base_process_noise(&parameter, &noise_std);
    let n = PoseState::DOF;
    let mut state_cov = nalgebra::DMatrix::identity(n, n);
    state_cov *= 0.1;

    let mut filter = PoseUKF::new(
        state,
        state_cov,
        process_noise,
        &location,
        UWVParameters::default(),
        parameter,
        Box::new(RigidBodyModel),
        Box::new(LinearThreeDof::new(SMatrix::<f64, 3, 6>::zeros())),
    );

    let mut writer = match &args.output {
        Some(path) => {
            let file = File::create(path)?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "time,x,y,z,vx,vy,vz,current_x,current_y")?;
            Some(writer)
        }
        None => None,
    };

    // ground truth: constant northward cruise at constant depth
    let truth_velocity = Vector3::new(args.speed, 0.0, 0.0);
    let current = Vector2::new(args.current, 0.0);

    let gyro = RotationRate::new(Vector3::zeros(), Matrix3::identity() * 1e-6);
    let accelerometer = Acceleration::new(
        Vector3::new(0.0, 0.0, gravity),
        Matrix3::identity() * 1e-3,
    );
    let dvl = Velocity::new(truth_velocity, Matrix3::identity() * 1e-3);
    let pressure = Pressure::new(
        Vector1::new(101325.0 + args.depth * gravity * water_density),
        SMatrix::<f64, 1, 1>::identity() * 100.0,
    );
    let adcp = WaterVelocityMeasurement::new(
        Vector2::new(
            truth_velocity[0] - current[0],
            truth_velocity[1] - current[1],
        ),
        Matrix2::identity() * 1e-2,
    );

    info!("starting dive scenario: {}", filter.mean());
    let steps = (args.duration / args.dt).ceil() as usize;
    for step in 1..=steps {
        let time = step as f64 * args.dt;

        if let Err(error) = filter.integrate_rotation_rate(&gyro) {
            warn!("gyro sample skipped at {:.2} s: {}", time, error);
        }
        if let Err(error) = filter.predict(args.dt) {
            warn!("prediction skipped at {:.2} s: {}", time, error);
            continue;
        }

        if let Err(error) = filter.integrate_velocity(&dvl) {
            warn!("DVL sample skipped at {:.2} s: {}", time, error);
        }
        if step % 5 == 0 {
            if let Err(error) = filter.integrate_acceleration(&accelerometer) {
                warn!("accelerometer sample skipped at {:.2} s: {}", time, error);
            }
            if let Err(error) = filter.integrate_pressure(&pressure, &Vector3::zeros()) {
                warn!("pressure sample skipped at {:.2} s: {}", time, error);
            }
        }
        if step % 10 == 0 {
            if let Err(error) = filter.integrate_water_velocity(&adcp, 0.5) {
                warn!("ADCP sample skipped at {:.2} s: {}", time, error);
            }
        }

        if let Some(writer) = writer.as_mut() {
            let mean = filter.mean();
            writeln!(
                writer,
                "{:.3},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4}",
                time,
                mean.position.0[0],
                mean.position.0[1],
                mean.position.0[2],
                mean.velocity.0[0],
                mean.velocity.0[1],
                mean.velocity.0[2],
                mean.water_velocity.0[0],
                mean.water_velocity.0[1],
            )?;
        }
    }

    info!("final estimate: {}", filter.mean());
    info!(
        "estimated current: [{:.3}, {:.3}] m/s (truth [{:.3}, {:.3}])",
        filter.mean().water_velocity.0[0],
        filter.mean().water_velocity.0[1],
        current[0],
        current[1]
    );
    info!(
        "filter summary: {}",
        serde_json::to_string_pretty(filter.summary())?
    );
    Ok(())
}
