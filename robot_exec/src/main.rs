//! Main robot-side executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging, parameters and telemetry
//!     - Choose the robot variant from the device identity file and build its container
//!     - Start the odometry thread
//!     - Main loop, at the fixed cycle period:
//!         - Driver station packet acquisition, from the network or a script
//!         - Robot tick (safety, mode, tunables, scheduler, container periodic)
//!         - Telemetry flush
//!
//! Running with `--script <path>` replays timed driver station packets from a file instead of
//! listening to the network, and stops at the end of the script.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{error, info, warn};
use std::{cell::RefCell, path::PathBuf, rc::Rc};
use structopt::StructOpt;

// Internal
use comms_if::{ds::DsPacket, net::NetParams};
use robot_lib::{
    container::{ContainerContext, ContainerParams, RobotChooser},
    ds_client::{DsClient, DsClientError},
    hal::Hardware,
    input::DriverStation,
    localizer::VisionHub,
    params::RobotExecParams,
    prefs::Preferences,
    robot::Robot,
    telemetry::{self, CsvOutput, NetOutput, Telemetry},
};
use util::{
    host,
    logger::logger_init,
    script_interpreter::{PendingPackets, ScriptInterpreter},
    session::Session,
    time::{Clock, PeriodicDriver},
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "robot_exec", about = "Robot control executable")]
struct Opts {
    /// Replay driver station packets from this script instead of the network
    #[structopt(long, parse(from_os_str))]
    script: Option<PathBuf>,

    /// Simulate the hardware
    #[structopt(long)]
    sim: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Sources of driver station packets.
enum PacketSource {
    Remote(DsClient),
    Script(ScriptInterpreter),
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let exec_params: RobotExecParams =
        util::params::load("robot_exec.toml").wrap_err("Could not load exec params")?;

    let session = Session::new("robot_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(&exec_params.logger, &session).wrap_err("Failed to initialise logging")?;

    info!("Robot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;
    let container_params = ContainerParams::load().wrap_err("Could not load robot params")?;

    info!("Parameters loaded");

    // ---- TELEMETRY ----

    let clock = Clock::process();
    let zmq_ctx = comms_if::net::zmq::Context::new();

    let mut tm = Telemetry::new(clock.clone());
    if exec_params.tm_archive {
        tm.add_output(Box::new(
            CsvOutput::new(&session, "telemetry.csv")
                .wrap_err("Failed to create the telemetry archive")?,
        ));
    }
    if exec_params.tm_network {
        tm.add_output(Box::new(
            NetOutput::new(&zmq_ctx, &net_params)
                .wrap_err("Failed to create the telemetry publisher")?,
        ));
    }
    telemetry::init(tm).wrap_err("Failed to initialise telemetry")?;

    // ---- PACKET SOURCE ----

    let mut source = match opts.script {
        Some(ref path) => {
            info!("Loading script from {:?}", path);
            let si = ScriptInterpreter::new(path).wrap_err("Failed to load script")?;
            info!(
                "Loaded script lasts {:.02} s and contains {} packets\n",
                si.get_duration(),
                si.get_num_packets()
            );
            PacketSource::Script(si)
        }
        None => {
            info!("No script provided, listening for the driver station\n");
            PacketSource::Remote(
                DsClient::new(&zmq_ctx, &net_params)
                    .wrap_err("Failed to initialise the DsClient")?,
            )
        }
    };

    // ---- ROBOT ----

    let hw = if opts.sim {
        Hardware::sim(&clock)
    } else {
        Hardware::absent(&clock)
    };

    let vision_hub = if opts.sim {
        VisionHub::offline()
    } else {
        VisionHub::connect(&zmq_ctx, &net_params).wrap_err("Failed to connect the vision hub")?
    };

    let prefs_path = host::get_robot_sw_root()
        .wrap_err("Could not find the software root")?
        .join(&exec_params.prefs_file);
    let prefs = Preferences::load(&prefs_path).wrap_err("Could not load the preferences")?;

    let variant = RobotChooser::shipped().choose(&exec_params.device_id_path);

    let ctx = ContainerContext {
        hw,
        clock: clock.clone(),
        ds: DriverStation::new(),
        prefs: Rc::new(RefCell::new(prefs)),
        vision_hub: Rc::new(RefCell::new(vision_hub)),
        exec: exec_params.clone(),
    };

    let mut robot = Robot::new(ctx, variant, container_params);
    robot.start_odometry();

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    let start_s = clock.now_s();
    let mut driver = PeriodicDriver::new(&clock, exec_params.cycle_period_s);

    loop {
        let packets = match source {
            PacketSource::Remote(ref client) => match client.receive_packet() {
                Ok(Some(p)) => vec![p],
                Ok(None) | Err(DsClientError::NotConnected) => vec![],
                Err(DsClientError::PacketParseError(e)) => {
                    warn!("Could not parse driver station packet: {}", e);
                    vec![]
                }
                Err(e) => {
                    robot.shutdown();
                    return Err(e).wrap_err("Error receiving from the driver station");
                }
            },
            PacketSource::Script(ref mut si) => match si.get_pending(clock.now_s() - start_s) {
                PendingPackets::None => Vec::<DsPacket>::new(),
                PendingPackets::Some(p) => p,
                PendingPackets::EndOfScript => {
                    info!("End of script reached, stopping");
                    break;
                }
            },
        };

        if let Err(e) = robot.tick(packets) {
            error!("Fatal robot error: {}", e);
            robot.shutdown();
            telemetry::flush();
            return Err(eyre!("Robot stopped: {}", e));
        }

        match driver.wait() {
            Some(overrun_s) => robot.record_overrun(overrun_s),
            None => robot.clear_overruns(),
        }
    }

    // ---- SHUTDOWN ----

    robot.shutdown();
    telemetry::flush();
    session.exit();

    info!("End of execution");

    Ok(())
}
