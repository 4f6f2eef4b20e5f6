//! # Robot containers
//!
//! A container is the composition root for one robot: it builds the subsystems, registers them
//! with the scheduler, binds the operator controls and supplies the autonomous command. The
//! [`RobotChooser`] picks which container to build from the device identity file.
//!
//! Both robots share the drive wiring made by [`configure_drive`]:
//!
//! - the default drive command is field centric joystick driving from the driver's sticks,
//! - `Back` on the driver's pad seeds field centric driving,
//! - the dashboard's "Reset Swerve Modules" button zeros and persists the module offsets,
//! - the dashboard's "SysId Drive" button runs every drive characterisation test.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod chooser;
mod ralph;
mod zippy;

pub use chooser::{ChooserError, RobotChooser, Variant};
pub use ralph::RalphContainer;
pub use zippy::ZippyContainer;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ds::{Button, DRIVER_PORT};
use log::{info, warn};
use std::{cell::RefCell, rc::Rc};
use util::{params, time::Clock};

use crate::{
    climber::ClimberParams,
    cmd::{CommandExt, Scheduler, Subsystem},
    drive::{cmds, DriveParams, PidGains, SwerveDrive, Trajectory},
    hal::Hardware,
    input::DriverStation,
    localizer::{FieldLayout, VisionHub, VisionParams},
    manipulator::ManipulatorParams,
    mode::ModeHooks,
    params::RobotExecParams,
    prefs::Preferences,
    superstructure::SuperstructureParams,
    sysid::SysIdParams,
    tuning::{Tunable, TuningManager},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Dashboard button which resets the swerve module offsets.
pub const RESET_MODULES_BUTTON: &str = "Reset Swerve Modules";

/// Dashboard button which runs the drive characterisation.
pub const SYSID_DRIVE_BUTTON: &str = "SysId Drive";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A robot's composition root.
pub trait RobotContainer: ModeHooks {
    fn name(&self) -> &str;

    fn drive(&self) -> &Rc<RefCell<SwerveDrive>>;

    /// Called every tick after the scheduler has run.
    fn robot_periodic(&mut self) {}
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared services handed to a container when it is built.
pub struct ContainerContext {
    pub hw: Hardware,
    pub clock: Clock,
    pub ds: DriverStation,
    pub prefs: Rc<RefCell<Preferences>>,
    pub vision_hub: Rc<RefCell<VisionHub>>,
    pub exec: RobotExecParams,
}

/// Every parameter file a container may need.
#[derive(Debug, Clone)]
pub struct ContainerParams {
    pub drive: DriveParams,
    pub superstructure: SuperstructureParams,
    pub manipulator: ManipulatorParams,
    pub climber: ClimberParams,
    pub vision: VisionParams,
    pub sysid: SysIdParams,
    pub field_layout: FieldLayout,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ContainerParams {
    /// Load the parameter files from the software root.
    pub fn load() -> Result<Self, params::LoadError> {
        let vision: VisionParams = params::load("vision.toml")?;
        let field_layout = FieldLayout::load(&vision.field_layout)?;

        Ok(Self {
            drive: params::load("drive.toml")?,
            superstructure: params::load("superstructure.toml")?,
            manipulator: params::load("manipulator.toml")?,
            climber: params::load("climber.toml")?,
            sysid: params::load("sysid.toml")?,
            vision,
            field_layout,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the container for `variant`.
pub fn build(
    variant: Variant,
    ctx: &ContainerContext,
    params: ContainerParams,
    scheduler: &mut Scheduler,
) -> Box<dyn RobotContainer> {
    match variant {
        Variant::Ralph => Box::new(RalphContainer::new(ctx, params, scheduler)),
        Variant::Zippy => Box::new(ZippyContainer::new(ctx, params, scheduler)),
    }
}

/// Create the drive with its saved module offsets applied.
pub fn create_drive(ctx: &ContainerContext, params: DriveParams) -> Rc<RefCell<SwerveDrive>> {
    let mut drive = SwerveDrive::new(&ctx.hw, params, ctx.ds.clone(), ctx.exec.cycle_period_s);
    cmds::load_module_offsets(&mut drive, &ctx.prefs.borrow());
    Rc::new(RefCell::new(drive))
}

/// Register the drive and make the bindings common to every robot.
pub fn configure_drive(
    drive: &Rc<RefCell<SwerveDrive>>,
    ctx: &ContainerContext,
    sysid: &SysIdParams,
    scheduler: &mut Scheduler,
) {
    scheduler.register_subsystem(drive);

    let driver = ctx.ds.gamepad(DRIVER_PORT);
    let drive_id = drive.borrow().id();

    if let Err(e) = scheduler.set_default_command(
        drive_id,
        cmds::joystick_drive(drive, &driver).into_handle(),
    ) {
        warn!("Could not set the default drive command: {}", e);
    }

    scheduler.on_true(
        driver.button(Button::Back),
        cmds::seed_field_centric_cmd(drive).into_handle(),
    );
    scheduler.on_true(
        ctx.ds.dashboard_trigger(RESET_MODULES_BUTTON),
        cmds::reset_modules_cmd(drive, &ctx.prefs).into_handle(),
    );
    scheduler.on_true(
        ctx.ds.dashboard_trigger(SYSID_DRIVE_BUTTON),
        cmds::sysid_all(drive, sysid, &ctx.clock).into_handle(),
    );
}

/// Make the trajectory follower's gains tunable from the driver station.
pub fn register_drive_tunables(drive: &Rc<RefCell<SwerveDrive>>, tuning: &mut TuningManager) {
    let (translation, rotation) = {
        let d = drive.borrow();
        (d.params().translation_pid, d.params().rotation_pid)
    };

    let t = [
        tuning.register("Drive/TranslationKp", translation.kp),
        tuning.register("Drive/TranslationKi", translation.ki),
        tuning.register("Drive/TranslationKd", translation.kd),
    ];
    let r = [
        tuning.register("Drive/RotationKp", rotation.kp),
        tuning.register("Drive/RotationKi", rotation.ki),
        tuning.register("Drive/RotationKd", rotation.kd),
    ];

    bind_gains(drive, &t, false);
    bind_gains(drive, &r, true);
}

/// Load the autonomous trajectory named in the exec parameters, if any.
pub fn load_auto_trajectory(exec: &RobotExecParams) -> Option<Trajectory> {
    let name = exec.auto_trajectory.as_ref()?;
    match Trajectory::load(name) {
        Ok(t) => {
            info!(
                "Autonomous trajectory {} loaded ({:.2} s)",
                t.name(),
                t.total_time_s()
            );
            Some(t)
        }
        Err(e) => {
            warn!("Could not load the autonomous trajectory {}: {}", name, e);
            None
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Push new gains to the drive whenever one of `gains` (kp, ki, kd) changes.
fn bind_gains(drive: &Rc<RefCell<SwerveDrive>>, gains: &[Tunable<f64>; 3], rotation: bool) {
    for (i, tunable) in gains.iter().enumerate() {
        let (d, all) = (drive.clone(), gains.clone());

        // The changed tunable is mid-update, so its own value comes from the callback
        tunable.on_change(move |value| {
            let mut k = [0.0; 3];
            for (j, t) in all.iter().enumerate() {
                k[j] = if j == i { value } else { t.get() };
            }
            let g = PidGains {
                kp: k[0],
                ki: k[1],
                kd: k[2],
            };

            let mut d = d.borrow_mut();
            if rotation {
                d.set_follower_gains(None, Some(g));
            } else {
                d.set_follower_gains(Some(g), None);
            }
            info!("Follower {} gains now {:?}", if rotation { "rotation" } else { "translation" }, g);
        });
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::superstructure::elevator;

    pub(crate) fn test_exec_params() -> RobotExecParams {
        toml::from_str(include_str!("../../../params/robot_exec.toml")).unwrap()
    }

    pub(crate) fn test_params() -> ContainerParams {
        ContainerParams {
            drive: toml::from_str(include_str!("../../../params/drive.toml")).unwrap(),
            superstructure: elevator::test::test_params(),
            manipulator: toml::from_str(include_str!("../../../params/manipulator.toml")).unwrap(),
            climber: toml::from_str(include_str!("../../../params/climber.toml")).unwrap(),
            vision: toml::from_str(include_str!("../../../params/vision.toml")).unwrap(),
            sysid: toml::from_str(include_str!("../../../params/sysid.toml")).unwrap(),
            field_layout: FieldLayout::from_json(include_str!("../../../params/field_layout.json"))
                .unwrap(),
        }
    }

    /// A simulated context with preferences in a temporary file.
    pub(crate) fn test_context(name: &str) -> (ContainerContext, std::path::PathBuf) {
        let clock = Clock::manual();
        let prefs_path = std::env::temp_dir().join(format!(
            "container_{}_{}.json",
            name,
            std::process::id()
        ));
        std::fs::remove_file(&prefs_path).ok();

        let ctx = ContainerContext {
            hw: Hardware::sim(&clock),
            clock,
            ds: DriverStation::new(),
            prefs: Rc::new(RefCell::new(Preferences::load(&prefs_path).unwrap())),
            vision_hub: Rc::new(RefCell::new(VisionHub::offline())),
            exec: test_exec_params(),
        };
        (ctx, prefs_path)
    }

    #[test]
    fn test_follower_gains_tunable() {
        use comms_if::{ds::TunableUpdate, tm::TmValue};

        let (ctx, prefs_path) = test_context("tunables");
        let drive = create_drive(&ctx, test_params().drive);
        let (t0, r0) = drive.borrow().follower_gains();

        let mut tuning = TuningManager::new();
        register_drive_tunables(&drive, &mut tuning);
        assert_eq!(tuning.num_tunables(), 6);

        tuning.update_all(&[TunableUpdate {
            key: String::from("Drive/TranslationKd"),
            value: TmValue::Double(0.25),
        }]);

        let (t, r) = drive.borrow().follower_gains();
        assert_eq!(t.kp, t0.kp);
        assert_eq!(t.kd, 0.25);
        assert_eq!(r, r0);
        std::fs::remove_file(&prefs_path).ok();
    }
}
