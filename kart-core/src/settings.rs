use config::{Config, ConfigError, Environment, File};
use lazy_static::lazy_static;
use serde::Deserialize;

// Which wheels receive drive torque; front wheels always steer
#[derive(Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Drivetrain {
    Rear,
    Front,
    All,
}

impl Drivetrain {
    pub fn drives_front(&self) -> bool {
        matches!(self, Drivetrain::Front | Drivetrain::All)
    }

    pub fn drives_rear(&self) -> bool {
        matches!(self, Drivetrain::Rear | Drivetrain::All)
    }
}

#[derive(Deserialize)]
pub struct Settings {
    pub port: String,
    pub server_tick_rate: u32,
    pub max_players: usize,
    pub outbox_capacity: usize,

    pub gravity: f32,
    pub solver_iterations: usize,
    pub internal_pgs_iterations: usize,
    pub ground_width: f32,
    pub ground_height: f32,
    pub ground_length: f32,
    pub ground_friction: f32,

    pub chassis_width: f32,
    pub chassis_height: f32,
    pub chassis_length: f32,
    pub chassis_mass: f32,
    pub chassis_friction: f32,
    pub chassis_restitution: f32,

    pub wheel_radius: f32,
    pub wheel_width: f32,
    pub wheel_border_radius: f32,
    pub wheel_mass: f32,
    // well above 1.0 so the tyres grip instead of sliding under torque
    pub wheel_friction: f32,
    pub wheel_restitution: f32,

    // heavy enough that the solver can hand torque through it to the wheel
    pub axle_half_size: f32,
    pub axle_mass: f32,

    pub max_steer_angle_deg: f32,
    // force based gains: N·m per rad and N·m·s per rad
    pub steer_stiffness: f32,
    pub steer_damping: f32,
    pub steer_max_force: f32,

    // wheel angular velocity (rad/s) at full throttle
    pub max_drive_velocity: f32,
    pub drive_damping: f32,
    pub drive_max_force: f32,
    pub drivetrain: Drivetrain,

    pub spawn_x: f32,
    pub spawn_y: f32,
    pub spawn_z: f32,
    pub spawn_spacing: f32,
}

impl Settings {
    fn new() -> Result<Settings, ConfigError> {
        let config = Config::builder()
            .set_default("port", "8080")?
            .set_default("server_tick_rate", 60)?
            .set_default("max_players", 16)?
            .set_default("outbox_capacity", 256)?
            .set_default("gravity", -9.81)?
            .set_default("solver_iterations", 8)?
            .set_default("internal_pgs_iterations", 2)?
            .set_default("ground_width", 100.0)?
            .set_default("ground_height", 0.2)?
            .set_default("ground_length", 100.0)?
            .set_default("ground_friction", 1.0)?
            .set_default("chassis_width", 2.5)?
            .set_default("chassis_height", 1.5)?
            .set_default("chassis_length", 5.0)?
            .set_default("chassis_mass", 150.0)?
            .set_default("chassis_friction", 0.5)?
            .set_default("chassis_restitution", 0.1)?
            .set_default("wheel_radius", 0.5)?
            .set_default("wheel_width", 0.4)?
            .set_default("wheel_border_radius", 0.05)?
            .set_default("wheel_mass", 10.0)?
            .set_default("wheel_friction", 2.0)?
            .set_default("wheel_restitution", 0.0)?
            .set_default("axle_half_size", 0.2)?
            .set_default("axle_mass", 10.0)?
            .set_default("max_steer_angle_deg", 45.0)?
            .set_default("steer_stiffness", 5000.0)?
            .set_default("steer_damping", 500.0)?
            .set_default("steer_max_force", 10000.0)?
            .set_default("max_drive_velocity", 20.0)?
            .set_default("drive_damping", 1000.0)?
            .set_default("drive_max_force", 50000.0)?
            .set_default("drivetrain", "rear")?
            .set_default("spawn_x", 0.0)?
            .set_default("spawn_y", 1.3)?
            .set_default("spawn_z", 0.0)?
            .set_default("spawn_spacing", 6.0)?
            .add_source(File::with_name("config.yaml").required(false))
            .add_source(Environment::with_prefix("KART"))
            .build()?;

        config.try_deserialize()
    }

    pub fn max_steer_angle(&self) -> f32 {
        self.max_steer_angle_deg.to_radians()
    }
}

lazy_static! {
    pub static ref GLOBAL_CONFIG: Settings = Settings::new().expect("failed to read config file");
}
