pub use gipps::Gipps;
pub use idm::Idm;
pub use kca::Kca;
pub use krauss::Krauss;
pub use nsm::Nsm;
pub use ovm::{OptimalVelocity, OptimalVelocityShape};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

mod gipps;
mod idm;
mod kca;
mod krauss;
mod nsm;
mod ovm;

/// The lowest desired speed a model will be evaluated with, in m/s.
const MIN_DESIRED_SPEED: f64 = 0.1; // m/s

/// The comfortable deceleration assumed for models without one, in m/s<sup>2</sup>.
const DEFAULT_COMF_DEC: f64 = 2.0; // m/s^2

/// The situation a vehicle's acceleration is evaluated in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelInput {
    /// The net gap to the leader in m, or infinity on a free road.
    pub gap: f64,
    /// The vehicle's own speed in m/s.
    pub speed: f64,
    /// The approach rate (own speed minus the leader's speed) in m/s.
    pub approach: f64,
    /// The externally imposed speed limit in m/s.
    pub speed_limit: f64,
    /// The simulation time step in s.
    pub dt: f64,
}

impl ModelInput {
    /// Creates an input for a vehicle with no leader.
    pub fn free(speed: f64, speed_limit: f64, dt: f64) -> Self {
        Self {
            gap: f64::INFINITY,
            speed,
            approach: 0.0,
            speed_limit,
            dt,
        }
    }

    /// Creates an input for a vehicle following a leader.
    pub fn following(gap: f64, speed: f64, lead_speed: f64, speed_limit: f64, dt: f64) -> Self {
        Self {
            gap,
            speed,
            approach: speed - lead_speed,
            speed_limit,
            dt,
        }
    }

    /// The leader's speed in m/s.
    pub fn lead_speed(&self) -> f64 {
        f64::max(self.speed - self.approach, 0.0)
    }
}

/// The parameters of one of the car-following model variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelParams {
    Idm(Idm),
    Gipps(Gipps),
    Krauss(Krauss),
    Ovm(OptimalVelocity),
    Nsm(Nsm),
    Kca(Kca),
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::Idm(Idm::default())
    }
}

impl ModelParams {
    /// The desired speed in m/s.
    pub fn desired_speed(&self) -> f64 {
        match self {
            Self::Idm(p) => p.v0,
            Self::Gipps(p) => p.v0,
            Self::Krauss(p) => p.v0,
            Self::Ovm(p) => p.v0,
            Self::Nsm(p) => p.v0,
            Self::Kca(p) => p.v0,
        }
    }

    /// The update interval of a cellular automaton model, or `None` for other models.
    pub fn cellular_interval(&self) -> Option<f64> {
        match self {
            Self::Nsm(p) => Some(p.dt),
            Self::Kca(p) => Some(p.dt),
            _ => None,
        }
    }
}

/// The acceleration model of a vehicle.
#[derive(Clone, Debug)]
pub struct AccelerationModel {
    /// The variant and its parameters.
    params: ModelParams,
    /// The desired velocity adjustment factor.
    vel_adj: f64,
}

impl AccelerationModel {
    /// Creates a new acceleration model. Parameters outside of the
    /// model's valid domain are clamped to the nearest valid value.
    pub fn new(params: ModelParams) -> Self {
        let params = match params {
            ModelParams::Idm(p) => ModelParams::Idm(p.validated()),
            ModelParams::Gipps(p) => ModelParams::Gipps(p.validated()),
            ModelParams::Krauss(p) => ModelParams::Krauss(p.validated()),
            ModelParams::Ovm(p) => ModelParams::Ovm(p.validated()),
            ModelParams::Nsm(p) => ModelParams::Nsm(p.validated()),
            ModelParams::Kca(p) => ModelParams::Kca(p.validated()),
        };
        Self {
            params,
            vel_adj: 1.0,
        }
    }

    /// The model's parameters.
    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Set the desired velocity adjustment factor.
    pub fn set_velocity_adjust(&mut self, factor: f64) {
        self.vel_adj = factor;
    }

    /// Gets the desired velocity adjustment factor.
    pub fn velocity_adjust(&self) -> f64 {
        self.vel_adj
    }

    /// A short name for the model variant.
    pub fn name(&self) -> &'static str {
        match self.params {
            ModelParams::Idm(_) => "idm",
            ModelParams::Gipps(_) => "gipps",
            ModelParams::Krauss(_) => "krauss",
            ModelParams::Ovm(_) => "ovm",
            ModelParams::Nsm(_) => "nsm",
            ModelParams::Kca(_) => "kca",
        }
    }

    /// The desired speed of the model, before adjustment, in m/s.
    pub fn desired_speed(&self) -> f64 {
        self.params.desired_speed()
    }

    /// The update interval the model was calibrated for, in s.
    /// Continuous models have no specific interval.
    pub fn update_interval(&self) -> Option<f64> {
        match &self.params {
            ModelParams::Idm(_) | ModelParams::Ovm(_) => None,
            ModelParams::Gipps(p) => Some(p.t),
            ModelParams::Krauss(p) => Some(p.t),
            ModelParams::Nsm(p) => Some(p.dt),
            ModelParams::Kca(p) => Some(p.dt),
        }
    }

    /// Whether the model is a cellular automaton, whose positions
    /// are updated in discrete jumps once per update interval.
    pub fn is_cellular(&self) -> bool {
        matches!(self.params, ModelParams::Nsm(_) | ModelParams::Kca(_))
    }

    /// The comfortable deceleration of the vehicle in m/s<sup>2</sup>, a positive number.
    pub fn comfortable_deceleration(&self) -> f64 {
        match &self.params {
            ModelParams::Idm(p) => p.b,
            ModelParams::Gipps(p) => p.b,
            ModelParams::Krauss(p) => p.b,
            _ => DEFAULT_COMF_DEC,
        }
    }

    /// Computes the acceleration the model desires in the given situation.
    ///
    /// # Parameters
    /// * `input` - The vehicle's kinematic situation
    /// * `rng` - Source of randomness for the stochastic models. If `None`,
    ///   the stochastic terms are omitted, which is used for evaluating
    ///   hypothetical situations.
    pub fn acceleration(&self, input: &ModelInput, rng: Option<&mut dyn RngCore>) -> f64 {
        let v0 = f64::max(
            f64::min(self.vel_adj * self.desired_speed(), input.speed_limit),
            MIN_DESIRED_SPEED,
        );
        let noise = rng.map(|rng| rng.gen::<f64>());

        let acc = match &self.params {
            ModelParams::Idm(p) => p.acceleration(input, v0),
            ModelParams::Gipps(p) => p.acceleration(input, v0),
            ModelParams::Krauss(p) => p.acceleration(input, v0, noise),
            ModelParams::Ovm(p) => p.acceleration(input, v0),
            ModelParams::Nsm(p) => p.acceleration(input, v0, noise),
            ModelParams::Kca(p) => p.acceleration(input, v0, noise),
        };

        // Never reverse within the step
        let step = self.effective_interval(input.dt);
        f64::max(acc, -input.speed / step)
    }

    /// The interval over which the model's acceleration is applied,
    /// being the larger of the time step and the model's update interval.
    pub fn effective_interval(&self, dt: f64) -> f64 {
        self.update_interval().map_or(dt, |t| t.max(dt))
    }
}

/// Clamps a model parameter into its valid range, logging a warning if it was outside.
pub(crate) fn clamped(model: &str, name: &str, value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        log::warn!("{model}: parameter `{name}` is NaN, using {min}");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("{model}: parameter `{name}` = {value} is out of range, clamped to {clamped}");
    }
    clamped
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;

    fn all_models() -> Vec<AccelerationModel> {
        vec![
            ModelParams::Idm(Idm::default()),
            ModelParams::Gipps(Gipps::default()),
            ModelParams::Krauss(Krauss::default()),
            ModelParams::Ovm(OptimalVelocity::default()),
            ModelParams::Nsm(Nsm::default()),
            ModelParams::Kca(Kca::default()),
        ]
        .into_iter()
        .map(AccelerationModel::new)
        .collect()
    }

    #[test]
    fn never_reverses() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for model in all_models() {
            for &speed in &[0.0, 0.5, 5.0, 20.0] {
                for &gap in &[0.0, 0.5, 3.0, 30.0] {
                    let input = ModelInput::following(gap, speed, 0.0, 30.0, 0.1);
                    let acc = model.acceleration(&input, Some(&mut rng));
                    let step = model.effective_interval(0.1);
                    assert!(
                        speed + acc * step >= -1e-9,
                        "{} reversed: v={speed} s={gap} a={acc}",
                        model.name()
                    );
                }
            }
        }
    }

    #[test]
    fn speed_limit_caps_desired_speed() {
        for model in all_models() {
            let input = ModelInput::free(15.0, 10.0, 0.1);
            let acc = model.acceleration(&input, None);
            assert!(acc < 0.0, "{} accelerates above the limit", model.name());
        }
    }

    #[test]
    fn free_road_accelerates() {
        for model in all_models() {
            let input = ModelInput::free(0.0, f64::INFINITY, 1.0);
            let acc = model.acceleration(&input, None);
            assert!(acc > 0.0, "{} does not start", model.name());
        }
    }

    #[test]
    fn update_intervals() {
        let models = all_models();
        assert_eq!(models[0].update_interval(), None);
        assert_eq!(models[3].update_interval(), None);
        assert!(models[1].update_interval().is_some());
        assert!(models[4].is_cellular());
        assert!(!models[2].is_cellular());
        assert_approx_eq!(models[4].effective_interval(0.2), 1.0);
        assert_approx_eq!(models[0].effective_interval(0.2), 0.2);
    }

    #[test]
    fn invalid_params_are_clamped() {
        let model = AccelerationModel::new(ModelParams::Idm(Idm {
            a: -1.0,
            ..Idm::default()
        }));
        match model.params() {
            ModelParams::Idm(p) => assert!(p.a > 0.0),
            _ => unreachable!(),
        }
    }
}
