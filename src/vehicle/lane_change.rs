use serde::{Deserialize, Serialize};

/// A direction of lane change. Lane 0 is the leftmost lane of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// Gets the lane index reached by changing lanes from `lane` in this direction,
    /// if such a lane exists in a segment with `num_lanes` lanes.
    pub fn target(self, lane: usize, num_lanes: usize) -> Option<usize> {
        match self {
            Direction::Left => lane.checked_sub(1),
            Direction::Right => Some(lane + 1).filter(|l| *l < num_lanes),
        }
    }

    /// Gets the direction which leads from `from` towards `to`, if they differ.
    pub fn towards(from: usize, to: usize) -> Option<Self> {
        use std::cmp::Ordering::*;
        match to.cmp(&from) {
            Less => Some(Direction::Left),
            Greater => Some(Direction::Right),
            Equal => None,
        }
    }

    /// The sign of a lateral movement in this direction (right is positive).
    pub fn sign(self) -> f64 {
        match self {
            Direction::Left => -1.0,
            Direction::Right => 1.0,
        }
    }
}

/// The MOBIL lane changing model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneChangeModel {
    /// The weight given to the advantage or disadvantage of other vehicles.
    pub politeness: f64,
    /// The minimum acceleration advantage required to change lanes, in m/s<sup>2</sup>.
    pub threshold: f64,
    /// The bias towards the right lanes, in m/s<sup>2</sup>.
    pub bias_right: f64,
    /// The maximum deceleration that may be imposed on a new follower, in m/s<sup>2</sup>.
    pub b_safe: f64,
    /// The minimum net gap to the new leader and follower, in m.
    pub min_gap: f64,
}

impl Default for LaneChangeModel {
    fn default() -> Self {
        Self {
            politeness: 0.1,
            threshold: 0.2,
            bias_right: 0.05,
            b_safe: 5.0,
            min_gap: 2.0,
        }
    }
}

/// The acceleration of a vehicle before and after a prospective lane change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationChange {
    pub before: f64,
    pub after: f64,
}

impl AccelerationChange {
    fn delta(&self) -> f64 {
        self.after - self.before
    }
}

/// The situation surrounding a prospective lane change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbourhood {
    /// The net gap to the leader in the target lane, if there is one.
    pub front_gap: Option<f64>,
    /// The net gap between the follower in the target lane and the vehicle.
    pub back_gap: Option<f64>,
    /// Whether the old leader, new leader or new follower are changing lanes.
    pub neighbour_changing: bool,
    /// The vehicle's own acceleration in its current and the target lane.
    pub own: AccelerationChange,
    /// The effect on the follower in the target lane.
    pub new_follower: Option<AccelerationChange>,
    /// The effect on the follower in the current lane.
    pub old_follower: Option<AccelerationChange>,
}

/// The reason a lane change was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The gap to the new leader or follower is too small.
    GapTooSmall,
    /// A neighbouring vehicle is itself changing lanes.
    NeighbourChangingLanes,
    /// The new follower would have to brake too hard.
    UnsafeFollower,
    /// The lane change is safe but not advantageous.
    NoIncentive,
}

impl LaneChangeModel {
    /// Checks the gaps to the new leader and follower are at least the minimum gap.
    pub fn check_gaps(&self, front_gap: Option<f64>, back_gap: Option<f64>) -> Result<(), Rejection> {
        let too_small = |gap: Option<f64>| gap.map_or(false, |gap| gap < self.min_gap);
        if too_small(front_gap) || too_small(back_gap) {
            Err(Rejection::GapTooSmall)
        } else {
            Ok(())
        }
    }

    /// Checks the acceleration imposed on the new follower is not below `-b_safe`.
    pub fn check_follower(&self, follower: Option<AccelerationChange>) -> Result<(), Rejection> {
        match follower {
            Some(acc) if acc.after < -self.b_safe => Err(Rejection::UnsafeFollower),
            _ => Ok(()),
        }
    }

    /// Computes the MOBIL incentive balance of a lane change.
    /// The lane change is advantageous if the balance is positive.
    pub fn balance(&self, situation: &Neighbourhood, direction: Direction) -> f64 {
        let others = situation.new_follower.map_or(0.0, |f| f.delta())
            + situation.old_follower.map_or(0.0, |f| f.delta());
        let bias = match direction {
            Direction::Left => -self.bias_right,
            Direction::Right => self.bias_right,
        };
        situation.own.delta() + self.politeness * others - self.threshold + bias
    }

    /// Evaluates a discretionary lane change, returning the incentive balance
    /// if the lane change should be made.
    pub fn evaluate(&self, situation: &Neighbourhood, direction: Direction) -> Result<f64, Rejection> {
        self.check_gaps(situation.front_gap, situation.back_gap)?;
        if situation.neighbour_changing {
            return Err(Rejection::NeighbourChangingLanes);
        }
        self.check_follower(situation.new_follower)?;
        let balance = self.balance(situation, direction);
        if balance > 0.0 {
            Ok(balance)
        } else {
            Err(Rejection::NoIncentive)
        }
    }

    /// Evaluates a mandatory lane change, which is made as soon as it is safe.
    pub fn evaluate_mandatory(&self, situation: &Neighbourhood) -> Result<(), Rejection> {
        self.check_gaps(situation.front_gap, situation.back_gap)?;
        self.check_follower(situation.new_follower)
    }
}

/// How lane changes are carried out.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaneChangeMode {
    /// Vehicles are transferred to the target lane instantly.
    Immediate,
    /// Vehicles move laterally into the target lane over `duration` seconds.
    Gradual { duration: f64 },
}

/// Global lane changing settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneChangeConfig {
    pub mode: LaneChangeMode,
    /// The time after a lane change during which the vehicle
    /// and its new neighbours may not change lanes, in s.
    pub cooldown: f64,
    /// The lateral distance between lane centres, in m.
    pub lane_width: f64,
}

impl Default for LaneChangeConfig {
    fn default() -> Self {
        Self {
            mode: LaneChangeMode::Gradual { duration: 3.0 },
            cooldown: 3.0,
            lane_width: 3.5,
        }
    }
}

/// An in-progress gradual lane change. The vehicle already belongs to its target lane;
/// its lateral offset from the target lane's centre line decays to zero with a
/// constant lateral acceleration over the first half and an equal deceleration
/// over the second half.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LateralTransition {
    /// The direction of the lane change.
    direction: Direction,
    /// The lateral distance to cover in m.
    width: f64,
    /// The total duration in s.
    duration: f64,
    /// The time since the lane change began in s.
    elapsed: f64,
}

impl LateralTransition {
    pub fn new(direction: Direction, width: f64, duration: f64) -> Self {
        Self {
            direction,
            width,
            duration: duration.max(f64::EPSILON),
            elapsed: 0.0,
        }
    }

    /// Advances the transition. Returns `true` once the target lane is reached.
    pub fn step(&mut self, dt: f64) -> bool {
        self.elapsed = f64::min(self.elapsed + dt, self.duration);
        self.elapsed >= self.duration
    }

    /// The magnitude of the lateral acceleration in m/s<sup>2</sup>.
    fn lateral_acc(&self) -> f64 {
        4.0 * self.width / self.duration.powi(2)
    }

    /// The distance moved laterally so far and the lateral speed.
    fn progress(&self) -> (f64, f64) {
        let acc = self.lateral_acc();
        let half = 0.5 * self.duration;
        let t = self.elapsed;
        if t <= half {
            (0.5 * acc * t * t, acc * t)
        } else {
            let t2 = t - half;
            let v_half = acc * half;
            (
                0.5 * self.width + v_half * t2 - 0.5 * acc * t2 * t2,
                v_half - acc * t2,
            )
        }
    }

    /// The lateral offset from the target lane's centre, in m (right is positive).
    pub fn offset(&self) -> f64 {
        let (moved, _) = self.progress();
        self.direction.sign() * (moved - self.width)
    }

    /// The lateral speed in m/s (right is positive).
    pub fn lateral_speed(&self) -> f64 {
        self.direction.sign() * self.progress().1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn situation() -> Neighbourhood {
        Neighbourhood {
            front_gap: Some(50.0),
            back_gap: Some(50.0),
            neighbour_changing: false,
            own: AccelerationChange {
                before: -0.5,
                after: 0.8,
            },
            new_follower: Some(AccelerationChange {
                before: 0.2,
                after: -0.3,
            }),
            old_follower: Some(AccelerationChange {
                before: -0.1,
                after: 0.3,
            }),
        }
    }

    #[test]
    fn incentive_balance() {
        let model = LaneChangeModel::default();
        let balance = model.balance(&situation(), Direction::Left);
        // 1.3 + 0.1 * (-0.5 + 0.4) - 0.2 - 0.05
        assert_approx_eq!(balance, 1.04);
        let balance = model.balance(&situation(), Direction::Right);
        assert_approx_eq!(balance, 1.14);
        assert!(model.evaluate(&situation(), Direction::Left).is_ok());
    }

    #[test]
    fn rejections() {
        let model = LaneChangeModel::default();
        let s = Neighbourhood {
            front_gap: Some(1.0),
            ..situation()
        };
        assert_eq!(model.evaluate(&s, Direction::Left), Err(Rejection::GapTooSmall));

        let s = Neighbourhood {
            neighbour_changing: true,
            ..situation()
        };
        assert_eq!(
            model.evaluate(&s, Direction::Left),
            Err(Rejection::NeighbourChangingLanes)
        );

        let s = Neighbourhood {
            new_follower: Some(AccelerationChange {
                before: 0.0,
                after: -6.0,
            }),
            ..situation()
        };
        assert_eq!(model.evaluate(&s, Direction::Left), Err(Rejection::UnsafeFollower));
        assert_eq!(model.evaluate_mandatory(&s), Err(Rejection::UnsafeFollower));

        let s = Neighbourhood {
            own: AccelerationChange {
                before: 0.0,
                after: 0.1,
            },
            ..situation()
        };
        assert_eq!(model.evaluate(&s, Direction::Left), Err(Rejection::NoIncentive));
        assert_eq!(model.evaluate_mandatory(&s), Ok(()));
    }

    #[test]
    fn lateral_profile() {
        let mut lc = LateralTransition::new(Direction::Right, 3.5, 4.0);
        assert_approx_eq!(lc.offset(), -3.5);
        lc.step(2.0);
        assert_approx_eq!(lc.offset(), -1.75);
        assert_approx_eq!(lc.lateral_speed(), 1.75);
        assert!(lc.step(2.5));
        assert_approx_eq!(lc.offset(), 0.0);
        assert_approx_eq!(lc.lateral_speed(), 0.0);
    }

    #[test]
    fn directions() {
        assert_eq!(Direction::Left.target(0, 3), None);
        assert_eq!(Direction::Right.target(1, 3), Some(2));
        assert_eq!(Direction::Right.target(2, 3), None);
        assert_eq!(Direction::towards(2, 0), Some(Direction::Left));
        assert_eq!(Direction::towards(1, 1), None);
    }
}
