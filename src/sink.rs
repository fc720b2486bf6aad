use crate::util::RateMeter;
use crate::Vehicle;
use serde::{Deserialize, Serialize};

/// Absorbs vehicles leaving the network at the downstream end of a road segment,
/// and accumulates statistics about them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrafficSink {
    /// Whether the sink was attached implicitly to an open lane end.
    implicit: bool,
    /// The number of vehicles removed.
    count: usize,
    /// The total distance travelled by the removed vehicles, in m.
    total_distance: f64,
    /// The total time spent in the network by the removed vehicles, in s.
    total_time: f64,
    /// Measures the outflow rate.
    meter: RateMeter,
}

impl TrafficSink {
    /// Creates an explicit sink measuring outflow over a window of `window` seconds.
    pub fn new(window: f64) -> Self {
        Self {
            meter: RateMeter::new(window),
            ..Default::default()
        }
    }

    /// Creates a sink for an open lane end.
    pub(crate) fn implicit() -> Self {
        Self {
            implicit: true,
            ..Default::default()
        }
    }

    /// Whether the sink was attached implicitly to an open lane end.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// The number of vehicles removed.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The total distance travelled by the removed vehicles, in m.
    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// The total time spent in the network by the removed vehicles, in s.
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// The mean travel time of the removed vehicles, in s.
    pub fn mean_travel_time(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_time / self.count as f64)
    }

    /// The measured outflow in veh/h.
    pub fn outflow_rate(&self) -> f64 {
        self.meter.rate_per_hour()
    }

    /// Records the removal of a vehicle at time `now`.
    pub(crate) fn absorb(&mut self, vehicle: &Vehicle, now: f64) {
        self.count += 1;
        self.total_distance += vehicle.distance();
        self.total_time += vehicle.travel_time();
        self.meter.record(now);
    }

    /// Expires old events from the outflow measurement.
    pub(crate) fn update(&mut self, now: f64) {
        self.meter.expire(now);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{VehicleId, VehiclePrototype};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn accumulates() {
        let mut sink = TrafficSink::new(60.0);
        let mut vehicle = Vehicle::new(VehicleId::default(), 0, &VehiclePrototype::default());
        vehicle.set_vel(10.0);
        vehicle.integrate(2.0);
        sink.absorb(&vehicle, 5.0);
        sink.absorb(&vehicle, 6.0);
        assert_eq!(sink.count(), 2);
        assert_approx_eq!(sink.total_distance(), 40.0);
        assert_approx_eq!(sink.mean_travel_time().unwrap(), 2.0);
        assert_approx_eq!(sink.outflow_rate(), 120.0);
        sink.update(100.0);
        assert_eq!(sink.outflow_rate(), 0.0);
        assert!(!sink.is_implicit());
    }
}
