use serde::{Deserialize, Serialize};

/// A table of speed limits along a lane, indexed by position.
///
/// The limit in force at a position is that of the last change at or before
/// it, or the default limit upstream of the first change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimits {
    /// The limit upstream of the first change, in m/s.
    default: f64,
    /// The `(position, limit)` pairs at which the limit changes, sorted by position.
    changes: Vec<(f64, f64)>,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl SpeedLimits {
    /// A lane without any speed limit.
    pub fn unlimited() -> Self {
        Self::uniform(f64::INFINITY)
    }

    /// A lane with the same speed limit along its whole length.
    pub fn uniform(limit: f64) -> Self {
        Self {
            default: limit,
            changes: vec![],
        }
    }

    /// Adds a change of the speed limit at `pos`.
    pub fn with_limit(mut self, pos: f64, limit: f64) -> Self {
        let idx = self.changes.partition_point(|(p, _)| *p <= pos);
        self.changes.insert(idx, (pos, limit));
        self
    }

    /// Gets the speed limit in force at `pos`, in m/s.
    pub fn limit_at(&self, pos: f64) -> f64 {
        let idx = self.changes.partition_point(|(p, _)| *p <= pos);
        match idx {
            0 => self.default,
            idx => self.changes[idx - 1].1,
        }
    }

    /// Gets the first change of the speed limit strictly downstream of `pos`,
    /// as a `(position, limit)` pair.
    pub fn next_change(&self, pos: f64) -> Option<(f64, f64)> {
        let idx = self.changes.partition_point(|(p, _)| *p <= pos);
        self.changes.get(idx).copied()
    }

    /// The highest limit anywhere along the lane, in m/s.
    pub fn max(&self) -> f64 {
        self.changes
            .iter()
            .map(|(_, limit)| *limit)
            .fold(self.default, f64::max)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup() {
        let limits = SpeedLimits::uniform(30.0)
            .with_limit(500.0, 10.0)
            .with_limit(200.0, 20.0);
        assert_eq!(limits.limit_at(0.0), 30.0);
        assert_eq!(limits.limit_at(200.0), 20.0);
        assert_eq!(limits.limit_at(499.0), 20.0);
        assert_eq!(limits.limit_at(800.0), 10.0);
        assert_eq!(limits.next_change(100.0), Some((200.0, 20.0)));
        assert_eq!(limits.next_change(200.0), Some((500.0, 10.0)));
        assert_eq!(limits.next_change(600.0), None);
        assert_eq!(limits.max(), 30.0);
        assert!(SpeedLimits::default().limit_at(10.0).is_infinite());
    }
}
