//! Bandwidth characteristics of connections.
//!
//! A characteristic describes how the available share of the connection bandwidth changes over time. It is defined
//! by control points `(phase, modifier)` where phase is a fraction of the characteristic period. The curve repeats
//! every period and is linearly interpolated between control points, the segment after the last point goes towards
//! the first point of the next period. All times here are in milliseconds.

use serde::{Deserialize, Serialize};

use crate::error::DfsError;

/// Smallest allowed modifier value.
pub const MIN_MODIFIER: f64 = 0.01;

/// Default period of a characteristic: one minute.
pub const DEFAULT_PERIOD: f64 = 60_000.;

/// Default sampling step used for averaging.
pub const DEFAULT_STEP: f64 = 60.;

/// Control point of a characteristic.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Fraction of the period in `[0, 1]`.
    pub phase: f64,
    /// Bandwidth modifier in `[MIN_MODIFIER, 1]`.
    pub modifier: f64,
}

/// Cyclic piecewise linear bandwidth modifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandwidthCharacteristic {
    points: Vec<ControlPoint>,
    period: f64,
    step: f64,
}

impl Default for BandwidthCharacteristic {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD, DEFAULT_STEP)
    }
}

impl BandwidthCharacteristic {
    /// Creates characteristic without control points, which evaluates to 1 everywhere.
    pub fn new(period: f64, step: f64) -> Self {
        assert!(period > 0., "Characteristic period must be > 0");
        assert!(step > 0., "Characteristic step must be > 0");
        Self {
            points: Vec::new(),
            period,
            step,
        }
    }

    /// Creates characteristic without control points, returns an error instead of panicking on non-positive period
    /// or step.
    pub fn try_new(period: f64, step: f64) -> Result<Self, DfsError> {
        if period.is_nan() || period <= 0. || step.is_nan() || step <= 0. {
            return Err(DfsError::InvalidParameter(format!(
                "characteristic period and step must be > 0, got {} and {}",
                period, step
            )));
        }
        Ok(Self::new(period, step))
    }

    /// Creates characteristic with the same modifier at every moment.
    pub fn constant(modifier: f64) -> Self {
        let mut characteristic = Self::default();
        characteristic.add_point(0., modifier);
        characteristic
    }

    /// Creates characteristic from control points.
    pub fn from_points(period: f64, step: f64, points: &[(f64, f64)]) -> Self {
        let mut characteristic = Self::new(period, step);
        for &(phase, modifier) in points {
            characteristic.add_point(phase, modifier);
        }
        characteristic
    }

    /// Adds control point, replacing the existing one with the same phase.
    ///
    /// Phase is clamped to `[0, 1]` and modifier to `[MIN_MODIFIER, 1]`.
    pub fn add_point(&mut self, phase: f64, modifier: f64) {
        let point = ControlPoint {
            phase: phase.clamp(0., 1.),
            modifier: modifier.clamp(MIN_MODIFIER, 1.),
        };
        match self.points.binary_search_by(|p| p.phase.total_cmp(&point.phase)) {
            Ok(pos) => self.points[pos] = point,
            Err(pos) => self.points.insert(pos, point),
        }
    }

    /// Removes control point with the given phase.
    pub fn remove_point(&mut self, phase: f64) -> bool {
        let len = self.points.len();
        self.points.retain(|p| p.phase != phase);
        len != self.points.len()
    }

    /// Control points ordered by phase.
    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    /// Period length.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Sampling step used for averaging.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Returns modifier at `time`.
    pub fn modifier_at(&self, time: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 1.,
        };
        let phase = time.rem_euclid(self.period) / self.period;
        let pos = self.points.partition_point(|p| p.phase <= phase);
        let (left, right) = if pos == 0 {
            (
                ControlPoint {
                    phase: last.phase - 1.,
                    modifier: last.modifier,
                },
                *first,
            )
        } else if pos == self.points.len() {
            (
                *last,
                ControlPoint {
                    phase: first.phase + 1.,
                    modifier: first.modifier,
                },
            )
        } else {
            (self.points[pos - 1], self.points[pos])
        };
        if right.phase <= left.phase {
            return left.modifier;
        }
        left.modifier + (right.modifier - left.modifier) * (phase - left.phase) / (right.phase - left.phase)
    }

    /// Returns average modifier over `[start, start + duration]`.
    ///
    /// The interval is sampled with the characteristic step and the values at adjacent samples are averaged, so the
    /// result is exact for intervals where the curve is linear between samples. Zero duration gives the modifier at
    /// `start`.
    pub fn average_modifier(&self, start: f64, duration: f64) -> f64 {
        if duration <= 0. || self.points.len() < 2 {
            return self.modifier_at(start);
        }
        let mut sum = 0.;
        let mut offset = 0.;
        let mut prev = self.modifier_at(start);
        while offset < duration {
            let next_offset = (offset + self.step).min(duration);
            let next = self.modifier_at(start + next_offset);
            sum += (prev + next) / 2. * (next_offset - offset);
            prev = next;
            offset = next_offset;
        }
        sum / duration
    }
}
