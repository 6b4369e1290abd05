use core::fmt;
use core::str::FromStr;

/// End effector state as reported by the controller: millimetres for the
/// linear axes, degrees for the rotation.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
    R,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::R];

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::R => "R",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Axis::R => "°",
            _ => "mm",
        }
    }
}

impl Pose {
    pub const fn new(x: f32, y: f32, z: f32, r: f32) -> Self {
        Self { x, y, z, r }
    }

    pub fn axis(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::R => self.r,
        }
    }

    pub fn offset(&self, delta: &Pose) -> Pose {
        Pose::new(
            self.x + delta.x,
            self.y + delta.y,
            self.z + delta.z,
            self.r + delta.r,
        )
    }

    pub fn is_zero(&self) -> bool {
        *self == Pose::default()
    }

    /// One line summary used by the status spinner.
    pub fn status_line(&self) -> String {
        format!(
            "X:{:6.1} Y:{:6.1} Z:{:6.1} R:{:6.1}",
            self.x, self.y, self.z, self.r
        )
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current pose:")?;
        for axis in Axis::ALL {
            writeln!(f, "{}: {:.1} {}", axis.label(), self.axis(axis), axis.unit())?;
        }
        Ok(())
    }
}

/// A named, possibly partial, set of coordinates.
///
/// Fully specified waypoints double as move targets. Boundary waypoints often
/// pin only some axes; the others are ignored when checking proximity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub name: &'static str,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
    pub r: Option<f32>,
}

impl Waypoint {
    pub const fn full(name: &'static str, x: f32, y: f32, z: f32, r: f32) -> Self {
        Self {
            name,
            x: Some(x),
            y: Some(y),
            z: Some(z),
            r: Some(r),
        }
    }

    pub fn get(&self, axis: Axis) -> Option<f32> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::R => self.r,
        }
    }

    /// The axes this waypoint pins, with their values.
    pub fn axes(&self) -> impl Iterator<Item = (Axis, f32)> + '_ {
        Axis::ALL
            .into_iter()
            .filter_map(|axis| self.get(axis).map(|value| (axis, value)))
    }

    pub fn target(&self) -> Option<Pose> {
        Some(Pose::new(self.x?, self.y?, self.z?, self.r?))
    }

    /// True when every pinned axis of `pose` lies within `margin` of this
    /// waypoint. A waypoint that pins no axis is always near.
    pub fn is_near(&self, pose: &Pose, margin: Margin) -> bool {
        self.axes()
            .all(|(axis, value)| (pose.axis(axis) - value).abs() <= margin.mm())
    }
}

pub const HOME: Waypoint = Waypoint::full("Home", 242.2293, 0.0, 151.3549, 0.0);

pub const PREDEFINED: [Waypoint; 5] = [
    Waypoint::full("Position 1 - Base", 200.0, 0.0, 150.0, 0.0),
    Waypoint::full("Position 2 - Left", 150.0, -100.0, 100.0, -45.0),
    Waypoint::full("Position 3 - Right", 150.0, 100.0, 100.0, 45.0),
    Waypoint::full("Position 4 - Pickup", 180.0, 0.0, 50.0, 0.0),
    Waypoint::full("Position 5 - High", 200.0, 0.0, 200.0, 0.0),
];

pub const BOUNDARIES: [Waypoint; 4] = [
    Waypoint {
        name: "upper right",
        x: Some(210.0),
        y: None,
        z: Some(166.98),
        r: None,
    },
    Waypoint::full("lower right", -119.0, 136.9, 6.57, 131.0),
    Waypoint::full("upper left", -183.0, -156.0, 171.0, -139.0),
    Waypoint::full("lower left", -134.0, -126.0, 10.0, -136.0),
];

/// Targets visited by the "test limits" action, in order.
pub const LIMIT_SWEEP: [Waypoint; 3] = [
    Waypoint::full("sweep -180", -180.0, 0.0, 150.0, 0.0),
    Waypoint::full("sweep 0", 0.0, 0.0, 150.0, 0.0),
    Waypoint::full("sweep 180", 180.0, 0.0, 150.0, 0.0),
];

/// Proximity tolerance in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Margin(f32);

impl Margin {
    pub const OPERATOR_MIN: u32 = 5;
    pub const OPERATOR_MAX: u32 = 50;
    pub const DEFAULT: Margin = Margin(15.0);

    /// Builds a margin without the operator range check. Negative values
    /// collapse to zero.
    pub fn new(mm: f32) -> Self {
        Margin(mm.max(0.0))
    }

    pub fn mm(self) -> f32 {
        self.0
    }
}

impl Default for Margin {
    fn default() -> Self {
        Margin::DEFAULT
    }
}

impl fmt::Display for Margin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mm", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("margin must be a whole number of millimetres, got {0:?}")]
    NotANumber(String),
    #[error("margin must be between {min} and {max} mm, got {value}")]
    OutOfRange { value: u32, min: u32, max: u32 },
}

/// Parses operator input: plain digits only, within
/// [`Margin::OPERATOR_MIN`]..=[`Margin::OPERATOR_MAX`].
impl FromStr for Margin {
    type Err = MarginError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MarginError::NotANumber(text.to_string()));
        }
        let value: u32 = text
            .parse()
            .map_err(|_| MarginError::NotANumber(text.to_string()))?;
        if !(Margin::OPERATOR_MIN..=Margin::OPERATOR_MAX).contains(&value) {
            return Err(MarginError::OutOfRange {
                value,
                min: Margin::OPERATOR_MIN,
                max: Margin::OPERATOR_MAX,
            });
        }
        Ok(Margin(value as f32))
    }
}
