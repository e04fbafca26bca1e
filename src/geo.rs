//! Compass-named coordinate frames and small-scale geodesy helpers.
//!
//! Latitude/longitude pairs are `Vector2<f64>` in `(lat, lon)` order,
//! degrees, matching the EPSG:4326 axis order (north, east).

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix2, Vector2};

use crate::affine::{normalize_angle, Rotation2};
use crate::error::{Result, TileError};

/// WGS-84 equatorial radius.
pub const EARTH_RADIUS_METERS: f64 = 6.378137e6;

/// One of the four cardinal directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompassDirection {
    North,
    South,
    East,
    West,
}

impl CompassDirection {
    /// The antonym direction.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            CompassDirection::North => CompassDirection::South,
            CompassDirection::South => CompassDirection::North,
            CompassDirection::East => CompassDirection::West,
            CompassDirection::West => CompassDirection::East,
        }
    }

    /// True if `other` lies on the same north-south or east-west line.
    #[must_use]
    pub fn is_parallel_to(self, other: Self) -> bool {
        self == other || self == other.opposite()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompassDirection::North => "north",
            CompassDirection::South => "south",
            CompassDirection::East => "east",
            CompassDirection::West => "west",
        }
    }
}

impl fmt::Display for CompassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompassDirection {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "north" => Ok(CompassDirection::North),
            "south" => Ok(CompassDirection::South),
            "east" => Ok(CompassDirection::East),
            "west" => Ok(CompassDirection::West),
            other => Err(TileError::InvalidAxis(other.to_string())),
        }
    }
}

/// An ordered pair of perpendicular compass axes. Each axis is named by its
/// positive direction; the negative direction is the antonym.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompassAxes {
    axes: [CompassDirection; 2],
}

impl CompassAxes {
    /// EPSG:4326 axis order: latitude then longitude.
    pub const NORTH_EAST: CompassAxes = CompassAxes {
        axes: [CompassDirection::North, CompassDirection::East],
    };
    /// Projected easting/northing order used by EPSG:3857 and most UTM CRS.
    pub const EAST_NORTH: CompassAxes = CompassAxes {
        axes: [CompassDirection::East, CompassDirection::North],
    };
    /// XYZ (slippy-map) tile axes: x east, y south.
    pub const EAST_SOUTH: CompassAxes = CompassAxes {
        axes: [CompassDirection::East, CompassDirection::South],
    };
    /// Raster pixel axes: rows grow south, columns grow east.
    pub const SOUTH_EAST: CompassAxes = CompassAxes {
        axes: [CompassDirection::South, CompassDirection::East],
    };

    /// Build a frame from two perpendicular directions.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidAxis`] if the directions are parallel
    /// or antiparallel.
    pub fn new(axis1: CompassDirection, axis2: CompassDirection) -> Result<Self> {
        if axis1.is_parallel_to(axis2) {
            return Err(TileError::InvalidAxis(format!(
                "axes {axis1} and {axis2} are not perpendicular"
            )));
        }
        Ok(Self {
            axes: [axis1, axis2],
        })
    }

    /// Parse a frame from direction names, e.g. `("east", "south")`.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidAxis`] on unknown names or
    /// non-perpendicular directions.
    pub fn parse(axis1: &str, axis2: &str) -> Result<Self> {
        Self::new(axis1.parse()?, axis2.parse()?)
    }

    /// Positive direction of axis `index` (0 or 1).
    #[must_use]
    pub fn positive(&self, index: usize) -> CompassDirection {
        self.axes[index]
    }

    /// Negative direction of axis `index` (0 or 1).
    #[must_use]
    pub fn negative(&self, index: usize) -> CompassDirection {
        self.axes[index].opposite()
    }

    /// The unit vector pointing in `direction`, expressed in this frame.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidAxis`] if `direction` lies on neither
    /// axis.
    pub fn get_vector(&self, direction: CompassDirection) -> Result<Vector2<f64>> {
        for (i, axis) in self.axes.iter().enumerate() {
            if *axis == direction {
                let mut v = Vector2::zeros();
                v[i] = 1.0;
                return Ok(v);
            }
            if axis.opposite() == direction {
                let mut v = Vector2::zeros();
                v[i] = -1.0;
                return Ok(v);
            }
        }
        Err(TileError::InvalidAxis(format!(
            "direction {direction} lies on neither axis of {self}"
        )))
    }
}

impl fmt::Display for CompassAxes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.axes[0], self.axes[1])
    }
}

/// The signed-permutation rotation taking coordinates in frame `from` to
/// coordinates in frame `to`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NamedAxesTransformation {
    from: CompassAxes,
    to: CompassAxes,
    rotation: Rotation2,
}

impl NamedAxesTransformation {
    /// Derive the rotation between two compass frames.
    ///
    /// # Errors
    /// Fails with [`TileError::IncompatibleAxes`] if the frames are not
    /// rotations of each other (some direction of one frame lies on no axis
    /// of the other).
    pub fn new(from: CompassAxes, to: CompassAxes) -> Result<Self> {
        let mut matrix = Matrix2::zeros();
        for i_from in 0..2 {
            for i_to in 0..2 {
                if to.positive(i_to) == from.positive(i_from) {
                    matrix[(i_to, i_from)] = 1.0;
                } else if to.positive(i_to) == from.negative(i_from) {
                    matrix[(i_to, i_from)] = -1.0;
                }
            }
        }
        for i in 0..2 {
            if matrix.row(i).iter().all(|v| *v == 0.0)
                || matrix.column(i).iter().all(|v| *v == 0.0)
            {
                return Err(TileError::IncompatibleAxes(format!("{from} vs {to}")));
            }
        }
        Ok(Self {
            from,
            to,
            rotation: Rotation2::from_matrix(matrix),
        })
    }

    #[must_use]
    pub fn from_axes(&self) -> CompassAxes {
        self.from
    }

    #[must_use]
    pub fn to_axes(&self) -> CompassAxes {
        self.to
    }

    /// The underlying signed-permutation rotation.
    #[must_use]
    pub fn rotation(&self) -> &Rotation2 {
        &self.rotation
    }

    /// Express a `from`-frame vector in the `to` frame.
    #[must_use]
    pub fn transform(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation.transform(point)
    }

    /// Express a `to`-frame vector in the `from` frame.
    #[must_use]
    pub fn transform_inverse(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation.transform_inverse(point)
    }

    /// The transformation in the opposite direction.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            rotation: self.rotation.inverse(),
        }
    }
}

/// Great-circle distance between two lat/lon points in meters (haversine).
#[must_use]
pub fn distance(latlon1: &Vector2<f64>, latlon2: &Vector2<f64>) -> f64 {
    let lat1 = latlon1.x.to_radians();
    let lat2 = latlon2.x.to_radians();
    let dlat = lat1 - lat2;
    let dlon = (latlon1.y - latlon2.y).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_METERS * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial bearing from `latlon1` toward `latlon2`, degrees clockwise from
/// north.
#[must_use]
pub fn initial_bearing(latlon1: &Vector2<f64>, latlon2: &Vector2<f64>) -> f64 {
    let lat1 = latlon1.x.to_radians();
    let lat2 = latlon2.x.to_radians();
    let dlon = (latlon2.y - latlon1.y).to_radians();

    let x = lat2.cos() * dlon.sin();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    x.atan2(y).to_degrees()
}

/// Move `distance` meters from `latlon` along `bearing` (degrees clockwise
/// from north) on the spherical earth.
#[must_use]
pub fn move_from_latlon(latlon: &Vector2<f64>, bearing: f64, distance: f64) -> Vector2<f64> {
    let bearing = bearing.to_radians();
    let lat = latlon.x.to_radians();
    let lon = latlon.y.to_radians();
    let angular = distance / EARTH_RADIUS_METERS;

    let target_lat =
        (lat.sin() * angular.cos() + lat.cos() * angular.sin() * bearing.cos()).asin();
    let target_lon = lon
        + (bearing.sin() * angular.sin() * lat.cos())
            .atan2(angular.cos() - lat.sin() * target_lat.sin());
    let target_lon = normalize_angle(target_lon);

    Vector2::new(target_lat.to_degrees(), target_lon.to_degrees())
}

/// Local meters per degree of latitude and longitude, estimated from two
/// perpendicular one-meter moves.
#[must_use]
pub fn meters_per_deg_at_latlon(latlon: &Vector2<f64>) -> Vector2<f64> {
    let step = 1.0;
    let moved = move_from_latlon(&move_from_latlon(latlon, 90.0, step), 0.0, step);
    let diff_deg = (latlon - moved).abs();
    Vector2::new(step / diff_deg.x, step / diff_deg.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compass_direction_parse() {
        assert_eq!(
            "east".parse::<CompassDirection>().unwrap(),
            CompassDirection::East
        );
        assert!("upward".parse::<CompassDirection>().is_err());
    }

    #[test]
    fn test_compass_axes_rejects_parallel() {
        assert!(CompassAxes::new(CompassDirection::North, CompassDirection::South).is_err());
        assert!(CompassAxes::new(CompassDirection::East, CompassDirection::East).is_err());
        assert!(CompassAxes::new(CompassDirection::East, CompassDirection::South).is_ok());
    }

    #[test]
    fn test_get_vector_signs() {
        let axes = CompassAxes::EAST_SOUTH;
        assert_eq!(
            axes.get_vector(CompassDirection::East).unwrap(),
            Vector2::new(1.0, 0.0)
        );
        assert_eq!(
            axes.get_vector(CompassDirection::West).unwrap(),
            Vector2::new(-1.0, 0.0)
        );
        assert_eq!(
            axes.get_vector(CompassDirection::South).unwrap(),
            Vector2::new(0.0, 1.0)
        );
        assert_eq!(
            axes.get_vector(CompassDirection::North).unwrap(),
            Vector2::new(0.0, -1.0)
        );
    }

    #[test]
    fn test_named_axes_transformation_permutes() {
        let t =
            NamedAxesTransformation::new(CompassAxes::EAST_NORTH, CompassAxes::EAST_SOUTH).unwrap();
        // East stays on axis 0, north flips onto the southward axis 1.
        let out = t.transform(&Vector2::new(3.0, 2.0));
        assert_eq!(out, Vector2::new(3.0, -2.0));
    }

    #[test]
    fn test_named_axes_transformation_inverse_symmetry() {
        let pairs = [
            (CompassAxes::NORTH_EAST, CompassAxes::EAST_SOUTH),
            (CompassAxes::EAST_NORTH, CompassAxes::SOUTH_EAST),
            (CompassAxes::EAST_SOUTH, CompassAxes::EAST_NORTH),
        ];
        for (a, b) in pairs {
            let ab = NamedAxesTransformation::new(a, b).unwrap();
            let ba = NamedAxesTransformation::new(b, a).unwrap();
            assert_eq!(ab.inverse().rotation(), ba.rotation());
            let p = Vector2::new(0.5, -2.5);
            assert!((ab.transform_inverse(&ab.transform(&p)) - p).norm() < 1e-12);
        }
    }

    #[test]
    fn test_named_axes_rotation_is_orthonormal() {
        let t =
            NamedAxesTransformation::new(CompassAxes::NORTH_EAST, CompassAxes::SOUTH_EAST).unwrap();
        let m = t.rotation().matrix();
        let gram = m.transpose() * m;
        assert!((gram - Matrix2::identity()).norm() < 1e-12);
        assert!((t.rotation().matrix().determinant().abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_haversine_distance() {
        // Paris to Berlin, roughly 878 km.
        let paris = Vector2::new(48.8566, 2.3522);
        let berlin = Vector2::new(52.52, 13.405);
        let d = distance(&paris, &berlin);
        assert!((d - 878_000.0).abs() < 10_000.0, "got {d}");
    }

    #[test]
    fn test_move_from_latlon_roundtrip() {
        let start = Vector2::new(40.0, -105.0);
        let moved = move_from_latlon(&start, 0.0, 10_000.0);
        assert!(moved.x > start.x);
        let back = move_from_latlon(&moved, 180.0, 10_000.0);
        assert!((back - start).norm() < 1e-6);
    }

    #[test]
    fn test_meters_per_deg_at_equator() {
        let mpd = meters_per_deg_at_latlon(&Vector2::new(0.0, 0.0));
        // One degree is about 111 km on both axes at the equator.
        assert!((mpd.x - 111_000.0).abs() < 1_000.0);
        assert!((mpd.y - 111_000.0).abs() < 1_000.0);
    }

    #[test]
    fn test_initial_bearing_east() {
        let b = initial_bearing(&Vector2::new(0.0, 0.0), &Vector2::new(0.0, 1.0));
        assert!((b - 90.0).abs() < 1e-6);
    }
}
