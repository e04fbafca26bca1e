//! The projection service: EPSG-described CRS values with forward/inverse
//! transforms and angle transport, backed by `proj4rs` and the
//! `crs-definitions` database (pure Rust, no system PROJ install).

use std::fmt;
use std::sync::Arc;

use nalgebra::Vector2;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::affine::{angle_to_rotation_matrix, rotation_matrix_to_angle, ScaledRigid2};
use crate::error::{Result, TileError};
use crate::geo::{CompassAxes, NamedAxesTransformation};

/// Web Mercator (Spherical Mercator), the CRS of XYZ/TMS tile pyramids.
pub const EPSG_WEB_MERCATOR: u16 = 3857;
/// WGS84 geographic latitude/longitude in degrees.
pub const EPSG_WGS84: u16 = 4326;

/// Latitude bound of the square Web Mercator world.
pub const WEB_MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Geographic extent a CRS is defined over.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaOfUse {
    /// South-west corner, `(lat, lon)` degrees.
    pub lower_latlon: Vector2<f64>,
    /// North-east corner, `(lat, lon)` degrees.
    pub upper_latlon: Vector2<f64>,
}

/// A coordinate reference system with its forward/inverse transform from
/// EPSG:4326.
///
/// Values are cheap to clone and immutable once built; layouts share them
/// freely.
#[derive(Clone)]
pub struct Projection {
    description: String,
    epsg: u16,
    proj: Arc<Proj>,
    wgs84: Arc<Proj>,
    geographic: bool,
    axes: CompassAxes,
    area_of_use: AreaOfUse,
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("description", &self.description)
            .field("geographic", &self.geographic)
            .field("axes", &self.axes)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Projection {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
    }
}

impl Projection {
    /// Build a projection from an EPSG code in the `crs-definitions`
    /// database.
    ///
    /// # Errors
    /// Fails with [`TileError::Projection`] if the code is unknown or its
    /// PROJ string does not parse.
    pub fn from_epsg(epsg: u16) -> Result<Self> {
        let proj4 = crs_definitions::from_code(epsg)
            .map(|def| def.proj4)
            .ok_or_else(|| {
                TileError::Projection(format!("EPSG:{epsg} is not in the crs-definitions database"))
            })?;
        let wgs84_proj4 = crs_definitions::from_code(EPSG_WGS84)
            .map(|def| def.proj4)
            .ok_or_else(|| TileError::Projection("EPSG:4326 definition missing".into()))?;

        let proj = Proj::from_proj_string(proj4)
            .map_err(|e| TileError::Projection(format!("invalid projection EPSG:{epsg}: {e:?}")))?;
        let wgs84 = Proj::from_proj_string(wgs84_proj4)
            .map_err(|e| TileError::Projection(format!("invalid EPSG:4326 definition: {e:?}")))?;

        let geographic = proj4.contains("+proj=longlat");
        let axes = if geographic {
            CompassAxes::NORTH_EAST
        } else {
            CompassAxes::EAST_NORTH
        };
        let area_of_use = match epsg {
            EPSG_WEB_MERCATOR => AreaOfUse {
                lower_latlon: Vector2::new(-WEB_MERCATOR_MAX_LATITUDE, -180.0),
                upper_latlon: Vector2::new(WEB_MERCATOR_MAX_LATITUDE, 180.0),
            },
            _ => AreaOfUse {
                lower_latlon: Vector2::new(-90.0, -180.0),
                upper_latlon: Vector2::new(90.0, 180.0),
            },
        };

        Ok(Self {
            description: format!("epsg:{epsg}"),
            epsg,
            proj: Arc::new(proj),
            wgs84: Arc::new(wgs84),
            geographic,
            axes,
            area_of_use,
        })
    }

    /// The Web Mercator projection used by XYZ and TMS layouts.
    ///
    /// # Errors
    /// Fails with [`TileError::Projection`] if the bundled definition does
    /// not parse.
    pub fn epsg3857() -> Result<Self> {
        Self::from_epsg(EPSG_WEB_MERCATOR)
    }

    /// WGS84 geographic coordinates as a CRS of their own.
    ///
    /// # Errors
    /// Fails with [`TileError::Projection`] if the bundled definition does
    /// not parse.
    pub fn epsg4326() -> Result<Self> {
        Self::from_epsg(EPSG_WGS84)
    }

    /// Override the declared geographic extent.
    #[must_use]
    pub fn with_area_of_use(mut self, lower_latlon: Vector2<f64>, upper_latlon: Vector2<f64>) -> Self {
        self.area_of_use = AreaOfUse {
            lower_latlon,
            upper_latlon,
        };
        self
    }

    /// Override the axis order reported for this CRS.
    #[must_use]
    pub fn with_axes(mut self, axes: CompassAxes) -> Self {
        self.axes = axes;
        self
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    #[must_use]
    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    #[must_use]
    pub fn axes(&self) -> CompassAxes {
        self.axes
    }

    #[must_use]
    pub fn area_of_use(&self) -> AreaOfUse {
        self.area_of_use
    }

    /// Project `(lat, lon)` degrees into this CRS, components in this CRS's
    /// axis order.
    ///
    /// # Errors
    /// Fails with [`TileError::Projection`] if the transform rejects the
    /// point.
    pub fn forward(&self, latlon: &Vector2<f64>) -> Result<Vector2<f64>> {
        if self.geographic {
            let axes = NamedAxesTransformation::new(CompassAxes::NORTH_EAST, self.axes)?;
            return Ok(axes.transform(latlon));
        }

        let mut point = (latlon.y.to_radians(), latlon.x.to_radians(), 0.0);
        transform(&self.wgs84, &self.proj, &mut point).map_err(|e| {
            TileError::Projection(format!(
                "forward transform to {} failed at {latlon:?}: {e:?}",
                self.description
            ))
        })?;
        let east_north = Vector2::new(point.0, point.1);
        let axes = NamedAxesTransformation::new(CompassAxes::EAST_NORTH, self.axes)?;
        Ok(axes.transform(&east_north))
    }

    /// Invert [`Projection::forward`]: CRS coordinates back to `(lat, lon)`
    /// degrees.
    ///
    /// # Errors
    /// Fails with [`TileError::Projection`] if the transform rejects the
    /// point.
    pub fn inverse(&self, coords: &Vector2<f64>) -> Result<Vector2<f64>> {
        if self.geographic {
            let axes = NamedAxesTransformation::new(CompassAxes::NORTH_EAST, self.axes)?;
            return Ok(axes.transform_inverse(coords));
        }

        let axes = NamedAxesTransformation::new(CompassAxes::EAST_NORTH, self.axes)?;
        let east_north = axes.transform_inverse(coords);
        let mut point = (east_north.x, east_north.y, 0.0);
        transform(&self.proj, &self.wgs84, &mut point).map_err(|e| {
            TileError::Projection(format!(
                "inverse transform from {} failed at {coords:?}: {e:?}",
                self.description
            ))
        })?;
        Ok(Vector2::new(point.1.to_degrees(), point.0.to_degrees()))
    }

    /// Transport an angle given in the EPSG:4326 frame into this CRS's
    /// frame through the named-axes rotation.
    ///
    /// # Errors
    /// Fails with [`TileError::IncompatibleAxes`] if the frames do not
    /// correspond.
    pub fn transport_angle(&self, angle: f64) -> Result<f64> {
        let axes = NamedAxesTransformation::new(CompassAxes::NORTH_EAST, self.axes)?;
        Ok(rotation_matrix_to_angle(
            &(axes.rotation().matrix() * angle_to_rotation_matrix(angle)),
        ))
    }

    /// Invert [`Projection::transport_angle`].
    ///
    /// # Errors
    /// Fails with [`TileError::IncompatibleAxes`] if the frames do not
    /// correspond.
    pub fn transport_angle_inverse(&self, angle: f64) -> Result<f64> {
        let axes = NamedAxesTransformation::new(CompassAxes::NORTH_EAST, self.axes)?;
        Ok(rotation_matrix_to_angle(
            &(axes.rotation().matrix().transpose() * angle_to_rotation_matrix(angle)),
        ))
    }
}

/// The transform taking local east/north meter offsets at `latlon` to
/// EPSG:3857 coordinates, compensating the mercator scale `1 / cos(lat)`.
///
/// # Errors
/// Fails with [`TileError::Projection`] if the point does not project.
pub fn eastnorth_meters_at_latlon_to_epsg3857(
    latlon: &Vector2<f64>,
    epsg3857: &Projection,
) -> Result<ScaledRigid2> {
    let mercator_scale = latlon.x.to_radians().cos();
    let projected = epsg3857.forward(latlon)?;
    let scale = ScaledRigid2::from_uniform_scale(1.0 / mercator_scale);
    let translate = ScaledRigid2::from_translation(projected * mercator_scale);
    Ok(scale * translate)
}

/// The pose of `(latlon, bearing)` expressed in EPSG:3857: translation at
/// the projected point, rotation by the transported bearing, mercator scale
/// folded in.
///
/// # Errors
/// Fails with [`TileError::Projection`] if the point does not project.
pub fn geopose_to_epsg3857(
    latlon: &Vector2<f64>,
    bearing: f64,
    epsg3857: &Projection,
) -> Result<ScaledRigid2> {
    let mut pose = eastnorth_meters_at_latlon_to_epsg3857(latlon, epsg3857)?;
    let angle = epsg3857.transport_angle(bearing.to_radians())?;
    pose.set_rotation(angle_to_rotation_matrix(angle));
    Ok(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_epsg3857_origin() {
        let proj = Projection::epsg3857().unwrap();
        let origin = proj.forward(&Vector2::new(0.0, 0.0)).unwrap();
        assert!(origin.norm() < 1.0);
    }

    #[test]
    fn test_epsg3857_antimeridian_extent() {
        let proj = Projection::epsg3857().unwrap();
        let edge = proj.forward(&Vector2::new(0.0, 180.0)).unwrap();
        assert!((edge.x - 20_037_508.342_789_244).abs() < 1.0, "got {}", edge.x);
        assert!(edge.y.abs() < 1.0);
    }

    #[test]
    fn test_forward_inverse_roundtrip() {
        let proj = Projection::epsg3857().unwrap();
        for latlon in [
            Vector2::new(0.0, 0.0),
            Vector2::new(48.8566, 2.3522),
            Vector2::new(-33.8688, 151.2093),
            Vector2::new(80.0, -170.0),
        ] {
            let projected = proj.forward(&latlon).unwrap();
            let back = proj.inverse(&projected).unwrap();
            assert!((back - latlon).norm() < 1e-6, "roundtrip drift at {latlon:?}");
        }
    }

    #[test]
    fn test_epsg4326_is_identity() {
        let proj = Projection::epsg4326().unwrap();
        assert!(proj.is_geographic());
        let latlon = Vector2::new(51.0, 13.7);
        assert_eq!(proj.forward(&latlon).unwrap(), latlon);
        assert_eq!(proj.inverse(&latlon).unwrap(), latlon);
    }

    #[test]
    fn test_unknown_epsg_rejected() {
        assert!(Projection::from_epsg(65535).is_err());
    }

    #[test]
    fn test_transport_angle_swaps_bearing_to_math_angle() {
        let proj = Projection::epsg3857().unwrap();
        // A bearing of 90 degrees (due east) is angle 0 from the easting
        // axis; due north maps to pi/2.
        assert!((proj.transport_angle(PI / 2.0).unwrap()).abs() < 1e-12);
        assert!((proj.transport_angle(0.0).unwrap() - PI / 2.0).abs() < 1e-12);
        let angle = 0.37;
        let back = proj
            .transport_angle_inverse(proj.transport_angle(angle).unwrap())
            .unwrap();
        assert!((back - angle).abs() < 1e-12);
    }

    #[test]
    fn test_geopose_translation_and_scale() {
        let proj = Projection::epsg3857().unwrap();
        let latlon = Vector2::new(60.0, 10.0);
        let pose = geopose_to_epsg3857(&latlon, 0.0, &proj).unwrap();
        let projected = proj.forward(&latlon).unwrap();
        assert!((pose.translation() - projected).norm() < 1e-6);
        let expected_scale = 1.0 / 60.0_f64.to_radians().cos();
        assert!((pose.scale().x - expected_scale).abs() < 1e-9);
    }
}
