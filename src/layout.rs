//! Tile pyramid layouts: the arithmetic between tile indices, CRS
//! coordinates, world pixels and latitude/longitude.
//!
//! A layout pins down a projection, the tile edge length in pixels, the CRS
//! extent of the single zoom-0 tile, the lower corner of the tile-aligned
//! bounding box and the compass orientation of the tile axes. Every
//! conversion in the crate is derived from those values plus two signed
//! axis permutations precomputed at construction.

use nalgebra::Vector2;

use crate::affine::angle_between;
use crate::error::{Result, TileError};
use crate::geo::{
    meters_per_deg_at_latlon, move_from_latlon, CompassAxes, CompassDirection,
    NamedAxesTransformation,
};
use crate::projection::Projection;

/// Pixel frame shared by all layouts: rows grow south, columns grow east.
pub const PIXEL_AXES: CompassAxes = CompassAxes::SOUTH_EAST;

/// Half the Web Mercator world extent in meters.
pub const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Fraction of a tile used for the finite differences behind
/// [`Layout::pixels_per_meter_at_latlon`].
const TILE_DELTA: f64 = 0.1;

/// An immutable tile pyramid description. Created once per source and
/// shared read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    projection: Projection,
    tile_edge_px: u32,
    tile_edge_crs: f64,
    origin_crs: Vector2<f64>,
    size_crs: Vector2<f64>,
    tile_axes: CompassAxes,
    crs_to_tile_axes: NamedAxesTransformation,
    tile_to_pixel_axes: NamedAxesTransformation,
    /// CRS-frame offset placing the tile-frame origin on the correct box
    /// corner when a tile axis runs against its CRS axis.
    crs_bias: Vector2<f64>,
    /// Per pixel axis: 1.0 where the tile axis runs against the pixel axis.
    pixel_flip: Vector2<f64>,
}

impl Layout {
    /// Build a layout.
    ///
    /// `origin_crs` is the lower corner of the tile-aligned bounding box in
    /// CRS coordinates; `size_crs` its extent, defaulting to one zoom-0
    /// tile edge on both axes.
    ///
    /// # Errors
    /// Fails with [`TileError::InvalidLayout`] on a zero pixel edge or a
    /// non-positive CRS edge, and with [`TileError::IncompatibleAxes`] if
    /// the tile axes are no rotation of the CRS axes.
    pub fn new(
        projection: Projection,
        tile_edge_px: u32,
        tile_edge_crs: f64,
        origin_crs: Vector2<f64>,
        size_crs: Option<Vector2<f64>>,
        tile_axes: CompassAxes,
    ) -> Result<Self> {
        if tile_edge_px == 0 {
            return Err(TileError::InvalidLayout(
                "tile edge must be at least one pixel".into(),
            ));
        }
        if !(tile_edge_crs.is_finite() && tile_edge_crs > 0.0) {
            return Err(TileError::InvalidLayout(format!(
                "tile edge in CRS units must be positive and finite, got {tile_edge_crs}"
            )));
        }
        let size_crs = size_crs.unwrap_or_else(|| Vector2::repeat(tile_edge_crs));
        if size_crs.x <= 0.0 || size_crs.y <= 0.0 {
            return Err(TileError::InvalidLayout(format!(
                "bounding box size must be positive, got {size_crs:?}"
            )));
        }

        let crs_to_tile_axes = NamedAxesTransformation::new(projection.axes(), tile_axes)?;
        let tile_to_pixel_axes = NamedAxesTransformation::new(tile_axes, PIXEL_AXES)?;

        let crs_matrix = crs_to_tile_axes.rotation().matrix();
        let mut crs_bias = Vector2::zeros();
        for j in 0..2 {
            if (0..2).any(|i| crs_matrix[(i, j)] == -1.0) {
                crs_bias[j] = size_crs[j];
            }
        }

        let pixel_matrix = tile_to_pixel_axes.rotation().matrix();
        let mut pixel_flip = Vector2::zeros();
        for i in 0..2 {
            if (0..2).any(|j| pixel_matrix[(i, j)] == -1.0) {
                pixel_flip[i] = 1.0;
            }
        }

        Ok(Self {
            projection,
            tile_edge_px,
            tile_edge_crs,
            origin_crs,
            size_crs,
            tile_axes,
            crs_to_tile_axes,
            tile_to_pixel_axes,
            crs_bias,
            pixel_flip,
        })
    }

    /// The standard XYZ (slippy map) layout: EPSG:3857, 256 px tiles,
    /// x east, y south.
    ///
    /// # Errors
    /// Fails if the bundled EPSG:3857 definition does not parse.
    pub fn xyz() -> Result<Self> {
        Self::xyz_with_edge(256)
    }

    /// XYZ layout with a custom tile edge length.
    ///
    /// # Errors
    /// Fails if the bundled EPSG:3857 definition does not parse.
    pub fn xyz_with_edge(tile_edge_px: u32) -> Result<Self> {
        Self::new(
            Projection::epsg3857()?,
            tile_edge_px,
            2.0 * WEB_MERCATOR_HALF_EXTENT,
            Vector2::new(-WEB_MERCATOR_HALF_EXTENT, -WEB_MERCATOR_HALF_EXTENT),
            None,
            CompassAxes::EAST_SOUTH,
        )
    }

    /// The TMS layout: like XYZ but with y growing north.
    ///
    /// # Errors
    /// Fails if the bundled EPSG:3857 definition does not parse.
    pub fn tms() -> Result<Self> {
        Self::new(
            Projection::epsg3857()?,
            256,
            2.0 * WEB_MERCATOR_HALF_EXTENT,
            Vector2::new(-WEB_MERCATOR_HALF_EXTENT, -WEB_MERCATOR_HALF_EXTENT),
            None,
            CompassAxes::EAST_NORTH,
        )
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[must_use]
    pub fn tile_edge_px(&self) -> u32 {
        self.tile_edge_px
    }

    #[must_use]
    pub fn tile_edge_crs(&self) -> f64 {
        self.tile_edge_crs
    }

    #[must_use]
    pub fn origin_crs(&self) -> Vector2<f64> {
        self.origin_crs
    }

    #[must_use]
    pub fn size_crs(&self) -> Vector2<f64> {
        self.size_crs
    }

    #[must_use]
    pub fn tile_axes(&self) -> CompassAxes {
        self.tile_axes
    }

    /// Tiles per CRS unit at `zoom`.
    #[must_use]
    fn scale(&self, zoom: u32) -> f64 {
        f64::from(1u32 << zoom.min(31)) / self.tile_edge_crs
    }

    /// World pixel extent at `zoom`.
    fn pixel_extent(&self, zoom: u32) -> f64 {
        f64::from(1u32 << zoom.min(31)) * f64::from(self.tile_edge_px)
    }

    /// CRS coordinates to continuous tile coordinates at `zoom`.
    #[must_use]
    pub fn crs_to_tile(&self, coords_crs: &Vector2<f64>, zoom: u32) -> Vector2<f64> {
        let centered = coords_crs - self.origin_crs - self.crs_bias;
        self.crs_to_tile_axes.transform(&centered) * self.scale(zoom)
    }

    /// Continuous tile coordinates to CRS coordinates at `zoom`.
    #[must_use]
    pub fn tile_to_crs(&self, coords_tile: &Vector2<f64>, zoom: u32) -> Vector2<f64> {
        self.crs_to_tile_axes
            .transform_inverse(&(coords_tile / self.scale(zoom)))
            + self.origin_crs
            + self.crs_bias
    }

    /// Continuous tile coordinates to world pixels (row, column) at `zoom`.
    #[must_use]
    pub fn tile_to_pixel(&self, coords_tile: &Vector2<f64>, zoom: u32) -> Vector2<f64> {
        self.tile_to_pixel_axes
            .transform(&(coords_tile * f64::from(self.tile_edge_px)))
            + self.pixel_flip * self.pixel_extent(zoom)
    }

    /// World pixels (row, column) to continuous tile coordinates at `zoom`.
    #[must_use]
    pub fn pixel_to_tile(&self, coords_pixel: &Vector2<f64>, zoom: u32) -> Vector2<f64> {
        self.tile_to_pixel_axes
            .transform_inverse(&(coords_pixel - self.pixel_flip * self.pixel_extent(zoom)))
            / f64::from(self.tile_edge_px)
    }

    /// `(lat, lon)` degrees to CRS coordinates.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn epsg4326_to_crs(&self, latlon: &Vector2<f64>) -> Result<Vector2<f64>> {
        self.projection.forward(latlon)
    }

    /// CRS coordinates to `(lat, lon)` degrees.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn crs_to_epsg4326(&self, coords_crs: &Vector2<f64>) -> Result<Vector2<f64>> {
        self.projection.inverse(coords_crs)
    }

    /// `(lat, lon)` degrees to continuous tile coordinates at `zoom`.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn epsg4326_to_tile(&self, latlon: &Vector2<f64>, zoom: u32) -> Result<Vector2<f64>> {
        Ok(self.crs_to_tile(&self.epsg4326_to_crs(latlon)?, zoom))
    }

    /// Continuous tile coordinates at `zoom` to `(lat, lon)` degrees.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn tile_to_epsg4326(&self, coords_tile: &Vector2<f64>, zoom: u32) -> Result<Vector2<f64>> {
        self.crs_to_epsg4326(&self.tile_to_crs(coords_tile, zoom))
    }

    /// `(lat, lon)` degrees to world pixels at `zoom`.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn epsg4326_to_pixel(&self, latlon: &Vector2<f64>, zoom: u32) -> Result<Vector2<f64>> {
        Ok(self.tile_to_pixel(&self.epsg4326_to_tile(latlon, zoom)?, zoom))
    }

    /// World pixels at `zoom` to `(lat, lon)` degrees.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn pixel_to_epsg4326(&self, coords_pixel: &Vector2<f64>, zoom: u32) -> Result<Vector2<f64>> {
        self.tile_to_epsg4326(&self.pixel_to_tile(coords_pixel, zoom), zoom)
    }

    /// Native resolution at `latlon` and `zoom`, per pixel axis, from a
    /// fractional finite difference around the containing tile coordinate.
    ///
    /// # Errors
    /// Propagates projection failures.
    pub fn pixels_per_meter_at_latlon(
        &self,
        latlon: &Vector2<f64>,
        zoom: u32,
    ) -> Result<Vector2<f64>> {
        let center_tile = self.epsg4326_to_tile(latlon, zoom)?;
        let meters_per_deg = meters_per_deg_at_latlon(latlon);

        let mut pixels_per_meter_tile = Vector2::zeros();
        for axis in 0..2 {
            let mut delta = Vector2::zeros();
            delta[axis] = TILE_DELTA / 2.0;
            let ahead = self.tile_to_epsg4326(&(center_tile + delta), zoom)?;
            let behind = self.tile_to_epsg4326(&(center_tile - delta), zoom)?;
            let deg_per_tile = (ahead - behind).abs() / TILE_DELTA;
            let meters_per_tile = deg_per_tile.component_mul(&meters_per_deg).norm();
            pixels_per_meter_tile[axis] = f64::from(self.tile_edge_px) / meters_per_tile;
        }

        Ok(self
            .tile_to_pixel_axes
            .transform(&pixels_per_meter_tile)
            .abs())
    }

    /// Angle between grid north and true north at `latlon`, radians,
    /// counterclockwise positive in the CRS frame.
    ///
    /// # Errors
    /// Propagates projection failures; fails with [`TileError::InvalidAxis`]
    /// if the CRS has no northward axis.
    pub fn meridian_convergence(&self, latlon: &Vector2<f64>) -> Result<f64> {
        let grid_north = self.projection.axes().get_vector(CompassDirection::North)?;
        let here = self.epsg4326_to_crs(latlon)?;
        let north_of_here = self.epsg4326_to_crs(&move_from_latlon(latlon, 0.0, 1.0))?;
        let toward_true_north = north_of_here - here;
        Ok(angle_between(&grid_north, &toward_true_north))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xyz_pixel_roundtrip() {
        let layout = Layout::xyz().unwrap();
        let tile = Vector2::new(519_997.0, 383_334.0);
        let zoom = 20;
        let back = layout.pixel_to_tile(&layout.tile_to_pixel(&tile, zoom), zoom);
        assert!((back - tile).abs().max() < 1e-6, "drift: {:?}", back - tile);
    }

    #[test]
    fn test_xyz_crs_roundtrip() {
        let layout = Layout::xyz().unwrap();
        let tile = Vector2::new(519_997.0, 383_334.0);
        let zoom = 20;
        let back = layout.crs_to_tile(&layout.tile_to_crs(&tile, zoom), zoom);
        assert!((back - tile).abs().max() < 1e-6, "drift: {:?}", back - tile);
    }

    #[test]
    fn test_xyz_zoom0_corners() {
        let layout = Layout::xyz().unwrap();
        // Tile (0, 0) sits at the north-west corner of the mercator square.
        let nw = layout.tile_to_crs(&Vector2::new(0.0, 0.0), 0);
        assert!((nw.x - (-WEB_MERCATOR_HALF_EXTENT)).abs() < 1e-6);
        assert!((nw.y - WEB_MERCATOR_HALF_EXTENT).abs() < 1e-6);
        let se = layout.tile_to_crs(&Vector2::new(1.0, 1.0), 0);
        assert!((se.x - WEB_MERCATOR_HALF_EXTENT).abs() < 1e-6);
        assert!((se.y - (-WEB_MERCATOR_HALF_EXTENT)).abs() < 1e-6);
    }

    #[test]
    fn test_xyz_pixel_origin_is_north_west() {
        let layout = Layout::xyz().unwrap();
        let px = layout.tile_to_pixel(&Vector2::new(0.0, 0.0), 2);
        assert!(px.norm() < 1e-9);
        let far = layout.tile_to_pixel(&Vector2::new(4.0, 4.0), 2);
        assert!((far - Vector2::new(1024.0, 1024.0)).norm() < 1e-9);
    }

    #[test]
    fn test_tms_flips_rows() {
        let xyz = Layout::xyz().unwrap();
        let tms = Layout::tms().unwrap();
        let zoom = 1;
        // The same CRS point lands on complementary y tiles.
        let point = xyz.tile_to_crs(&Vector2::new(0.5, 0.5), zoom);
        let xyz_tile = xyz.crs_to_tile(&point, zoom);
        let tms_tile = tms.crs_to_tile(&point, zoom);
        assert!((xyz_tile.x - tms_tile.x).abs() < 1e-9);
        assert!((tms_tile.y - (2.0 - xyz_tile.y)).abs() < 1e-9);
        // And TMS pixel rows still start at the north-west corner.
        let top = tms.tile_to_pixel(&Vector2::new(0.0, 2.0), zoom);
        assert!(top.norm() < 1e-9);
    }

    #[test]
    fn test_latlon_tile_roundtrip() {
        let layout = Layout::xyz().unwrap();
        let latlon = Vector2::new(48.8566, 2.3522);
        let zoom = 15;
        let tile = layout.epsg4326_to_tile(&latlon, zoom).unwrap();
        let back = layout.tile_to_epsg4326(&tile, zoom).unwrap();
        assert!((back - latlon).norm() < 1e-6);
    }

    #[test]
    fn test_greenwich_equator_tile_center() {
        let layout = Layout::xyz().unwrap();
        let tile = layout
            .epsg4326_to_tile(&Vector2::new(0.0, 0.0), 1)
            .unwrap();
        assert!((tile - Vector2::new(1.0, 1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_pixels_per_meter_at_equator() {
        let layout = Layout::xyz().unwrap();
        let zoom = 10;
        let ppm = layout
            .pixels_per_meter_at_latlon(&Vector2::new(0.0, 0.0), zoom)
            .unwrap();
        let expected = 256.0 * 1024.0 / (2.0 * WEB_MERCATOR_HALF_EXTENT);
        assert!((ppm.x - expected).abs() / expected < 0.01, "got {ppm:?}");
        assert!((ppm.y - expected).abs() / expected < 0.01, "got {ppm:?}");
    }

    #[test]
    fn test_pixels_per_meter_grows_with_zoom_and_latitude() {
        let layout = Layout::xyz().unwrap();
        let latlon = Vector2::new(60.0, 10.0);
        let z10 = layout.pixels_per_meter_at_latlon(&latlon, 10).unwrap();
        let z11 = layout.pixels_per_meter_at_latlon(&latlon, 11).unwrap();
        assert!((z11.x / z10.x - 2.0).abs() < 0.01);
        // Mercator stretches toward the poles, so ground resolution at 60N
        // is about half the equatorial CRS resolution.
        let equator = layout
            .pixels_per_meter_at_latlon(&Vector2::new(0.0, 10.0), 10)
            .unwrap();
        let ratio = z10.x / equator.x;
        assert!((ratio - 2.0).abs() < 0.05, "got {ratio}");
    }

    #[test]
    fn test_meridian_convergence_vanishes_on_mercator() {
        let layout = Layout::xyz().unwrap();
        for latlon in [
            Vector2::new(0.0, 0.0),
            Vector2::new(48.8566, 2.3522),
            Vector2::new(-45.0, 170.0),
        ] {
            let angle = layout.meridian_convergence(&latlon).unwrap();
            assert!(angle.abs() < 1e-6, "convergence {angle} at {latlon:?}");
        }
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let projection = Projection::epsg3857().unwrap();
        assert!(matches!(
            Layout::new(
                projection.clone(),
                0,
                1.0,
                Vector2::zeros(),
                None,
                CompassAxes::EAST_SOUTH,
            ),
            Err(TileError::InvalidLayout(_))
        ));
        assert!(matches!(
            Layout::new(
                projection,
                256,
                -5.0,
                Vector2::zeros(),
                None,
                CompassAxes::EAST_SOUTH,
            ),
            Err(TileError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_layout_equality_is_structural() {
        let a = Layout::xyz().unwrap();
        let b = Layout::xyz().unwrap();
        let c = Layout::tms().unwrap();
        let d = Layout::xyz_with_edge(512).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
