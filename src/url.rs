//! URL and path template expansion for tile requests.
//!
//! Templates carry `{token}` placeholders drawn from a fixed vocabulary;
//! every token is resolved against the layout for one `(tile, zoom)` pair.
//! Unknown placeholders are left untouched so server-side template syntax
//! survives expansion.

use nalgebra::Vector2;

use crate::layout::Layout;
use crate::tile::TileKey;

/// Order the two corner vectors so that `lower <= upper` per component.
fn sort_corners(a: Vector2<f64>, b: Vector2<f64>) -> (Vector2<f64>, Vector2<f64>) {
    (a.inf(&b), a.sup(&b))
}

/// Bing Maps quadkey for a tile: one base-4 digit per zoom level.
#[must_use]
pub fn quadkey(key: TileKey) -> String {
    let mut quad = String::with_capacity(key.zoom as usize);
    for bit in (1..=key.zoom).rev() {
        let mask = 1u32 << (bit - 1);
        let mut digit = 0u8;
        if key.x & mask != 0 {
            digit += 1;
        }
        if key.y & mask != 0 {
            digit += 2;
        }
        quad.push(char::from(b'0' + digit));
    }
    quad
}

/// Decode a quadkey back into a tile key.
///
/// Returns `None` when the string contains a non-quadkey digit.
#[must_use]
pub fn parse_quadkey(quad: &str) -> Option<TileKey> {
    let mut x = 0u32;
    let mut y = 0u32;
    for c in quad.chars() {
        let digit = c.to_digit(4)?;
        x = (x << 1) | (digit & 1);
        y = (y << 1) | (digit >> 1);
    }
    Some(TileKey::new(x, y, quad.len() as u32))
}

fn float(value: f64) -> String {
    format!("{value:.6}")
}

/// Expand every recognized `{token}` in `template` for one tile.
#[must_use]
pub fn expand_template(template: &str, layout: &Layout, key: TileKey) -> String {
    let tile = Vector2::new(f64::from(key.x), f64::from(key.y));
    let zoom = key.zoom;
    let next = tile + Vector2::new(1.0, 1.0);
    let center = tile + Vector2::new(0.5, 0.5);

    let (crs_lower, crs_upper) = sort_corners(
        layout.tile_to_crs(&tile, zoom),
        layout.tile_to_crs(&next, zoom),
    );
    let crs_center = layout.tile_to_crs(&center, zoom);
    let crs_size = crs_upper - crs_lower;

    let (px_lower, px_upper) = sort_corners(
        layout.tile_to_pixel(&tile, zoom),
        layout.tile_to_pixel(&next, zoom),
    );
    let px_center = layout.tile_to_pixel(&center, zoom);
    let px_size = layout.tile_edge_px();

    // Geographic corners are best-effort: a tile outside the projection's
    // domain keeps its latlon tokens unexpanded.
    let latlon_corners = layout
        .tile_to_epsg4326(&tile, zoom)
        .and_then(|a| Ok((a, layout.tile_to_epsg4326(&next, zoom)?)))
        .ok()
        .map(|(a, b)| sort_corners(a, b));
    let latlon_center = layout.tile_to_epsg4326(&center, zoom).ok();

    let crs_name = layout.projection().description().to_string();
    let bbox = format!(
        "{},{},{},{}",
        float(crs_lower.x),
        float(crs_lower.y),
        float(crs_upper.x),
        float(crs_upper.y)
    );

    let mut out = template.to_string();
    let mut replace = |token: &str, value: String| {
        let pattern = format!("{{{token}}}");
        if out.contains(&pattern) {
            out = out.replace(&pattern, &value);
        }
    };

    replace("crs_lower_x", float(crs_lower.x));
    replace("crs_lower_y", float(crs_lower.y));
    replace("crs_upper_x", float(crs_upper.x));
    replace("crs_upper_y", float(crs_upper.y));
    replace("crs_center_x", float(crs_center.x));
    replace("crs_center_y", float(crs_center.y));
    replace("crs_size_x", float(crs_size.x));
    replace("crs_size_y", float(crs_size.y));

    replace("px_lower_x", float(px_lower.x));
    replace("px_lower_y", float(px_lower.y));
    replace("px_upper_x", float(px_upper.x));
    replace("px_upper_y", float(px_upper.y));
    replace("px_center_x", float(px_center.x));
    replace("px_center_y", float(px_center.y));
    replace("px_size_x", px_size.to_string());
    replace("px_size_y", px_size.to_string());

    replace("tile_lower_x", key.x.to_string());
    replace("tile_lower_y", key.y.to_string());
    replace("tile_upper_x", (key.x + 1).to_string());
    replace("tile_upper_y", (key.y + 1).to_string());
    replace("tile_center_x", float(center.x));
    replace("tile_center_y", float(center.y));

    if let Some((latlon_lower, latlon_upper)) = latlon_corners {
        let latlon_size = latlon_upper - latlon_lower;
        replace("lat_lower", float(latlon_lower.x));
        replace("lon_lower", float(latlon_lower.y));
        replace("lat_upper", float(latlon_upper.x));
        replace("lon_upper", float(latlon_upper.y));
        replace("lat_size", float(latlon_size.x));
        replace("lon_size", float(latlon_size.y));
    }
    if let Some(latlon_center) = latlon_center {
        replace("lat_center", float(latlon_center.x));
        replace("lon_center", float(latlon_center.y));
    }

    replace("zoom", zoom.to_string());
    replace("quad", quadkey(key));
    replace("bbox", bbox);

    // Aliases.
    replace("x", key.x.to_string());
    replace("y", key.y.to_string());
    replace("z", zoom.to_string());
    replace("width", px_size.to_string());
    replace("height", px_size.to_string());
    replace("proj", crs_name.clone());
    replace("crs", crs_name);

    out
}
