//! Star field construction for the sky node.
//!
//! Builds a point-sprite mesh from the Yale Bright Star catalogue (the
//! `BSC5` binary companion file): equatorial coordinates become Cartesian
//! positions on a 5000-unit celestial sphere, scaled down by visual
//! magnitude, and each star is tinted through its Morgan–Keenan spectral
//! class via a temperature→RGB table loaded from `StarsColor.yaml`
//! (301 rows, 1000 K to 31 000 K in 100 K steps).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};
use serde::Deserialize;

use crate::error::Result;

/// Rows of the temperature→RGB table.
pub const MAX_RGB_TEMPERATURES: usize = 301;

/// Radius of the celestial sphere the stars are projected onto.
pub const STAR_SPHERE_RADIUS: f32 = 5000.0;

/// Observer coordinates baked into the star transform (Rome).
pub const OBSERVER_LATITUDE_RAD: f32 = 41.891_93_f32 * std::f32::consts::PI / 180.0;
pub const OBSERVER_LONGITUDE_RAD: f32 = 12.511_33_f32 * std::f32::consts::PI / 180.0;

/// Point-sprite vertex of the stars mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct StarVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// One star of the binary catalogue.
#[derive(Clone, Copy, Debug)]
pub struct CatalogueEntry {
    /// Right ascension, radians (J2000).
    pub right_ascension: f64,
    /// Declination, radians (J2000).
    pub declination: f64,
    /// Morgan–Keenan spectral type, e.g. `b"G2"`.
    pub spectral_type: [u8; 2],
    /// Visual magnitude × 100.
    pub magnitude: i16,
}

const HEADER_SIZE: usize = 28;
const ENTRY_SIZE: usize = 32;

/// Parses the little-endian BSC5 catalogue.
///
/// Header: four reserved i32 fields around a signed star count at byte 8
/// (negative means J2000 coordinates). Entries are 32 bytes each.
#[must_use]
pub fn parse_catalogue(bytes: &[u8]) -> Vec<CatalogueEntry> {
    if bytes.len() < HEADER_SIZE {
        return Vec::new();
    }
    let star_count =
        i32::from_le_bytes(bytes[8..12].try_into().expect("header slice")).unsigned_abs() as usize;
    let payload = &bytes[HEADER_SIZE..];
    let star_count = star_count.min(payload.len() / ENTRY_SIZE);

    let mut entries = Vec::with_capacity(star_count);
    for i in 0..star_count {
        let entry = &payload[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE];
        entries.push(CatalogueEntry {
            right_ascension: f64::from_le_bytes(entry[4..12].try_into().expect("entry slice")),
            declination: f64::from_le_bytes(entry[12..20].try_into().expect("entry slice")),
            spectral_type: [entry[20], entry[21]],
            magnitude: i16::from_le_bytes(entry[22..24].try_into().expect("entry slice")),
        });
    }
    entries
}

#[derive(Deserialize)]
struct StarColourDocument {
    colors: Vec<Vec<f32>>,
}

/// Loads the temperature→RGB table: each row is
/// `[kelvin, .., .., .., .., r, g, b]`, indexed by `kelvin / 100 − 10`.
pub fn parse_colour_table(yaml: &str) -> Result<Vec<Vec3>> {
    let document: StarColourDocument = serde_yaml::from_str(yaml)?;
    let mut table = vec![Vec3::ONE; MAX_RGB_TEMPERATURES];
    for row in &document.colors {
        if row.len() < 8 {
            continue;
        }
        let kelvin = row[0];
        let index = ((kelvin / 100.0) as i64 - 10).clamp(0, MAX_RGB_TEMPERATURES as i64 - 1);
        table[index as usize] = Vec3::new(row[5], row[6], row[7]);
    }
    Ok(table)
}

/// Spectral class + subtype → effective temperature in kelvin.
///
/// Subtype `'0'` is the hottest of a class, `'9'` the coolest.
#[must_use]
pub fn morgan_keenan_to_temperature(class: u8, subtype: u8) -> u32 {
    let (min, max) = match class {
        b'O' => (25_000.0, 50_000.0),
        b'B' => (10_000.0, 25_000.0),
        b'A' => (7_500.0, 10_000.0),
        b'F' => (6_000.0, 7_500.0),
        b'G' => (5_000.0, 6_000.0),
        b'K' => (3_500.0, 5_000.0),
        b'M' => (2_000.0, 3_500.0),
        _ => (5_000.0, 6_000.0),
    };
    let range_step = (max - min) / 9.0;
    let sub_index = f32::from(b'9'.saturating_sub(subtype.clamp(b'0', b'9')));
    (min + sub_index * range_step) as u32
}

/// Table lookup by temperature.
#[must_use]
pub fn temperature_to_colour(table: &[Vec3], temperature: u32) -> Vec3 {
    let index = (temperature as i64 / 100 - 10).clamp(0, table.len() as i64 - 1);
    table[index as usize]
}

/// Equatorial coordinates to a Cartesian direction (Y up).
#[must_use]
pub fn equatorial_to_cartesian(right_ascension: f32, declination: f32, radius: f32) -> Vec3 {
    Vec3::new(
        declination.cos() * right_ascension.cos(),
        declination.sin(),
        declination.cos() * right_ascension.sin(),
    ) * radius
}

/// Julian date for a UT time point.
#[must_use]
pub fn julian_date(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> f64 {
    let a = i64::from((14 - month as i32) / 12);
    let y = i64::from(year) + 4800 - a;
    let m = i64::from(month as i32) + 12 * a - 3;
    let jdn = i64::from(day) + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    jdn as f64 + (f64::from(hour) - 12.0) / 24.0 + f64::from(minute) / 1440.0
        + f64::from(second) / 86400.0
}

/// Orientation of the star field for an observer.
///
/// Combines earth rotation (local mean sidereal time plus latitude) with
/// the precession of the equinoxes; the sky node translates the result to
/// the camera position each frame.
#[must_use]
pub fn star_field_transform(latitude_rad: f32, longitude_rad: f32, julian: f64) -> Mat4 {
    let local_mean_sidereal_time = 4.894_961 + 230_121.675_315 * julian + f64::from(longitude_rad);

    let backward = Vec3::NEG_Z;
    let up = Vec3::Y;
    let right = Vec3::X;

    let rotation = Quat::from_axis_angle(backward, -(local_mean_sidereal_time as f32))
        * Quat::from_axis_angle(up, latitude_rad - std::f32::consts::FRAC_PI_2);

    let precession_z = Quat::from_axis_angle(backward, 0.011_18);
    let precession = (precession_z * Quat::from_axis_angle(right, -0.009_72)) * precession_z;

    Mat4::from_quat(rotation * precession)
}

/// Builds the star vertices from the catalogue and colour table.
#[must_use]
pub fn build_star_vertices(catalogue: &[CatalogueEntry], colours: &[Vec3]) -> Vec<StarVertex> {
    catalogue
        .iter()
        .map(|entry| {
            let mut position = equatorial_to_cartesian(
                entry.right_ascension as f32,
                entry.declination as f32,
                1.0,
            );
            // Brighter stars (lower magnitude) sit closer to the sphere.
            position /= (f32::from(entry.magnitude) / 100.0) + 0.4;
            position *= STAR_SPHERE_RADIUS;

            let temperature =
                morgan_keenan_to_temperature(entry.spectral_type[0], entry.spectral_type[1]);
            let colour = temperature_to_colour(colours, temperature);

            StarVertex {
                position: position.to_array(),
                color: Vec4::new(colour.x, colour.y, colour.z, 1.0).to_array(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_catalogue(stars: &[(f64, f64, [u8; 2], i16)]) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[8..12].copy_from_slice(&(-(stars.len() as i32)).to_le_bytes());
        for (ra, dec, spectral, magnitude) in stars {
            let mut entry = [0u8; ENTRY_SIZE];
            entry[4..12].copy_from_slice(&ra.to_le_bytes());
            entry[12..20].copy_from_slice(&dec.to_le_bytes());
            entry[20] = spectral[0];
            entry[21] = spectral[1];
            entry[22..24].copy_from_slice(&magnitude.to_le_bytes());
            bytes.extend_from_slice(&entry);
        }
        bytes
    }

    #[test]
    fn catalogue_parses_entries_and_signed_count() {
        let bytes = synthetic_catalogue(&[(1.5, -0.5, *b"G2", 250), (0.0, 0.7, *b"B5", -50)]);
        let entries = parse_catalogue(&bytes);
        assert_eq!(entries.len(), 2);
        assert!((entries[0].right_ascension - 1.5).abs() < 1e-12);
        assert_eq!(entries[0].spectral_type, *b"G2");
        assert_eq!(entries[1].magnitude, -50);
    }

    #[test]
    fn truncated_catalogue_is_empty() {
        assert!(parse_catalogue(&[0u8; 10]).is_empty());
    }

    #[test]
    fn spectral_subtype_zero_is_hottest() {
        let hot = morgan_keenan_to_temperature(b'G', b'0');
        let cool = morgan_keenan_to_temperature(b'G', b'9');
        assert!(hot > cool);
        assert_eq!(cool, 5_000);
        assert_eq!(hot, 6_000);
    }

    #[test]
    fn colour_table_indexes_by_hundred_kelvin() {
        let yaml = "colors:\n  - [1000, 0, 0, 0, 0, 1.0, 0.8, 0.6]\n  - [5800, 0, 0, 0, 0, 1.0, 1.0, 0.9]\n";
        let table = parse_colour_table(yaml).unwrap();
        assert_eq!(table[0], Vec3::new(1.0, 0.8, 0.6));
        assert_eq!(table[48], Vec3::new(1.0, 1.0, 0.9));
        assert_eq!(
            temperature_to_colour(&table, 5_800),
            Vec3::new(1.0, 1.0, 0.9)
        );
    }

    #[test]
    fn julian_date_epoch() {
        // J2000.0 reference epoch.
        let julian = julian_date(2000, 1, 1, 12, 0, 0);
        assert!((julian - 2_451_545.0).abs() < 1e-9);
    }

    #[test]
    fn star_vertices_scale_with_magnitude() {
        let catalogue = [
            CatalogueEntry {
                right_ascension: 0.0,
                declination: 0.0,
                spectral_type: *b"A0",
                magnitude: 100,
            },
            CatalogueEntry {
                right_ascension: 0.0,
                declination: 0.0,
                spectral_type: *b"A0",
                magnitude: 600,
            },
        ];
        let colours = vec![Vec3::ONE; MAX_RGB_TEMPERATURES];
        let vertices = build_star_vertices(&catalogue, &colours);
        let bright = Vec3::from_array(vertices[0].position).length();
        let dim = Vec3::from_array(vertices[1].position).length();
        assert!(bright > dim);
    }
}
