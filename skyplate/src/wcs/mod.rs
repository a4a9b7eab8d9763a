//! World Coordinate System (WCS) solution for a solved photo.
//!
//! # Model
//!
//! Gnomonic (TAN) projection with optional SIP distortion:
//!
//! 1. Pixel offset: `(u, v) = (x - CRPIX1, y - CRPIX2)`
//! 2. SIP forward: `(u', v') = (u + A(u, v), v + B(u, v))`
//! 3. Intermediate: `(ξ, η) = CD × (u', v')` in degrees
//! 4. De-project from the tangent plane at CRVAL
//!
//! Pixels are 0-based with y growing downward (row index). FITS headers use
//! 1-based CRPIX; [`Wcs::from_fits_header`] converts.

mod fits_header;
mod sip;

#[cfg(test)]
mod tests;

use std::fmt;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use fits_header::FitsHeader;
pub use sip::{Sip, SipPolynomial};

/// Below this the tangent-plane denominator means "on or behind the plane".
const TANGENT_PLANE_EPS: f64 = 1e-12;
const SINGULAR_DET_EPS: f64 = 1e-20;

/// Equatorial coordinate in degrees. RA in [0, 360), Dec in [-90, 90].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

impl SkyCoord {
    pub const fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    pub fn is_finite(&self) -> bool {
        self.ra.is_finite() && self.dec.is_finite()
    }
}

impl fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(RA {:.5}, Dec {:.5})", self.ra, self.dec)
    }
}

/// Bidirectional pixel ↔ sky mapping for one image.
///
/// Implementations are immutable; repeated calls with the same input return
/// bit-identical results. A non-finite result marks a projection singularity.
pub trait CoordinateSolution {
    fn pixel_to_sky(&self, pixel: DVec2) -> SkyCoord;

    fn sky_to_pixel(&self, sky: SkyCoord) -> DVec2;
}

/// Wraps RA into [0, 360).
pub fn normalize_ra(ra: f64) -> f64 {
    let wrapped = ra.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// TAN (+SIP) coordinate solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel, 0-based.
    pub crpix: DVec2,
    /// Reference sky coordinate (tangent point).
    pub crval: SkyCoord,
    /// Pixel offset → intermediate degrees, `[[CD1_1, CD1_2], [CD2_1, CD2_2]]`.
    pub cd: [[f64; 2]; 2],
    cd_inv: [[f64; 2]; 2],
    pub sip: Option<Sip>,
    /// Dimensions recorded with the solution, when the header has them.
    pub image_size: Option<(u32, u32)>,
}

impl Wcs {
    pub fn new(crpix: DVec2, crval: SkyCoord, cd: [[f64; 2]; 2]) -> Result<Self> {
        let cd_inv = invert_2x2(cd).ok_or_else(|| {
            Error::InvalidWcs(format!("CD matrix is singular: {cd:?}"))
        })?;
        if !crpix.is_finite() || !crval.is_finite() {
            return Err(Error::InvalidWcs(format!(
                "non-finite reference point: CRPIX {crpix:?}, CRVAL {crval}"
            )));
        }
        Ok(Self {
            crpix,
            crval: SkyCoord::new(normalize_ra(crval.ra), crval.dec),
            cd,
            cd_inv,
            sip: None,
            image_size: None,
        })
    }

    /// Solution from pixel scale (arcsec/px) and position angle (degrees, north
    /// through east). `mirrored` flips the x axis.
    pub fn from_scale_rotation(
        crpix: DVec2,
        crval: SkyCoord,
        pixel_scale: f64,
        rotation: f64,
        mirrored: bool,
    ) -> Result<Self> {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();
        let sign = if mirrored { -1.0 } else { 1.0 };

        let cd = [
            [sign * scale_deg * cos_r, -scale_deg * sin_r],
            [sign * scale_deg * sin_r, scale_deg * cos_r],
        ];
        Self::new(crpix, crval, cd)
    }

    pub fn with_sip(mut self, sip: Sip) -> Self {
        self.sip = Some(sip);
        self
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    /// Parses the FITS header written by the solver (`wcs.fits`).
    pub fn from_fits_header(bytes: &[u8]) -> Result<Self> {
        let header = FitsHeader::parse(bytes)?;

        for (key, expected) in [("CTYPE1", "RA---TAN"), ("CTYPE2", "DEC--TAN")] {
            if let Some(ctype) = header.string(key) {
                if !ctype.trim().starts_with(expected) {
                    return Err(Error::InvalidWcs(format!(
                        "unsupported projection {key} = '{ctype}'"
                    )));
                }
            }
        }

        let crpix = DVec2::new(
            header.require_float("CRPIX1")? - 1.0,
            header.require_float("CRPIX2")? - 1.0,
        );
        let crval = SkyCoord::new(
            header.require_float("CRVAL1")?,
            header.require_float("CRVAL2")?,
        );
        let cd = read_cd_matrix(&header)?;

        let mut wcs = Self::new(crpix, crval, cd)?;
        wcs.sip = read_sip(&header)?;

        let width = header.int("IMAGEW").or_else(|| header.int("NAXIS1"));
        let height = header.int("IMAGEH").or_else(|| header.int("NAXIS2"));
        if let (Some(w), Some(h)) = (width, height) {
            if w > 0 && h > 0 {
                wcs.image_size = Some((w as u32, h as u32));
            }
        }

        tracing::debug!(
            "Parsed WCS: CRVAL {}, scale {:.3}\"/px, rotation {:.2}°, SIP {}",
            wcs.crval,
            wcs.pixel_scale_arcsec(),
            wcs.rotation_degrees(),
            wcs.sip.is_some()
        );
        Ok(wcs)
    }

    /// Average of the x and y scales, arcsec/px.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        ((scale_x + scale_y) / 2.0) * 3600.0
    }

    /// Position angle of the +y axis, degrees north through east. Read from the
    /// y column of CD, so parity does not change it.
    pub fn rotation_degrees(&self) -> f64 {
        // 0.0 - x keeps a zero term positive so an unrotated frame reads 0, not -0
        (0.0 - self.cd[0][1]).atan2(self.cd[1][1]).to_degrees()
    }

    pub fn is_mirrored(&self) -> bool {
        determinant(self.cd) < 0.0
    }

    /// Sky coordinates of the frame corners for a `width × height` image:
    /// top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self, width: u32, height: u32) -> [SkyCoord; 4] {
        image_corners(width, height).map(|p| self.pixel_to_sky(p))
    }

    pub fn center(&self, width: u32, height: u32) -> SkyCoord {
        self.pixel_to_sky(DVec2::new(width as f64 / 2.0, height as f64 / 2.0))
    }

    /// Intermediate (ξ, η) in degrees → pixel, ignoring the tangent-plane check.
    fn intermediate_to_pixel(&self, xi_eta: DVec2) -> DVec2 {
        let corrected = mat_mul(self.cd_inv, xi_eta);
        let offset = match &self.sip {
            Some(sip) => sip.inverse(corrected),
            None => corrected,
        };
        self.crpix + offset
    }
}

impl CoordinateSolution for Wcs {
    fn pixel_to_sky(&self, pixel: DVec2) -> SkyCoord {
        let offset = pixel - self.crpix;
        let corrected = match &self.sip {
            Some(sip) => sip.forward(offset),
            None => offset,
        };
        let intermediate = mat_mul(self.cd, corrected);
        deproject(self.crval, intermediate)
    }

    fn sky_to_pixel(&self, sky: SkyCoord) -> DVec2 {
        match project(self.crval, sky) {
            Some(xi_eta) => self.intermediate_to_pixel(xi_eta),
            None => DVec2::NAN,
        }
    }
}

/// Gnomonic projection about `center`; intermediate coordinates in degrees.
/// `None` when `sky` is on or behind the tangent plane.
pub fn project(center: SkyCoord, sky: SkyCoord) -> Option<DVec2> {
    let (sin_dec, cos_dec) = sky.dec.to_radians().sin_cos();
    let (sin_dec0, cos_dec0) = center.dec.to_radians().sin_cos();
    let (sin_dra, cos_dra) = (sky.ra - center.ra).to_radians().sin_cos();

    let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
    if d.is_nan() || d <= TANGENT_PLANE_EPS {
        return None;
    }

    let xi = cos_dec * sin_dra / d;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d;
    Some(DVec2::new(xi.to_degrees(), eta.to_degrees()))
}

/// Inverse gnomonic projection about `center`.
pub fn deproject(center: SkyCoord, xi_eta: DVec2) -> SkyCoord {
    let xi = xi_eta.x.to_radians();
    let eta = xi_eta.y.to_radians();
    let ra0 = center.ra.to_radians();
    let (sin_dec0, cos_dec0) = center.dec.to_radians().sin_cos();

    let denom = cos_dec0 - eta * sin_dec0;
    let ra = ra0 + xi.atan2(denom);
    let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

    SkyCoord::new(normalize_ra(ra.to_degrees()), dec.to_degrees())
}

/// Pixel-edge corners of a frame: top-left, top-right, bottom-right, bottom-left.
pub fn image_corners(width: u32, height: u32) -> [DVec2; 4] {
    let (w, h) = (width as f64, height as f64);
    [
        DVec2::new(0.0, 0.0),
        DVec2::new(w, 0.0),
        DVec2::new(w, h),
        DVec2::new(0.0, h),
    ]
}

/// A solved 256×192 TAN header around Orion's belt, 240"/px, north up.
#[cfg(test)]
pub(crate) fn sample_fits_header() -> Vec<u8> {
    fits_header::build_header(&[
        ("SIMPLE", "T"),
        ("NAXIS", "0"),
        ("CTYPE1", "'RA---TAN'"),
        ("CTYPE2", "'DEC--TAN'"),
        ("CRPIX1", "128.5"),
        ("CRPIX2", "96.5"),
        ("CRVAL1", "83.8"),
        ("CRVAL2", "-1.2"),
        ("CD1_1", "-6.6666667E-02"),
        ("CD1_2", "0.0"),
        ("CD2_1", "0.0"),
        ("CD2_2", "-6.6666667E-02"),
        ("IMAGEW", "256"),
        ("IMAGEH", "192"),
    ])
}

fn determinant(m: [[f64; 2]; 2]) -> f64 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

fn invert_2x2(m: [[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = determinant(m);
    if !det.is_finite() || det.abs() < SINGULAR_DET_EPS {
        return None;
    }
    Some([
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ])
}

#[inline]
fn mat_mul(m: [[f64; 2]; 2], v: DVec2) -> DVec2 {
    DVec2::new(
        m[0][0] * v.x + m[0][1] * v.y,
        m[1][0] * v.x + m[1][1] * v.y,
    )
}

fn read_cd_matrix(header: &FitsHeader) -> Result<[[f64; 2]; 2]> {
    let keys = ["CD1_1", "CD1_2", "CD2_1", "CD2_2"];
    if keys.iter().any(|k| header.contains(k)) {
        let get = |k: &str| header.float(k).unwrap_or(0.0);
        return Ok([
            [get("CD1_1"), get("CD1_2")],
            [get("CD2_1"), get("CD2_2")],
        ]);
    }

    let cdelt1 = header.require_float("CDELT1")?;
    let cdelt2 = header.require_float("CDELT2")?;
    let (sin_r, cos_r) = header.float("CROTA2").unwrap_or(0.0).to_radians().sin_cos();
    Ok([
        [cdelt1 * cos_r, -cdelt2 * sin_r],
        [cdelt1 * sin_r, cdelt2 * cos_r],
    ])
}

fn read_sip(header: &FitsHeader) -> Result<Option<Sip>> {
    let Some(a) = read_sip_polynomial(header, "A")? else {
        return Ok(None);
    };
    let b = read_sip_polynomial(header, "B")?
        .ok_or_else(|| Error::InvalidWcs("A_ORDER present without B_ORDER".into()))?;
    let ap = read_sip_polynomial(header, "AP")?;
    let bp = read_sip_polynomial(header, "BP")?;

    Ok(Some(Sip { a, b, ap, bp }))
}

fn read_sip_polynomial(header: &FitsHeader, prefix: &str) -> Result<Option<SipPolynomial>> {
    let Some(order) = header.int(&format!("{prefix}_ORDER")) else {
        return Ok(None);
    };
    if !(0..=9).contains(&order) {
        return Err(Error::InvalidWcs(format!("{prefix}_ORDER = {order} out of range")));
    }
    let order = order as usize;

    let mut poly = SipPolynomial::new(order);
    for p in 0..=order {
        for q in 0..=(order - p) {
            if let Some(coeff) = header.float(&format!("{prefix}_{p}_{q}")) {
                poly.push(p, q, coeff);
            }
        }
    }
    Ok(Some(poly))
}
