use glam::DVec2;

use super::fits_header::build_header;
use super::*;

fn simple_wcs() -> Wcs {
    Wcs::from_scale_rotation(
        DVec2::new(512.0, 384.0),
        SkyCoord::new(83.8, -5.4),
        30.0,
        0.0,
        false,
    )
    .unwrap()
}

/// Round-trip at various tangent points, rotations and parities.
#[test]
fn test_wcs_roundtrip_comprehensive() {
    let test_cases = [
        // (center_ra, center_dec, scale_arcsec, rotation_deg, mirrored)
        (0.0, 0.0, 0.5, 0.0, false),
        (180.0, 45.0, 1.0, 45.0, false),
        (270.0, -60.0, 2.0, 90.0, false),
        (90.0, 85.0, 0.3, 180.0, false),
        (180.0, 45.0, 1.0, 0.0, true),
        (359.9, 10.0, 40.0, 30.0, false),
    ];

    for (ra, dec, scale, rotation, mirrored) in test_cases {
        let wcs = Wcs::from_scale_rotation(
            DVec2::new(512.0, 512.0),
            SkyCoord::new(ra, dec),
            scale,
            rotation,
            mirrored,
        )
        .unwrap();

        for (x, y) in [(0.0, 0.0), (512.0, 512.0), (1023.0, 1023.0), (100.0, 800.0)] {
            let pixel = DVec2::new(x, y);
            let sky = wcs.pixel_to_sky(pixel);
            assert!((0.0..360.0).contains(&sky.ra), "RA out of range: {sky}");

            let back = wcs.sky_to_pixel(sky);
            assert!(
                (back - pixel).length() < 1e-6,
                "mismatch at {pixel:?} for WCS(ra={ra}, dec={dec}, rot={rotation}): {back:?}"
            );
        }
    }
}

#[test]
fn test_reference_pixel_maps_to_crval() {
    let wcs = simple_wcs();
    let sky = wcs.pixel_to_sky(wcs.crpix);
    assert!((sky.ra - 83.8).abs() < 1e-12);
    assert!((sky.dec + 5.4).abs() < 1e-12);
}

#[test]
fn test_scale_rotation_and_parity() {
    let wcs = Wcs::from_scale_rotation(
        DVec2::ZERO,
        SkyCoord::new(10.0, 20.0),
        2.5,
        30.0,
        true,
    )
    .unwrap();
    assert!((wcs.pixel_scale_arcsec() - 2.5).abs() < 1e-9);
    assert!((wcs.rotation_degrees() - 30.0).abs() < 1e-9);
    assert!(wcs.is_mirrored());
    assert!(!simple_wcs().is_mirrored());
}

#[test]
fn test_rotation_independent_of_parity() {
    for rotation in [-120.0, -30.0, 0.0, 45.0, 170.0] {
        for mirrored in [false, true] {
            let wcs = Wcs::from_scale_rotation(
                DVec2::new(50.0, 50.0),
                SkyCoord::new(200.0, -30.0),
                10.0,
                rotation,
                mirrored,
            )
            .unwrap();
            assert!(
                (wcs.rotation_degrees() - rotation).abs() < 1e-9,
                "rotation {rotation}, mirrored {mirrored}: got {}",
                wcs.rotation_degrees()
            );
            assert_eq!(wcs.is_mirrored(), mirrored);
        }
    }
}

#[test]
fn test_behind_tangent_plane_is_non_finite() {
    let wcs = simple_wcs();
    let antipode = SkyCoord::new(normalize_ra(83.8 + 180.0), 5.4);
    assert!(!wcs.sky_to_pixel(antipode).is_finite());

    let ninety_away = SkyCoord::new(normalize_ra(83.8 + 90.0), 0.0);
    assert!(project(SkyCoord::new(83.8, 0.0), ninety_away).is_none());
}

#[test]
fn test_ra_seam_is_continuous() {
    let wcs = Wcs::from_scale_rotation(
        DVec2::new(100.0, 100.0),
        SkyCoord::new(0.0, 0.0),
        36.0,
        0.0,
        false,
    )
    .unwrap();
    let west = wcs.sky_to_pixel(SkyCoord::new(359.9, 0.0));
    let east = wcs.sky_to_pixel(SkyCoord::new(0.1, 0.0));
    // 0.2 degrees at 36"/px is 20 px
    assert!(((west - east).length() - 20.0).abs() < 1e-3);
}

#[test]
fn test_singular_cd_is_rejected() {
    let err = Wcs::new(DVec2::ZERO, SkyCoord::new(0.0, 0.0), [[1.0, 2.0], [2.0, 4.0]]).unwrap_err();
    assert!(matches!(err, Error::InvalidWcs(_)));
}

#[test]
fn test_normalize_ra() {
    assert_eq!(normalize_ra(-10.0), 350.0);
    assert_eq!(normalize_ra(360.0), 0.0);
    assert_eq!(normalize_ra(725.0), 5.0);
    assert!(normalize_ra(-1e-18) < 360.0);
}

#[test]
fn test_from_fits_header_with_sip() {
    let bytes = build_header(&[
        ("SIMPLE", "T"),
        ("NAXIS", "0"),
        ("CTYPE1", "'RA---TAN-SIP'"),
        ("CTYPE2", "'DEC--TAN-SIP'"),
        ("CRPIX1", "513.0"),
        ("CRPIX2", "385.0"),
        ("CRVAL1", "83.8"),
        ("CRVAL2", "-5.4"),
        ("CD1_1", "-8.3333333E-03"),
        ("CD1_2", "0.0"),
        ("CD2_1", "0.0"),
        ("CD2_2", "8.3333333E-03"),
        ("IMAGEW", "1024"),
        ("IMAGEH", "768"),
        ("A_ORDER", "2"),
        ("A_2_0", "1.0E-06"),
        ("A_0_2", "-2.0E-06"),
        ("B_ORDER", "2"),
        ("B_1_1", "3.0E-06"),
        ("AP_ORDER", "2"),
        ("AP_2_0", "-1.0E-06"),
        ("AP_0_2", "2.0E-06"),
        ("BP_ORDER", "2"),
        ("BP_1_1", "-3.0E-06"),
    ]);

    let wcs = Wcs::from_fits_header(&bytes).unwrap();
    assert_eq!(wcs.crpix, DVec2::new(512.0, 384.0));
    assert!((wcs.crval.ra - 83.8).abs() < 1e-12);
    assert!((wcs.cd[0][0] + 8.3333333e-3).abs() < 1e-15);
    assert_eq!(wcs.image_size, Some((1024, 768)));
    assert!(wcs.is_mirrored());

    let sip = wcs.sip.as_ref().unwrap();
    assert_eq!(sip.a.terms.len(), 2);
    assert_eq!(sip.b.terms, vec![(1, 1, 3.0e-6)]);
    assert!(sip.ap.is_some() && sip.bp.is_some());

    for pixel in [DVec2::new(0.0, 0.0), DVec2::new(1023.0, 767.0), DVec2::new(200.0, 600.0)] {
        let back = wcs.sky_to_pixel(wcs.pixel_to_sky(pixel));
        assert!((back - pixel).length() < 1e-6, "{pixel:?} -> {back:?}");
    }
}

#[test]
fn test_from_fits_header_cdelt_fallback() {
    let bytes = build_header(&[
        ("CTYPE1", "'RA---TAN'"),
        ("CTYPE2", "'DEC--TAN'"),
        ("CRPIX1", "1.0"),
        ("CRPIX2", "1.0"),
        ("CRVAL1", "10.0"),
        ("CRVAL2", "20.0"),
        ("CDELT1", "-0.001"),
        ("CDELT2", "0.001"),
        ("NAXIS1", "100"),
        ("NAXIS2", "50"),
    ]);
    let wcs = Wcs::from_fits_header(&bytes).unwrap();
    assert_eq!(wcs.crpix, DVec2::ZERO);
    assert_eq!(wcs.cd, [[-0.001, 0.0], [0.0, 0.001]]);
    assert_eq!(wcs.image_size, Some((100, 50)));
    assert!(wcs.sip.is_none());
}

#[test]
fn test_from_fits_header_rejects_other_projections() {
    let bytes = build_header(&[
        ("CTYPE1", "'RA---SIN'"),
        ("CTYPE2", "'DEC--SIN'"),
        ("CRPIX1", "1.0"),
        ("CRPIX2", "1.0"),
        ("CRVAL1", "0.0"),
        ("CRVAL2", "0.0"),
        ("CDELT1", "0.001"),
        ("CDELT2", "0.001"),
    ]);
    let err = Wcs::from_fits_header(&bytes).unwrap_err();
    assert!(matches!(err, Error::InvalidWcs(msg) if msg.contains("RA---SIN")));
}

#[test]
fn test_from_fits_header_missing_reference_point() {
    let bytes = build_header(&[("CTYPE1", "'RA---TAN'"), ("CDELT1", "0.001")]);
    assert!(matches!(
        Wcs::from_fits_header(&bytes),
        Err(Error::InvalidWcs(_))
    ));
}

#[test]
fn test_corners_and_center() {
    let wcs = simple_wcs();
    let corners = wcs.corners(1024, 768);
    let center = wcs.center(1024, 768);
    assert!((center.ra - 83.8).abs() < 1e-9);
    for corner in corners {
        assert!(corner.is_finite());
        assert!((corner.dec - center.dec).abs() < 4.0);
    }
    // positive CD2_2: dec grows with the row index
    assert!(corners[3].dec > corners[0].dec);
}
