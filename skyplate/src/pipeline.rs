//! One complete run: find the photo, solve it remotely, fetch the results and
//! write both overlays.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::config::{ApiKey, Config};
use crate::discovery::find_photo;
use crate::error::{Error, Result};
use crate::fetch::{ResultFetcher, constellation_lines};
use crate::job::{JobRequest, JobRunner, SolvedJob};
use crate::nova::{Calibration, ImageUpload, NovaClient, SolverApi, Transport};
use crate::render::{RenderReport, RenderStyle, render_camera_native, render_sky_normalized};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub photo: PathBuf,
    pub job: SolvedJob,
    pub calibration: Option<Calibration>,
    pub outputs: Vec<PathBuf>,
    pub native_report: RenderReport,
    /// `None` when the sky-normalized frame could not be built.
    pub sky_report: Option<RenderReport>,
}

/// Runs against nova.astrometry.net as configured.
pub fn run(config: &Config, api_key: &ApiKey) -> Result<RunSummary> {
    let client = NovaClient::new(&config.service, config.retry.clone())?;
    run_with(&client, client.transport(), config, api_key)
}

/// Runs against any solver; `transport` serves the overlay dataset download.
pub fn run_with<S: SolverApi>(
    api: &S,
    transport: &Transport,
    config: &Config,
    api_key: &ApiKey,
) -> Result<RunSummary> {
    let photo = find_photo(&config.discovery.dir, &config.discovery.pattern)?;
    let upload = ImageUpload::from_path(&photo)?;

    let request = JobRequest {
        api_key,
        image: &upload,
        options: &config.upload,
    };
    let job = JobRunner::new(api, request, config.poll.clone())
        .run()?
        .into_result()?;

    let output = &config.output;
    std::fs::create_dir_all(&output.dir).map_err(|e| Error::io(&output.dir, e))?;
    let mut outputs = Vec::new();

    let mut fetcher = ResultFetcher::new(api, &job, config.artifact.clone());
    let calibration = match fetcher.calibration() {
        Ok(calibration) => {
            let path = output.path(&output.calibration_file);
            let json = serde_json::to_string_pretty(&calibration)
                .map_err(|e| Error::Config(format!("cannot serialize calibration: {e}")))?;
            write_file(&path, json.as_bytes())?;
            outputs.push(path);
            Some(calibration)
        }
        Err(err) => {
            tracing::warn!("Calibration unavailable: {}", err);
            None
        }
    };

    let artifact = fetcher.coordinate_solution()?;
    let wcs_path = output.path(&output.wcs_file);
    write_file(&wcs_path, &artifact.raw)?;
    outputs.push(wcs_path);

    if config.artifact.fetch_annotated {
        if let Some(bytes) = fetcher.annotated_image() {
            let path = output.path(&output.annotated_file);
            write_file(&path, &bytes)?;
            outputs.push(path);
        }
    }

    let geometry = if config.overlay.enabled {
        constellation_lines(&config.overlay.source, transport)
    } else {
        tracing::info!("Overlay figures disabled, rendering grid only");
        None
    };

    let photo_image = load_rgb(&photo)?;
    if let Some((w, h)) = artifact.wcs.image_size {
        if (w, h) != photo_image.dimensions() {
            tracing::warn!(
                "Solution was computed for {}x{} but the photo is {}x{}",
                w,
                h,
                photo_image.width(),
                photo_image.height()
            );
        }
    }

    let style = RenderStyle::from(&config.overlay);
    let native = render_camera_native(
        &photo_image,
        &artifact.wcs,
        geometry.as_ref(),
        &config.grid,
        &style,
    );
    let native_path = output.path(&output.native_overlay);
    save_image(&native.image, &native_path)?;
    outputs.push(native_path);

    let sky_report = match render_sky_normalized(
        &photo_image,
        &artifact.wcs,
        geometry.as_ref(),
        &config.grid,
        &style,
    ) {
        Ok(sky) => {
            let sky_path = output.path(&output.sky_overlay);
            save_image(&sky.image, &sky_path)?;
            outputs.push(sky_path);
            Some(sky.report)
        }
        Err(err) if err.is_degradable() => {
            tracing::warn!("Skipping sky-normalized overlay: {}", err);
            None
        }
        Err(err) => return Err(err),
    };

    for path in &outputs {
        tracing::info!("Wrote {}", path.display());
    }

    Ok(RunSummary {
        photo,
        job: job.clone(),
        calibration,
        outputs,
        native_report: native.report,
        sky_report,
    })
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Format follows the extension (PNG or JPEG).
fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| Error::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}
