//! Run configuration.
//!
//! Every tunable (endpoints, timeouts, retry and poll budgets, grid steps, output
//! names) lives here and is passed explicitly into each component. Values come from
//! [`Default`], an optional YAML/JSON file, then CLI overrides. The API key is never
//! part of the file: it is read from `NOVA_API_KEY`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::FileFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable holding the nova.astrometry.net API key.
pub const API_KEY_ENV: &str = "NOVA_API_KEY";

/// d3-celestial constellation stick figures (GeoJSON MultiLineStrings).
pub const DEFAULT_CONSTELLATION_LINES_URL: &str =
    "https://raw.githubusercontent.com/ofrohn/d3-celestial/master/data/constellations.lines.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub artifact: ArtifactConfig,
    pub upload: UploadOptions,
    pub grid: GridConfig,
    pub overlay: OverlayConfig,
    pub output: OutputConfig,
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Loads a config file, format chosen by extension (`.yaml`, `.yml`, `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy();
        let format = FileFormat::from_file_name(&name).map_err(|e| Error::Config(e.to_string()))?;
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config = common::deserialize(&text, format)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects budgets that would make a loop never run or never end.
    pub fn validate(&self) -> Result<()> {
        if self.poll.assignment_attempts == 0 || self.poll.completion_attempts == 0 {
            return Err(Error::Config("poll attempt budgets must be >= 1".into()));
        }
        if self.artifact.attempts == 0 {
            return Err(Error::Config("artifact attempts must be >= 1".into()));
        }
        if !is_growth_factor(self.retry.multiplier) {
            return Err(Error::Config("retry multiplier must be finite and >= 1.0".into()));
        }
        if !is_growth_factor(self.artifact.multiplier) {
            return Err(Error::Config("artifact multiplier must be finite and >= 1.0".into()));
        }
        if self.artifact.initial_delay > self.artifact.max_delay {
            return Err(Error::Config("artifact initial_delay exceeds max_delay".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config("retry jitter must be within [0, 1]".into()));
        }
        if self.grid.ra_step_deg <= 0.0 || self.grid.dec_step_deg <= 0.0 {
            return Err(Error::Config("grid steps must be positive".into()));
        }
        if self.grid.samples_per_line < 2 {
            return Err(Error::Config("grid lines need at least 2 samples".into()));
        }
        if let (Some(lo), Some(hi)) = (self.upload.scale_lower, self.upload.scale_upper) {
            if lo > hi {
                return Err(Error::Config(format!(
                    "scale_lower ({lo}) exceeds scale_upper ({hi})"
                )));
            }
        }
        Ok(())
    }
}

fn is_growth_factor(multiplier: f64) -> bool {
    multiplier.is_finite() && multiplier >= 1.0
}

/// Secret API key. `Debug` never prints the value.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Reads the key from [`API_KEY_ENV`] (after loading `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(Error::Config(format!("{API_KEY_ENV} is not set"))),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// JSON API base, e.g. `http://nova.astrometry.net/api`.
    pub api_url: String,
    /// Web site base used for artifact downloads (`/wcs_file/{job}`).
    pub site_url: String,
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_url: "http://nova.astrometry.net/api".to_string(),
            site_url: "http://nova.astrometry.net".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    /// Sets the API base; the site base follows when the URL ends in `/api`.
    pub fn set_api_url(&mut self, url: &str) {
        let url = url.trim_end_matches('/');
        self.api_url = url.to_string();
        if let Some(site) = url.strip_suffix("/api") {
            self.site_url = site.to_string();
        }
    }
}

/// Transport-level retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of each delay randomized away, in [0, 1].
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        capped_delay(self.initial_backoff, self.multiplier, retry, self.max_backoff)
    }
}

/// Cadence and budget of the two polling phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "duration_secs")]
    pub assignment_interval: Duration,
    pub assignment_attempts: u32,
    #[serde(with = "duration_secs")]
    pub completion_interval: Duration,
    pub completion_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            assignment_interval: Duration::from_secs(5),
            assignment_attempts: 60,
            completion_interval: Duration::from_secs(10),
            completion_attempts: 180,
        }
    }
}

/// Retry budget for artifacts that materialize after the job succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Also fetch the solver's own annotated rendering (best effort).
    pub fetch_annotated: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            fetch_annotated: false,
        }
    }
}

impl ArtifactConfig {
    /// Wait after failed attempt number `retry` (0-based), capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        capped_delay(self.initial_delay, self.multiplier, retry, self.max_delay)
    }
}

/// `initial * multiplier^retry`, never above `max`. Overflow and NaN saturate to `max`.
fn capped_delay(initial: Duration, multiplier: f64, retry: u32, max: Duration) -> Duration {
    let secs = initial.as_secs_f64() * multiplier.powi(retry.min(i32::MAX as u32) as i32);
    Duration::try_from_secs_f64(secs)
        .map(|delay| delay.min(max))
        .unwrap_or(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleUnits {
    #[serde(rename = "arcsecperpix")]
    ArcsecPerPix,
    #[serde(rename = "arcminwidth")]
    ArcminWidth,
    #[serde(rename = "degwidth")]
    DegWidth,
}

impl ScaleUnits {
    pub fn as_api_str(self) -> &'static str {
        match self {
            ScaleUnits::ArcsecPerPix => "arcsecperpix",
            ScaleUnits::ArcminWidth => "arcminwidth",
            ScaleUnits::DegWidth => "degwidth",
        }
    }
}

/// Submission options. Narrow scale bounds and a center hint shrink the remote
/// search space; leaving them out forces a blind full-sky search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub publicly_visible: bool,
    pub allow_commercial_use: bool,
    pub allow_modifications: bool,
    pub scale_units: ScaleUnits,
    pub scale_lower: Option<f64>,
    pub scale_upper: Option<f64>,
    pub center_ra: Option<f64>,
    pub center_dec: Option<f64>,
    /// Search radius around the center hint, degrees.
    pub radius: Option<f64>,
    pub downsample_factor: Option<u32>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            publicly_visible: true,
            allow_commercial_use: false,
            allow_modifications: false,
            scale_units: ScaleUnits::ArcsecPerPix,
            scale_lower: Some(0.1),
            scale_upper: Some(20.0),
            center_ra: None,
            center_dec: None,
            radius: None,
            downsample_factor: None,
        }
    }
}

/// Equatorial grid generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub ra_step_deg: f64,
    pub dec_step_deg: f64,
    pub samples_per_line: usize,
    /// Padding added around the corner bounding box, degrees.
    pub footprint_padding_deg: f64,
    /// Overlay features are kept when any vertex is within this fraction of the
    /// frame size beyond an edge.
    pub feature_margin: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            ra_step_deg: 15.0,
            dec_step_deg: 10.0,
            samples_per_line: 100,
            footprint_padding_deg: 10.0,
            feature_margin: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// URL or local path of the constellation line dataset.
    pub source: String,
    pub grid_color: [u8; 3],
    pub grid_thickness: f32,
    pub figure_color: [u8; 3],
    pub figure_thickness: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: DEFAULT_CONSTELLATION_LINES_URL.to_string(),
            grid_color: [90, 160, 255],
            grid_thickness: 1.0,
            figure_color: [255, 210, 80],
            figure_thickness: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub native_overlay: String,
    pub sky_overlay: String,
    pub wcs_file: String,
    pub calibration_file: String,
    pub annotated_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            native_overlay: "overlay_native.png".to_string(),
            sky_overlay: "overlay_sky.png".to_string(),
            wcs_file: "wcs.fits".to_string(),
            calibration_file: "calibration.json".to_string(),
            annotated_file: "annotated_remote.png".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub dir: PathBuf,
    /// Case-insensitive substring the photo's file name must contain.
    pub pattern: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            pattern: "starphoto".to_string(),
        }
    }
}

/// Durations are written as (fractional) seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(retry.backoff(0), Duration::from_secs(1));
        assert_eq!(retry.backoff(1), Duration::from_secs(2));
        assert_eq!(retry.backoff(2), Duration::from_secs(4));
        assert_eq!(retry.backoff(3), Duration::from_secs(5));
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skyplate.yaml");
        std::fs::write(
            &path,
            "poll:\n  assignment_interval: 1.5\n  assignment_attempts: 3\ngrid:\n  ra_step_deg: 30\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll.assignment_interval, Duration::from_millis(1500));
        assert_eq!(config.poll.assignment_attempts, 3);
        assert_eq!(config.poll.completion_attempts, 180);
        assert_eq!(config.grid.ra_step_deg, 30.0);
        assert_eq!(config.grid.dec_step_deg, 10.0);
        assert_eq!(config.upload.scale_units, ScaleUnits::ArcsecPerPix);
    }

    #[test]
    fn test_load_rejects_zero_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"poll": {"completion_attempts": 0}}"#).unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_scale_bounds() {
        let mut config = Config::default();
        config.upload.scale_lower = Some(30.0);
        config.upload.scale_upper = Some(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_artifact_multiplier() {
        for multiplier in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.artifact.multiplier = multiplier;
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "multiplier {multiplier} accepted"
            );
        }

        let mut config = Config::default();
        config.retry.multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_artifact_delay_saturates() {
        let artifact = ArtifactConfig {
            multiplier: 1.0e6,
            ..Default::default()
        };
        assert_eq!(artifact.delay(0), Duration::from_secs(2));
        assert_eq!(artifact.delay(1), Duration::from_secs(30));
        assert_eq!(artifact.delay(500), Duration::from_secs(30));

        let retry = RetryConfig {
            multiplier: 1.0e300,
            ..Default::default()
        };
        assert_eq!(retry.backoff(40), retry.max_backoff);
    }

    #[test]
    fn test_api_url_override_moves_site_url() {
        let mut service = ServiceConfig::default();
        service.set_api_url("http://127.0.0.1:8080/api/");
        assert_eq!(service.api_url, "http://127.0.0.1:8080/api");
        assert_eq!(service.site_url, "http://127.0.0.1:8080");

        service.set_api_url("http://solver.local/v1");
        assert_eq!(service.api_url, "http://solver.local/v1");
        assert_eq!(service.site_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("secret-value");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.expose(), "secret-value");
    }
}
