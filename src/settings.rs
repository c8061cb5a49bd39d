use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::{DEFAULT_ZOOM_STEP, EngineConfig};
use crate::error::ConfigError;
use crate::paths;
use crate::render::renderer::{self, DEFAULT_HEADER};
use crate::render::{ColorPair, CommandRenderer, DEFAULT_MAX_CONCURRENT, OutputKind, StaticConfig};

pub const CURRENT_VERSION: u32 = 2;

/// Command templates overriding the built-in latex pipelines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Artifact cache; the platform cache dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub output: OutputKind,

    #[serde(default)]
    pub colors: ColorPair,

    #[serde(default = "default_header")]
    pub header: String,

    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    #[serde(default = "default_options")]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,

    /// v1 kept the render scale at the top level
    #[serde(default, skip_serializing)]
    scale: Option<f32>,
}

fn default_version() -> u32 {
    1
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_header() -> String {
    DEFAULT_HEADER.to_string()
}

fn default_packages() -> Vec<String> {
    vec!["amsmath".to_string(), "amssymb".to_string()]
}

fn default_options() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("dpi".to_string(), "300".to_string()),
        ("scale".to_string(), "1.0".to_string()),
    ])
}

fn default_zoom_step() -> f32 {
    DEFAULT_ZOOM_STEP
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            cache_dir: None,
            max_concurrent: default_max_concurrent(),
            output: OutputKind::default(),
            colors: ColorPair::default(),
            header: default_header(),
            packages: default_packages(),
            options: default_options(),
            commands: CommandSettings::default(),
            zoom_step: default_zoom_step(),
            scale: None,
        }
    }
}

impl Settings {
    /// Read, migrate and validate a settings file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_yaml(&content).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
            if let Err(e) = settings.save(path) {
                warn!("Failed to save migrated settings to {path:?}: {e}");
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if given, else the default location.
    ///
    /// A missing default file is created with defaults; a missing explicit
    /// file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let Some(path) = paths::default_config_path() else {
            warn!("Could not determine config directory, using default settings");
            return Ok(Self::default());
        };
        if path.exists() {
            return Self::load(&path);
        }

        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Self::default();
        if let Err(e) = settings.save(&path) {
            warn!("Failed to write default settings to {path:?}: {e}");
        }
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        let body = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize settings: {e}")))?;
        Ok(format!("{SETTINGS_HEADER}{body}"))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, self.to_yaml()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(self.zoom_step.is_finite() && self.zoom_step > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "zoom_step must be positive, got {}",
                self.zoom_step
            )));
        }
        for (kind, commands) in [("svg", &self.commands.svg), ("png", &self.commands.png)] {
            if commands.as_ref().is_some_and(|c| c.iter().all(|s| s.trim().is_empty())) {
                return Err(ConfigError::Invalid(format!(
                    "commands.{kind} must contain at least one command"
                )));
            }
        }
        Ok(())
    }

    /// Everything that shapes an artifact apart from source and colors.
    ///
    /// Includes the command list for `output`, so editing a command renders
    /// everything again instead of serving artifacts made the old way.
    #[must_use]
    pub fn static_config(&self) -> StaticConfig {
        StaticConfig {
            header: self.header.clone(),
            packages: self.packages.clone(),
            options: self.options.clone(),
            commands: self.commands_for(self.output),
        }
    }

    /// Configured commands for `kind`, or the built-in pipeline
    #[must_use]
    pub fn commands_for(&self, kind: OutputKind) -> Vec<String> {
        let configured = match kind {
            OutputKind::Svg => &self.commands.svg,
            OutputKind::Png => &self.commands.png,
        };
        configured
            .clone()
            .unwrap_or_else(|| renderer::default_commands(kind))
    }

    /// Cache directory from the settings, or the platform default
    pub fn resolve_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        self.cache_dir
            .clone()
            .or_else(paths::default_cache_dir)
            .ok_or(ConfigError::NoCacheDir)
    }

    pub fn to_engine_config(
        &self,
        document_dir: Option<PathBuf>,
    ) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            cache_dir: self.resolve_cache_dir()?,
            max_concurrent: self.max_concurrent,
            output_kind: self.output,
            colors: self.colors.clone(),
            static_config: self.static_config(),
            document_dir,
            zoom_step: self.zoom_step,
        })
    }

    #[must_use]
    pub fn renderer(&self) -> CommandRenderer {
        let mut renderer = CommandRenderer::new(self.static_config());
        if let Some(svg) = &self.commands.svg {
            renderer = renderer.with_commands(OutputKind::Svg, svg.clone());
        }
        if let Some(png) = &self.commands.png {
            renderer = renderer.with_commands(OutputKind::Png, png.clone());
        }
        renderer
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        if let Some(scale) = settings.scale.take() {
            settings.options.insert("scale".to_string(), scale.to_string());
        }
    }

    settings.version = CURRENT_VERSION;
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# texpane settings
# ============================================================================
# header/packages/options and the commands for the output format feed every
# fragment's fingerprint: changing them renders everything again.
# Command templates may use the placeholders
# {tex} {dvi} {dir} {base} {output} {scale} {dpi} {fg} {bg}
#
# Example:
#   commands:
#     svg:
#       - latex -interaction nonstopmode -output-directory {dir} {tex}
#       - dvisvgm {dvi} --no-fonts --exact-bbox --output={output}

"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fingerprint;
    use tempfile::TempDir;

    #[test]
    fn empty_file_gets_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert_eq!(settings.max_concurrent, 30);
        assert_eq!(settings.output, OutputKind::Svg);
        assert_eq!(settings.colors, ColorPair::default());
        assert_eq!(settings.packages, vec!["amsmath", "amssymb"]);
        assert_eq!(settings.options.get("dpi").map(String::as_str), Some("300"));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.yaml");
        let mut settings = Settings::default();
        settings.cache_dir = Some(tmp.path().join("cache"));
        settings.output = OutputKind::Png;
        settings.colors = ColorPair::new("#cdd6f4", "#1e1e2e");
        settings.commands.png = Some(vec!["cp {tex} {output}".to_string()]);

        settings.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# ===="));

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn v1_scale_moves_into_options() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "version: 1\nscale: 1.5\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.options.get("scale").map(String::as_str), Some("1.5"));

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("version: 2"));
        assert!(!rewritten.lines().any(|l| l.starts_with("scale:")));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "version: 2\nmax_concurrent: 0\n").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn empty_command_list_is_rejected() {
        let settings = Settings::from_yaml("commands:\n  svg: []\n").unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, "max_concurrent: [not a number\n").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_explicit_file_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        let result = Settings::load_or_default(Some(&tmp.path().join("absent.yaml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn engine_config_uses_configured_cache_dir() {
        let settings = Settings {
            cache_dir: Some(PathBuf::from("/var/cache/texpane")),
            ..Settings::default()
        };
        let config = settings
            .to_engine_config(Some(PathBuf::from("/docs")))
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/texpane"));
        assert_eq!(config.document_dir, Some(PathBuf::from("/docs")));
        assert_eq!(config.static_config.packages, settings.packages);
    }

    #[test]
    fn command_changes_change_fingerprints() {
        let a = Settings::default();
        let b = Settings::from_yaml(
            "commands:\n  svg:\n    - latex {tex}\n    - dvisvgm {dvi} --output={output}\n",
        )
        .unwrap();
        let fingerprint_of = |settings: &Settings| {
            fingerprint(
                "$x^2$",
                settings.output,
                &settings.colors,
                &settings.static_config(),
            )
        };

        assert_eq!(a.static_config().commands, renderer::default_commands(OutputKind::Svg));
        assert_ne!(fingerprint_of(&a), fingerprint_of(&b));

        // Overriding the other kind leaves svg artifacts alone
        let c = Settings::from_yaml("commands:\n  png:\n    - cp {tex} {output}\n").unwrap();
        assert_eq!(fingerprint_of(&a), fingerprint_of(&c));
    }

    #[test]
    fn renderer_picks_up_command_overrides() {
        let settings = Settings::from_yaml("commands:\n  svg:\n    - cp {tex} {output}\n").unwrap();
        let renderer = settings.renderer();
        assert_eq!(renderer.commands(OutputKind::Svg), ["cp {tex} {output}"]);
        assert!(renderer.commands(OutputKind::Png)[0].starts_with("latex"));
    }
}
