use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelConfig>,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// One administrative tier and the boundary file behind it.
#[derive(Debug, Deserialize, Clone)]
pub struct LevelConfig {
    pub name: String,
    pub path: PathBuf,
    pub field: String,
    /// `EPSG:<code>` override for files without usable CRS metadata.
    pub crs: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RenderConfig {
    pub title: String,
    pub credit: String,
    pub legend_label: String,
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: u32,
    pub preview_dpi: u32,
    pub fill_color: String, // Hex code
    pub fill_opacity: f64,
    pub edge_color: String,
    pub label_color: String,
    pub font: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            title: "Fig. 1 Study Area Map".to_string(),
            credit: "Credit: Basil Okoth Kaudo".to_string(),
            legend_label: "Study Area".to_string(),
            width_in: 10.0,
            height_in: 10.0,
            dpi: 300,
            preview_dpi: 100,
            fill_color: "#90EE90".to_string(),
            fill_opacity: 0.7,
            edge_color: "#000000".to_string(),
            label_color: "#006400".to_string(),
            font: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            render: RenderConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

fn default_levels() -> Vec<LevelConfig> {
    let level = |name: &str, file: &str, field: &str| LevelConfig {
        name: name.to_string(),
        path: Path::new("data/shp files").join(file),
        field: field.to_string(),
        crs: None,
    };
    vec![
        level("Country", "ken_admbnda_adm0_iebc_20191031.shp", "ADM0_EN"),
        level("County", "ken_admbnda_adm1_iebc_20191031.shp", "ADM1_EN"),
        level("Sub-County", "ken_admbnda_adm2_iebc_20191031.shp", "ADM2_EN"),
    ]
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            bail!("At least one administrative level must be configured");
        }
        let mut seen = HashSet::new();
        for level in &self.levels {
            if level.name.trim().is_empty() || level.field.trim().is_empty() {
                bail!("Level entries need a non-empty name and field: {:?}", level);
            }
            if !seen.insert(level.name.as_str()) {
                bail!("Duplicate level name '{}'", level.name);
            }
        }
        let render = &self.render;
        if render.dpi == 0 || render.preview_dpi == 0 {
            bail!("Render dpi values must be positive");
        }
        if render.width_in <= 0.0 || render.height_in <= 0.0 {
            bail!("Figure size must be positive");
        }
        if !(0.0..=1.0).contains(&render.fill_opacity) {
            bail!("fill_opacity must lie in [0, 1], got {}", render.fill_opacity);
        }
        Ok(())
    }

    pub fn level(&self, name: &str) -> Option<&LevelConfig> {
        self.levels.iter().find(|l| l.name == name)
    }
}
