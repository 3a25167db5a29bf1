// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use prism_render::{PresentModePref, RecordMode, RenderSettings, UniformScope};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "prism".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub present_mode: PresentModePref,
    pub record_mode: RecordMode,
    pub uniform_scope: UniformScope,
    pub shader_dir: PathBuf,
    pub texture: Option<PathBuf>,
    /// Default tracing directive; `RUST_LOG` overrides it.
    pub log: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync: true,
            present_mode: PresentModePref::Mailbox,
            record_mode: RecordMode::Static,
            uniform_scope: UniformScope::PerImage,
            shader_dir: PathBuf::from(env!("OUT_DIR")),
            texture: None,
            log: "info".to_owned(),
        }
    }
}

impl AppConfig {
    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn settings(&self) -> RenderSettings {
        let r = &self.render;
        RenderSettings {
            clear_color: r.clear_color,
            vsync: r.vsync,
            present_mode: r.present_mode,
            record_mode: r.record_mode,
            uniform_scope: r.uniform_scope,
            shader_dir: r.shader_dir.clone(),
        }
    }
}
