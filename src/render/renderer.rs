//! External renderer adapter

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use super::fingerprint::{ColorPair, OutputKind, StaticConfig};
use super::request::RenderJob;
use crate::error::RenderFailure;

/// Header used when the configuration does not provide one
pub const DEFAULT_HEADER: &str = "\\documentclass{article}\n\\usepackage[usenames]{xcolor}";

/// Base name of the generated LaTeX document inside the scratch directory
const BASE_NAME: &str = "fragment";

/// Turns one job into the file at `job.output`. Runs on worker threads.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob) -> Result<(), RenderFailure>;
}

/// Renders by writing a LaTeX document and running configured commands.
///
/// Each command is a template split on whitespace; the placeholders `{tex}`,
/// `{dvi}`, `{dir}`, `{base}`, `{output}`, `{scale}`, `{dpi}`, `{fg}` and
/// `{bg}` are substituted per argument, so paths with spaces survive. The
/// last command must leave its result at `{output}`, which is then moved
/// into the cache.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    config: StaticConfig,
    commands: HashMap<OutputKind, Vec<String>>,
}

impl CommandRenderer {
    #[must_use]
    pub fn new(config: StaticConfig) -> Self {
        Self {
            config,
            commands: [OutputKind::Svg, OutputKind::Png]
                .into_iter()
                .map(|kind| (kind, default_commands(kind)))
                .collect(),
        }
    }

    /// Replace the command list for one output kind
    #[must_use]
    pub fn with_commands(mut self, kind: OutputKind, commands: Vec<String>) -> Self {
        self.commands.insert(kind, commands);
        self
    }

    #[must_use]
    pub fn config(&self) -> &StaticConfig {
        &self.config
    }

    #[must_use]
    pub fn commands(&self, kind: OutputKind) -> &[String] {
        self.commands.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The complete LaTeX document for `source`
    #[must_use]
    pub fn tex_document(&self, source: &str, colors: &ColorPair) -> String {
        let header = if self.config.header.trim().is_empty() {
            DEFAULT_HEADER
        } else {
            self.config.header.as_str()
        };

        let mut doc = String::with_capacity(header.len() + source.len() + 256);
        doc.push_str(header);
        doc.push('\n');
        for package in &self.config.packages {
            doc.push_str(&format!("\\usepackage{{{package}}}\n"));
        }
        doc.push_str(&color_definition("fg", &colors.foreground));
        doc.push_str(&color_definition("bg", &colors.background));
        doc.push_str("\\pagestyle{empty}\n\\begin{document}\n\\pagecolor{bg}\n{\\color{fg}\n");
        doc.push_str(source);
        doc.push_str("\n}\n\\end{document}\n");
        doc
    }

    fn option(&self, name: &str, default: &str) -> String {
        self.config
            .options
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn placeholders(&self, dir: &Path, job: &RenderJob) -> Vec<(&'static str, String)> {
        let base = dir.join(BASE_NAME);
        vec![
            ("{tex}", path_arg(&base.with_extension("tex"))),
            ("{dvi}", path_arg(&base.with_extension("dvi"))),
            ("{dir}", path_arg(dir)),
            ("{base}", BASE_NAME.to_string()),
            ("{output}", path_arg(&scratch_output(dir, job.kind))),
            ("{scale}", self.option("scale", "1.0")),
            ("{dpi}", self.option("dpi", "300")),
            ("{fg}", job.colors.foreground.clone()),
            ("{bg}", job.colors.background.clone()),
        ]
    }
}

impl Renderer for CommandRenderer {
    fn render(&self, job: &RenderJob) -> Result<(), RenderFailure> {
        let commands = self.commands(job.kind);
        if commands.is_empty() {
            return Err(RenderFailure::new(
                "",
                format!("no render commands configured for {}", job.kind),
                "",
            ));
        }

        let scratch = tempfile::Builder::new()
            .prefix("texpane-")
            .tempdir()
            .map_err(|e| {
                RenderFailure::new("", format!("cannot create scratch directory: {e}"), "")
            })?;
        let dir = scratch.path();

        let tex_path = dir.join(BASE_NAME).with_extension("tex");
        fs::write(&tex_path, self.tex_document(&job.source, &job.colors)).map_err(|e| {
            RenderFailure::new("", format!("cannot write {}: {e}", tex_path.display()), "")
        })?;

        let placeholders = self.placeholders(dir, job);
        let mut transcript = String::new();

        for template in commands {
            let args = expand(template, &placeholders);
            let Some((program, rest)) = args.split_first() else {
                continue;
            };
            let command_line = args.join(" ");
            debug!("Running {command_line}");

            let output = Command::new(program)
                .args(rest)
                .current_dir(dir)
                .output()
                .map_err(|e| {
                    RenderFailure::new(
                        command_line.clone(),
                        format!("failed to run {program}: {e}"),
                        transcript.clone(),
                    )
                })?;

            transcript.push_str(&String::from_utf8_lossy(&output.stdout));
            transcript.push_str(&String::from_utf8_lossy(&output.stderr));

            if !output.status.success() {
                return Err(RenderFailure::new(
                    command_line,
                    format!("{program} exited with {}", output.status),
                    transcript,
                ));
            }
        }

        let produced = scratch_output(dir, job.kind);
        move_into_cache(&produced, &job.output).map_err(|e| {
            RenderFailure::new(
                commands.last().cloned().unwrap_or_default(),
                format!("render commands did not produce {}: {e}", produced.display()),
                transcript,
            )
        })
    }
}

/// Built-in pipeline for `kind`: latex, then dvisvgm or dvipng
#[must_use]
pub fn default_commands(kind: OutputKind) -> Vec<String> {
    let latex = "latex -interaction nonstopmode -halt-on-error -output-directory {dir} {tex}";
    let convert = match kind {
        OutputKind::Svg => {
            "dvisvgm {dvi} --no-fonts --exact-bbox --scale={scale} --output={output}"
        }
        OutputKind::Png => "dvipng -D {dpi} -T tight -bg Transparent -o {output} {dvi}",
    };
    vec![latex.to_string(), convert.to_string()]
}

fn expand(template: &str, placeholders: &[(&str, String)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            placeholders
                .iter()
                .fold(arg.to_string(), |acc, (name, value)| acc.replace(name, value))
        })
        .collect()
}

fn scratch_output(dir: &Path, kind: OutputKind) -> PathBuf {
    dir.join(BASE_NAME).with_extension(kind.extension())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `#rrggbb` becomes an HTML color, anything else is taken as a color name
fn color_definition(name: &str, color: &str) -> String {
    let hex = color.strip_prefix('#').filter(|h| {
        h.len() == 6 && h.bytes().all(|b| b.is_ascii_hexdigit())
    });
    match hex {
        Some(hex) => format!("\\definecolor{{{name}}}{{HTML}}{{{}}}\n", hex.to_ascii_uppercase()),
        None => format!("\\colorlet{{{name}}}{{{color}}}\n"),
    }
}

fn move_into_cache(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    // rename fails across filesystems
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
    }
    Ok(())
}
