//! Content addressing for rendered fragments

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Image format produced by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Svg,
    Png,
}

impl OutputKind {
    /// File extension used for cached artifacts of this kind
    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Svg => "svg",
            OutputKind::Png => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "svg" => Some(OutputKind::Svg),
            "png" => Some(OutputKind::Png),
            _ => None,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Foreground/background pair the fragment is typeset with.
///
/// Colors are kept as the user wrote them (`black`, `#1e1e2e`, ...); the
/// renderer decides how to express them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorPair {
    pub foreground: String,
    pub background: String,
}

impl ColorPair {
    pub fn new(foreground: impl Into<String>, background: impl Into<String>) -> Self {
        Self {
            foreground: foreground.into(),
            background: background.into(),
        }
    }
}

impl Default for ColorPair {
    fn default() -> Self {
        Self::new("black", "white")
    }
}

/// Renderer configuration that only changes on reconfiguration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    /// LaTeX preamble template preceding the package list
    pub header: String,
    pub packages: Vec<String>,
    /// Formatting options (`scale`, `dpi`, ...), sorted for stable hashing
    pub options: BTreeMap<String, String>,
    /// Command templates that produce the session's output kind
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Content address of a rendered fragment: 32 lowercase hex digits
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts only strings that look like a fingerprint (used when listing the cache)
    pub fn parse(s: &str) -> Option<Self> {
        (s.len() == 32 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
            .then(|| Self(s.to_string()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}..)", &self.0[..8.min(self.0.len())])
    }
}

/// Hash the static configuration, the source text, the output kind and the
/// colors into a [`Fingerprint`].
///
/// Every field is length-prefixed so no two different inputs serialize to
/// the same byte stream.
#[must_use]
pub fn fingerprint(
    source: &str,
    kind: OutputKind,
    colors: &ColorPair,
    config: &StaticConfig,
) -> Fingerprint {
    let mut ctx = md5::Context::new();

    write_str(&mut ctx, &config.header);
    write_len(&mut ctx, config.packages.len());
    for package in &config.packages {
        write_str(&mut ctx, package);
    }
    write_len(&mut ctx, config.options.len());
    for (key, value) in &config.options {
        write_str(&mut ctx, key);
        write_str(&mut ctx, value);
    }
    write_len(&mut ctx, config.commands.len());
    for command in &config.commands {
        write_str(&mut ctx, command);
    }

    write_str(&mut ctx, source);
    write_str(&mut ctx, kind.extension());
    write_str(&mut ctx, &colors.foreground);
    write_str(&mut ctx, &colors.background);

    Fingerprint(format!("{:x}", ctx.compute()))
}

fn write_len(ctx: &mut md5::Context, len: usize) {
    ctx.consume((len as u64).to_le_bytes());
}

fn write_str(ctx: &mut md5::Context, s: &str) {
    write_len(ctx, s.len());
    ctx.consume(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StaticConfig {
        StaticConfig {
            header: "\\documentclass{article}".to_string(),
            packages: vec!["amsmath".to_string(), "amssymb".to_string()],
            options: BTreeMap::from([("scale".to_string(), "1.5".to_string())]),
            commands: vec!["latex {tex}".to_string(), "dvisvgm {dvi}".to_string()],
        }
    }

    fn black_on_white() -> ColorPair {
        ColorPair::new("black", "white")
    }

    #[test]
    fn deterministic() {
        let a = fingerprint("x^2", OutputKind::Svg, &black_on_white(), &config());
        let b = fingerprint("x^2", OutputKind::Svg, &black_on_white(), &config());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(Fingerprint::parse(a.as_str()).is_some());
    }

    #[test]
    fn swapped_colors_differ() {
        let f1 = fingerprint("x^2", OutputKind::Svg, &black_on_white(), &config());
        let f2 = fingerprint(
            "x^2",
            OutputKind::Svg,
            &ColorPair::new("white", "black"),
            &config(),
        );
        assert_ne!(f1, f2);
    }

    #[test]
    fn every_input_matters() {
        let base = fingerprint("x^2", OutputKind::Svg, &black_on_white(), &config());

        assert_ne!(
            base,
            fingerprint("x^3", OutputKind::Svg, &black_on_white(), &config())
        );
        assert_ne!(
            base,
            fingerprint("x^2", OutputKind::Png, &black_on_white(), &config())
        );
        assert_ne!(
            base,
            fingerprint(
                "x^2",
                OutputKind::Svg,
                &ColorPair::new("black", "#ffffff"),
                &config()
            )
        );

        let mut header = config();
        header.header.push_str("\n% tweak");
        assert_ne!(
            base,
            fingerprint("x^2", OutputKind::Svg, &black_on_white(), &header)
        );

        let mut packages = config();
        packages.packages.push("bm".to_string());
        assert_ne!(
            base,
            fingerprint("x^2", OutputKind::Svg, &black_on_white(), &packages)
        );

        let mut options = config();
        options.options.insert("scale".to_string(), "2.0".to_string());
        assert_ne!(
            base,
            fingerprint("x^2", OutputKind::Svg, &black_on_white(), &options)
        );

        let mut commands = config();
        commands.commands[1].push_str(" --exact-bbox");
        assert_ne!(
            base,
            fingerprint("x^2", OutputKind::Svg, &black_on_white(), &commands)
        );
    }

    #[test]
    fn field_boundaries_are_not_ambiguous() {
        let mut a = config();
        a.packages = vec!["ab".to_string(), "c".to_string()];
        let mut b = config();
        b.packages = vec!["a".to_string(), "bc".to_string()];
        assert_ne!(
            fingerprint("x", OutputKind::Svg, &black_on_white(), &a),
            fingerprint("x", OutputKind::Svg, &black_on_white(), &b)
        );
    }

    #[test]
    fn parse_rejects_non_fingerprints() {
        assert!(Fingerprint::parse("not-a-fingerprint").is_none());
        assert!(Fingerprint::parse(&"A".repeat(32)).is_none());
        assert!(Fingerprint::parse(&"a".repeat(32)).is_some());
    }

    #[test]
    fn output_kind_extensions() {
        assert_eq!(OutputKind::Svg.extension(), "svg");
        assert_eq!(OutputKind::from_extension("PNG"), Some(OutputKind::Png));
        assert_eq!(OutputKind::from_extension("pdf"), None);
    }
}
