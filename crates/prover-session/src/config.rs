//! Driver configuration: TOML-loadable structs with defaults, validation,
//! binary discovery, and the `--topfile` name derivation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::DriverError;

/// Narrowest pretty-printing margin that still yields readable output.
pub const MIN_PP_MARGIN: usize = 20;

/// Configuration for the SerAPI (`sertop`) backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SerapiConfig {
    /// Name or path of the `sertop` executable.
    #[serde(default = "default_sertop_bin")]
    pub sertop_bin: String,

    /// Extra arguments, passed before the fixed ones.
    #[serde(default)]
    pub args: Vec<String>,

    /// Input file path; only used to derive `--topfile`.
    #[serde(default = "default_fpath")]
    pub fpath: PathBuf,

    /// Maximum depth for pretty-printing.
    #[serde(default = "default_pp_depth")]
    pub pp_depth: usize,

    /// Right margin for pretty-printing (at least [`MIN_PP_MARGIN`]).
    #[serde(default = "default_pp_margin")]
    pub pp_margin: usize,

    /// Skip unclassifiable responses instead of failing.
    #[serde(default)]
    pub best_effort: bool,

    /// Seconds to wait for each response line; unbounded when absent.
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
}

impl Default for SerapiConfig {
    fn default() -> Self {
        Self {
            sertop_bin: default_sertop_bin(),
            args: Vec::new(),
            fpath: default_fpath(),
            pp_depth: default_pp_depth(),
            pp_margin: default_pp_margin(),
            best_effort: false,
            response_timeout_secs: None,
        }
    }
}

impl SerapiConfig {
    pub const DEFAULT_ARGS: [&'static str; 2] = ["--printer=sertop", "--implicit"];

    pub fn from_toml_str(contents: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| DriverError::Config(format!("Invalid SerAPI config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded SerAPI config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.pp_margin < MIN_PP_MARGIN {
            return Err(DriverError::Config(format!(
                "pp_margin must be at least {MIN_PP_MARGIN}, got {}",
                self.pp_margin
            )));
        }
        if self.pp_depth == 0 {
            return Err(DriverError::Config("pp_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Full argument list: user args, fixed args, then `--topfile`.
    pub fn sertop_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(Self::DEFAULT_ARGS.iter().map(|a| a.to_string()));
        args.push(format!("--topfile={}", topfile(&self.fpath)));
        args
    }
}

fn default_sertop_bin() -> String {
    "sertop".to_string()
}
fn default_fpath() -> PathBuf {
    PathBuf::from("-")
}
fn default_pp_depth() -> usize {
    30
}
fn default_pp_margin() -> usize {
    55
}

/// Configuration for the Lean 3 server backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Lean3Config {
    /// Name or path of the `lean` executable.
    #[serde(default = "default_lean_bin")]
    pub lean_bin: String,

    /// Extra arguments for both the AST dump and the server.
    #[serde(default)]
    pub args: Vec<String>,

    /// Input file path; its directory is the working directory for `lean`.
    #[serde(default = "default_fpath")]
    pub fpath: PathBuf,

    /// Seconds to wait for each response line; unbounded when absent.
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
}

impl Default for Lean3Config {
    fn default() -> Self {
        Self {
            lean_bin: default_lean_bin(),
            args: Vec::new(),
            fpath: default_fpath(),
            response_timeout_secs: None,
        }
    }
}

impl Lean3Config {
    pub const REPL_ARGS: [&'static str; 3] = ["--server", "-M 4096", "-T 100000"];
    pub const CLI_ARGS: [&'static str; 3] = ["--ast", "-M 4096", "-T 100000"];

    pub fn from_toml_str(contents: &str) -> Result<Self, DriverError> {
        toml::from_str(contents)
            .map_err(|e| DriverError::Config(format!("Invalid Lean 3 config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded Lean 3 config");
        Ok(config)
    }

    /// Directory `lean` runs in, so that it finds the project's packages.
    pub fn working_dir(&self) -> PathBuf {
        match self.fpath.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// File name reported to the server.
    pub fn file_name(&self) -> String {
        self.fpath
            .file_name()
            .map_or_else(|| "-".to_string(), |n| n.to_string_lossy().into_owned())
    }
}

fn default_lean_bin() -> String {
    "lean".to_string()
}

/// Resolve `bin` on the search path.
///
/// `hint` names the installation step shown when it is missing.
pub fn resolve_binary(bin: &str, hint: &str) -> Result<PathBuf, DriverError> {
    which::which(bin).map_err(|_| DriverError::BinaryNotFound {
        bin: bin.to_string(),
        hint: hint.to_string(),
    })
}

/// Module name the checker should give the input: the file stem with
/// characters that cannot appear in an identifier replaced by `_`, followed
/// by the original extension. `-` and empty stems become `Top`.
pub fn topfile(fpath: &Path) -> String {
    let stem = fpath
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() || stem == "-" {
        return "Top".to_string();
    }
    let mut name: String = stem
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 { is_ident_start(c) } else { is_ident_part(c) };
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect();
    if let Some(ext) = fpath.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    name
}

/// Letters (Lu, Ll, Lt, Lm, Lo), `_`, no-break space and the phonetic ranges.
///
/// Letter numbers (Nl such as `Ⅻ`) are alphabetic in `char` terms and are
/// excluded through `is_numeric`. Combining signs carrying `Other_Alphabetic`
/// are still accepted in first position, unlike in Coq.
fn is_ident_start(c: char) -> bool {
    (c.is_alphabetic() && !c.is_numeric())
        || c == '_'
        || c == '\u{00A0}'
        // Phonetic extensions and combining diacritical marks supplement.
        || ('\u{1D00}'..='\u{1DFF}').contains(&c)
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_numeric() || c == '\''
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SerapiConfig::default();
        assert_eq!(config.pp_depth, 30);
        assert_eq!(config.pp_margin, 55);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn narrow_margin_is_rejected() {
        let config = SerapiConfig {
            pp_margin: 10,
            ..SerapiConfig::default()
        };
        assert!(matches!(config.validate(), Err(DriverError::Config(_))));
    }

    #[test]
    fn zero_depth_is_rejected() {
        let err = SerapiConfig::from_toml_str("pp_depth = 0").unwrap_err();
        assert!(err.to_string().contains("pp_depth"));
    }

    #[test]
    fn deserialize_partial_toml() {
        let config = SerapiConfig::from_toml_str(
            r#"
sertop_bin = "/opt/coq/bin/sertop"
args = ["-Q", "theories,Lib"]
pp_margin = 80
best_effort = true
"#,
        )
        .unwrap();
        assert_eq!(config.sertop_bin, "/opt/coq/bin/sertop");
        assert_eq!(config.pp_margin, 80);
        assert_eq!(config.pp_depth, 30);
        assert!(config.best_effort);
        assert!(config.response_timeout_secs.is_none());
    }

    #[test]
    fn load_lean_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lean.toml");
        std::fs::write(&path, "fpath = \"src/demo.lean\"\nresponse_timeout_secs = 60\n").unwrap();

        let config = Lean3Config::load(&path).unwrap();
        assert_eq!(config.lean_bin, "lean");
        assert_eq!(config.response_timeout_secs, Some(60));
        assert_eq!(config.working_dir(), PathBuf::from("src"));
        assert_eq!(config.file_name(), "demo.lean");
    }

    #[test]
    fn sertop_args_order() {
        let config = SerapiConfig {
            args: vec!["-Q".into(), "theories,Lib".into()],
            fpath: PathBuf::from("docs/intro.v"),
            ..SerapiConfig::default()
        };
        assert_eq!(
            config.sertop_args(),
            vec!["-Q", "theories,Lib", "--printer=sertop", "--implicit", "--topfile=intro.v"]
        );
    }

    #[test]
    fn topfile_defaults() {
        assert_eq!(topfile(Path::new("-")), "Top");
        assert_eq!(topfile(Path::new("")), "Top");
    }

    #[test]
    fn topfile_sanitizes_stem() {
        assert_eq!(topfile(Path::new("dir/my-file.v")), "my_file.v");
        assert_eq!(topfile(Path::new("1st.v")), "_st.v");
        assert_eq!(topfile(Path::new("x1'.v")), "x1'.v");
        assert_eq!(topfile(Path::new("λcalc.v")), "λcalc.v");
        assert_eq!(topfile(Path::new("Ⅻtables.v")), "_tables.v");
        assert_eq!(topfile(Path::new("a b.v")), "a_b.v");
    }

    #[test]
    fn lean3_paths() {
        let config = Lean3Config {
            fpath: PathBuf::from("proofs/basic.lean"),
            ..Lean3Config::default()
        };
        assert_eq!(config.working_dir(), PathBuf::from("proofs"));
        assert_eq!(config.file_name(), "basic.lean");
        assert_eq!(Lean3Config::default().working_dir(), PathBuf::from("."));
    }

    #[test]
    fn missing_binary_names_install_step() {
        let err = resolve_binary("definitely-not-a-real-binary-xyz", "please install it").unwrap_err();
        assert!(matches!(err, DriverError::BinaryNotFound { .. }));
        assert!(err.to_string().contains("please install it"));
    }
}
