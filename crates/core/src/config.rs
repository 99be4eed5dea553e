use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Granularity of emitted traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Block,
    Function,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Block => f.write_str("block"),
            Mode::Function => f.write_str("function"),
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(Mode::Block),
            "function" => Ok(Mode::Function),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Instruction set handed to the decode oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    Arm64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
        };
        f.write_str(name)
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "x86" | "i386" => Ok(Architecture::X86),
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm" | "armv7" => Ok(Architecture::Arm),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => Err(ConfigError::UnknownArchitecture(s.to_string())),
        }
    }
}

/// Settings for one extraction run. Passed by value to the disassembler
/// builder and immutable from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    threads: NonZeroUsize,
    corpus: Option<String>,
    tags: BTreeSet<String>,
    mode: Mode,
    architecture: Option<Architecture>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            threads: NonZeroUsize::MIN,
            corpus: None,
            tags: BTreeSet::new(),
            mode: Mode::Block,
            architecture: None,
        }
    }
}

impl ExtractionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Result<Self, ConfigError> {
        self.threads = NonZeroUsize::new(threads).ok_or(ConfigError::InvalidThreadCount(threads))?;
        Ok(self)
    }

    pub fn with_corpus(mut self, corpus: impl Into<String>) -> Self {
        self.corpus = Some(corpus.into());
        self
    }

    /// Replace the tag set. Duplicates collapse; empty tags are rejected.
    pub fn with_tags<I, S>(mut self, tags: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for tag in tags {
            let tag = tag.into();
            if tag.trim().is_empty() {
                return Err(ConfigError::EmptyTag);
            }
            set.insert(tag);
        }
        self.tags = set;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads.get()
    }

    pub fn corpus(&self) -> Option<&str> {
        self.corpus.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn architecture(&self) -> Option<Architecture> {
        self.architecture
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.into_config()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.into_config()
    }

    /// Load a config file. `.json` files are parsed as JSON, everything else
    /// as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }
}

/// On-disk shape of an extraction config.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    threads: Option<usize>,
    #[serde(default)]
    corpus: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    architecture: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> Result<ExtractionConfig, ConfigError> {
        let mut config = ExtractionConfig::new().with_tags(self.tags)?;
        if let Some(threads) = self.threads {
            config = config.with_threads(threads)?;
        }
        if let Some(corpus) = self.corpus {
            config = config.with_corpus(corpus);
        }
        if let Some(mode) = self.mode {
            config = config.with_mode(mode.parse()?);
        }
        if let Some(arch) = self.architecture {
            config = config.with_architecture(arch.parse()?);
        }
        Ok(config)
    }
}
