//! Per-format disassemblers and the builder that selects one.
//!
//! Every variant parses its container into code regions and wraps an
//! [`Extractor`]; trait extraction and writing are shared through the
//! [`Disassembler`] trait. The set of formats is closed: [`AnyDisassembler`]
//! dispatches statically over the four variants.

use std::io::Write;

use tracing::debug;

use crate::config::{Architecture, ExtractionConfig};
use crate::error::{EngineError, FileError, FormatError, SinkError};
use crate::formats::{self, Format, ParsedContainer};
use crate::model::Extraction;
use crate::services::backends::CapstoneProvider;
use crate::services::extraction::{EngineState, Extractor};
use crate::services::oracle::OracleProvider;
use crate::source::ByteSource;
use crate::writer::{TraitWriter, WriteSummary};

/// Capability shared by all format variants.
pub trait Disassembler {
    fn format(&self) -> Format;

    fn extractor(&self) -> &Extractor<'_>;

    /// Decode all code regions and return every trait, fully materialized.
    /// Record order is unspecified.
    fn get_traits(&self) -> Extraction {
        self.extractor().get_traits()
    }

    /// Extract traits and write them to `writer` as JSON Lines.
    fn write_traits<W: Write>(
        &self,
        writer: &mut TraitWriter<W>,
    ) -> Result<WriteSummary, SinkError> {
        self.extractor().write_traits(writer)
    }

    fn state(&self) -> EngineState {
        self.extractor().state()
    }
}

fn ensure_loaded(source: &dyn ByteSource) -> Result<(), FileError> {
    if source.is_valid() {
        Ok(())
    } else {
        Err(FileError::NotLoaded)
    }
}

fn build_extractor<'a>(
    source: &'a dyn ByteSource,
    config: ExtractionConfig,
    format: Format,
    parsed: ParsedContainer,
    provider: Option<Box<dyn OracleProvider>>,
) -> Result<Extractor<'a>, EngineError> {
    let architecture = match (config.architecture(), parsed.architecture, format) {
        (Some(arch), _, _) => arch,
        (None, Some(arch), _) => arch,
        (None, None, Format::Raw) => Architecture::X86_64,
        (None, None, other) => {
            return Err(FormatError::Unsupported(format!(
                "unrecognized {other} machine type; set an architecture explicitly"
            ))
            .into())
        }
    };
    let provider = provider.unwrap_or_else(|| Box::new(CapstoneProvider::new(architecture)));
    debug!(
        %format,
        %architecture,
        code_regions = parsed.code_regions().count(),
        function_entries = parsed.function_entries().count(),
        "Parsed container"
    );
    Extractor::new(source, config, architecture, parsed.regions, provider)
}

macro_rules! format_disassembler {
    ($(#[$meta:meta])* $name:ident, $format:expr, $parse:expr) => {
        $(#[$meta])*
        pub struct $name<'a> {
            extractor: Extractor<'a>,
        }

        impl<'a> $name<'a> {
            pub fn new(
                source: &'a dyn ByteSource,
                config: ExtractionConfig,
            ) -> Result<Self, EngineError> {
                Self::with_oracle(source, config, None)
            }

            /// Build with a specific decode oracle instead of capstone.
            pub fn with_oracle(
                source: &'a dyn ByteSource,
                config: ExtractionConfig,
                provider: Option<Box<dyn OracleProvider>>,
            ) -> Result<Self, EngineError> {
                ensure_loaded(source)?;
                let parse: fn(&[u8]) -> Result<ParsedContainer, FormatError> = $parse;
                let parsed = parse(source.bytes())?;
                let extractor = build_extractor(source, config, $format, parsed, provider)?;
                Ok(Self { extractor })
            }
        }

        impl Disassembler for $name<'_> {
            fn format(&self) -> Format {
                $format
            }

            fn extractor(&self) -> &Extractor<'_> {
                &self.extractor
            }
        }
    };
}

format_disassembler!(
    /// Shellcode or any unrecognized blob: the whole buffer is code.
    RawDisassembler,
    Format::Raw,
    |bytes| Ok(formats::parse_raw(bytes))
);
format_disassembler!(
    /// Portable Executable images.
    PeDisassembler,
    Format::Pe,
    formats::pe::parse
);
format_disassembler!(
    /// ELF executables, shared objects and relocatable objects.
    ElfDisassembler,
    Format::Elf,
    formats::elf::parse
);
format_disassembler!(
    /// Thin Mach-O images.
    MachODisassembler,
    Format::MachO,
    formats::macho::parse
);

/// One disassembler per supported container format.
pub enum AnyDisassembler<'a> {
    Raw(RawDisassembler<'a>),
    Pe(PeDisassembler<'a>),
    Elf(ElfDisassembler<'a>),
    MachO(MachODisassembler<'a>),
}

impl Disassembler for AnyDisassembler<'_> {
    fn format(&self) -> Format {
        match self {
            AnyDisassembler::Raw(d) => d.format(),
            AnyDisassembler::Pe(d) => d.format(),
            AnyDisassembler::Elf(d) => d.format(),
            AnyDisassembler::MachO(d) => d.format(),
        }
    }

    fn extractor(&self) -> &Extractor<'_> {
        match self {
            AnyDisassembler::Raw(d) => d.extractor(),
            AnyDisassembler::Pe(d) => d.extractor(),
            AnyDisassembler::Elf(d) => d.extractor(),
            AnyDisassembler::MachO(d) => d.extractor(),
        }
    }
}

/// Selects and constructs a disassembler for a loaded byte source.
pub struct DisassemblerBuilder<'a> {
    source: &'a dyn ByteSource,
    config: ExtractionConfig,
    format: Option<Format>,
    provider: Option<Box<dyn OracleProvider>>,
}

impl<'a> DisassemblerBuilder<'a> {
    pub fn new(source: &'a dyn ByteSource) -> Self {
        Self { source, config: ExtractionConfig::default(), format: None, provider: None }
    }

    pub fn config(mut self, config: ExtractionConfig) -> Self {
        self.config = config;
        self
    }

    /// Force a format instead of sniffing the source.
    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn oracle(mut self, provider: Box<dyn OracleProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<AnyDisassembler<'a>, EngineError> {
        ensure_loaded(self.source)?;
        let format = self.format.unwrap_or_else(|| Format::detect(self.source.bytes()));
        let (source, config, provider) = (self.source, self.config, self.provider);
        Ok(match format {
            Format::Raw => AnyDisassembler::Raw(RawDisassembler::with_oracle(source, config, provider)?),
            Format::Pe => AnyDisassembler::Pe(PeDisassembler::with_oracle(source, config, provider)?),
            Format::Elf => {
                AnyDisassembler::Elf(ElfDisassembler::with_oracle(source, config, provider)?)
            }
            Format::MachO => {
                AnyDisassembler::MachO(MachODisassembler::with_oracle(source, config, provider)?)
            }
        })
    }
}
