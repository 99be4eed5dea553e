use binlex::{build_config, parse_format, version_banner, Args};
use binlex_core::{Architecture, Format, Mode};
use clap::Parser;

fn args(extra: &[&str]) -> Args {
    let mut argv = vec!["binlex", "--input", "in.bin"];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).expect("parse args")
}

#[test]
fn defaults_come_from_extraction_config() {
    let config = build_config(&args(&[])).expect("config");
    assert_eq!(config.threads(), 1);
    assert_eq!(config.mode(), Mode::Block);
    assert!(config.corpus().is_none());
    assert!(config.architecture().is_none());
}

#[test]
fn flags_are_validated_and_applied() {
    let config = build_config(&args(&[
        "--threads", "3", "--mode", "function", "--arch", "aarch64", "--tag", "x", "--tag", "x",
    ]))
    .expect("config");
    assert_eq!(config.threads(), 3);
    assert_eq!(config.mode(), Mode::Function);
    assert_eq!(config.architecture(), Some(Architecture::Arm64));
    assert_eq!(config.tags().len(), 1);

    assert!(build_config(&args(&["--mode", "page"])).is_err());
    assert!(build_config(&args(&["--arch", "mips"])).is_err());
    assert!(build_config(&args(&["--tag", ""])).is_err());
}

#[test]
fn format_names() {
    assert_eq!(parse_format("auto").unwrap(), None);
    assert_eq!(parse_format("AUTO").unwrap(), None);
    assert_eq!(parse_format("mach-o").unwrap(), Some(Format::MachO));
    assert_eq!(parse_format("shellcode").unwrap(), Some(Format::Raw));
    assert!(parse_format("coff").is_err());
}

#[test]
fn input_is_required() {
    assert!(Args::try_parse_from(["binlex"]).is_err());
}

#[test]
fn version_banner_names_both_crates() {
    let banner = version_banner();
    assert!(banner.starts_with(&format!("binlex {}", env!("CARGO_PKG_VERSION"))));
    assert!(banner.contains(&format!("binlex-core {}", binlex_core::version())));
}
