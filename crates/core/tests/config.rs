use binlex_core::{Architecture, ConfigError, ExtractionConfig, Mode};

#[test]
fn defaults_are_single_threaded_block_mode() {
    let config = ExtractionConfig::default();
    assert_eq!(config.threads(), 1);
    assert_eq!(config.mode(), Mode::Block);
    assert!(config.corpus().is_none());
    assert!(config.tags().is_empty());
    assert!(config.architecture().is_none());
}

#[test]
fn zero_threads_is_rejected_not_clamped() {
    let err = ExtractionConfig::new().with_threads(0).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidThreadCount(0)));
    assert_eq!(ExtractionConfig::new().with_threads(8).unwrap().threads(), 8);
}

#[test]
fn tags_are_deduplicated_and_empty_tags_rejected() {
    let config = ExtractionConfig::new().with_tags(["t2", "t1", "t2"]).unwrap();
    let tags: Vec<&str> = config.tags().iter().map(String::as_str).collect();
    assert_eq!(tags, vec!["t1", "t2"]);

    assert!(matches!(
        ExtractionConfig::new().with_tags(["ok", " "]),
        Err(ConfigError::EmptyTag)
    ));
}

#[test]
fn mode_and_architecture_parse_from_names() {
    assert_eq!("function".parse::<Mode>().unwrap(), Mode::Function);
    assert_eq!("Block".parse::<Mode>().unwrap(), Mode::Block);
    assert!(matches!("blocks".parse::<Mode>(), Err(ConfigError::UnknownMode(_))));

    assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::X86_64);
    assert_eq!("aarch64".parse::<Architecture>().unwrap(), Architecture::Arm64);
    assert!(matches!("mips".parse::<Architecture>(), Err(ConfigError::UnknownArchitecture(_))));
}

#[test]
fn yaml_config_is_parsed_and_validated() {
    let config = ExtractionConfig::from_yaml_str(
        "threads: 4\ncorpus: malware\ntags: [apt, loader]\nmode: function\narchitecture: x86\n",
    )
    .expect("parse yaml");
    assert_eq!(config.threads(), 4);
    assert_eq!(config.corpus(), Some("malware"));
    assert_eq!(config.tags().len(), 2);
    assert_eq!(config.mode(), Mode::Function);
    assert_eq!(config.architecture(), Some(Architecture::X86));

    assert!(matches!(
        ExtractionConfig::from_yaml_str("threads: 0\n"),
        Err(ConfigError::InvalidThreadCount(0))
    ));
    assert!(matches!(
        ExtractionConfig::from_yaml_str("mode: instruction\n"),
        Err(ConfigError::UnknownMode(_))
    ));
    assert!(matches!(
        ExtractionConfig::from_yaml_str("colour: blue\n"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn config_file_loads_json_by_extension() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("traits.json");
    std::fs::write(&path, r#"{"corpus": "c1", "tags": ["t1"]}"#).unwrap();

    let config = ExtractionConfig::load(&path).expect("load json");
    assert_eq!(config.corpus(), Some("c1"));
    assert!(config.tags().contains("t1"));

    let missing = ExtractionConfig::load(temp.path().join("missing.yaml")).unwrap_err();
    assert!(matches!(missing, ConfigError::Read { .. }));
}
