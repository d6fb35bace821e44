// Integration tests for configuration loading
//
// Layers are compiled defaults, then an optional TOML file, then prefixed
// environment variables. Each test uses its own prefix so parallel tests
// never see each other's variables.

use anyhow::Result;
use loqa_interpreter::audio::CaptureMode;
use loqa_interpreter::config::Config;
use loqa_interpreter::session::LanguageChangePolicy;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_file_overrides_defaults() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("interpreter.toml");
    std::fs::write(
        &path,
        r#"
[transport]
url = "wss://translate.example.com/ws"

[audio]
mode = "system_audio"
block_size = 2048

[session]
target_lang = "fr"
language_change = "reset_channel"
teardown_step_timeout_ms = 500

[playback]
enabled = false
"#,
    )?;

    let config = Config::load_with_prefix(&path.display().to_string(), "LOQATEST_FILE_ONLY")?;

    assert_eq!(config.transport.url, "wss://translate.example.com/ws");
    assert_eq!(config.transport.outbound_capacity, 32, "Untouched keys keep defaults");
    assert_eq!(config.audio.mode, CaptureMode::SystemAudio);
    assert_eq!(config.audio.block_size, 2048);
    assert!(!config.playback.enabled);

    let session = config.session_config();
    assert_eq!(session.source_lang, "en");
    assert_eq!(session.target_lang, "fr");
    assert_eq!(session.mode, CaptureMode::SystemAudio);
    assert_eq!(session.language_change, LanguageChangePolicy::ResetChannel);
    assert_eq!(session.teardown_step_timeout, Duration::from_millis(500));
    assert_eq!(session.audio.block_size, 2048);

    Ok(())
}

#[test]
fn test_environment_overrides_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("interpreter.toml");
    std::fs::write(&path, "[http]\nport = 9000\n")?;

    std::env::set_var("LOQATEST_ENV_TRANSPORT__URL", "ws://10.0.0.5:9999/ws");
    std::env::set_var("LOQATEST_ENV_HTTP__PORT", "9100");

    let config = Config::load_with_prefix(&path.display().to_string(), "LOQATEST_ENV")?;

    assert_eq!(config.transport.url, "ws://10.0.0.5:9999/ws");
    assert_eq!(config.http.port, 9100);
    assert_eq!(config.http.bind, "127.0.0.1");

    Ok(())
}

#[test]
fn test_invalid_value_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("interpreter.toml");
    std::fs::write(&path, "[audio]\nmode = \"speakerphone\"\n")?;

    let result = Config::load_with_prefix(&path.display().to_string(), "LOQATEST_INVALID");
    assert!(result.is_err(), "Unknown capture mode should fail to load");

    Ok(())
}
