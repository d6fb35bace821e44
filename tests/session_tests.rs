// Integration tests for the session controller
//
// These tests drive a session through its lifecycle against an in-memory
// channel and a scripted audio backend.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::*;
use loqa_interpreter::error::{ChannelError, DeviceError, SessionError};
use loqa_interpreter::playback::NullPlayer;
use loqa_interpreter::session::{
    LanguageChangePolicy, Session, SessionConfig, SessionEvent, SessionState,
};
use loqa_interpreter::transport::{ChannelEnds, ChannelStatus, CloseReason, Outbound};
use tokio::time::timeout;

const EN_JA: &str = r#"{"type":"config","source_lang":"en","target_lang":"ja"}"#;

async fn next(ends: &mut ChannelEnds) -> Option<Outbound> {
    timeout(WAIT, ends.next_outbound())
        .await
        .expect("timed out waiting for outbound frame")
}

#[tokio::test]
async fn test_streaming_scenario() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));
    let mut events = handle.subscribe();

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;

    // Config goes out before any audio
    assert_eq!(next(&mut ends).await, Some(Outbound::Control(EN_JA.to_string())));

    probe.send_frame(vec![0.0; 4096]).await;
    match next(&mut ends).await {
        Some(Outbound::Audio(chunk)) => {
            assert_eq!(chunk.len(), 8192, "4096 samples -> 8192 bytes");
            assert!(chunk.as_bytes().iter().all(|&b| b == 0));
        }
        other => panic!("Expected an audio chunk, got {:?}", other),
    }

    ends.deliver(r#"{"type":"transcript","text":"hello"}"#);
    ends.deliver(r#"{"type":"transcript","text":"world"}"#);
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Transcript { text, .. } if text == "world")
    })
    .await;

    let snapshot = handle.snapshot().await?;
    assert_eq!(snapshot.transcript, "hello world");
    assert_eq!(snapshot.segments.len(), 2);
    assert_eq!(snapshot.stats.state, SessionState::Active);

    let stats = handle.stop().await?;
    assert_eq!(stats.state, SessionState::Closed);
    assert_eq!(stats.chunks_sent, 1);
    assert_eq!(AudioProbe::count(&probe.stopped), 1, "Capture stopped");
    assert_eq!(AudioProbe::count(&probe.released), 1, "Device released");
    assert_eq!(next(&mut ends).await, None, "Channel closed");

    let result = handle.set_languages("fr", "de").await;
    assert_eq!(result, Err(SessionError::NotActive(SessionState::Closed)));

    Ok(())
}

#[tokio::test]
async fn test_double_start_is_noop() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(
        session_config(),
        deps(Arc::clone(&connector), audio, Arc::new(NullPlayer)),
    );

    let (first, second) = tokio::join!(handle.start(), handle.start());
    first?;
    second?;
    handle.start().await?;

    assert_eq!(connector.connects(), 1, "Exactly one channel");
    assert_eq!(AudioProbe::count(&probe.created), 1, "Exactly one audio source");
    assert_eq!(AudioProbe::count(&probe.started), 1);

    let mut ends = channels.recv().await.context("no channel opened")?;
    assert_eq!(next(&mut ends).await, Some(Outbound::Control(EN_JA.to_string())));
    assert!(ends.try_next_outbound().is_none(), "Config sent once");

    Ok(())
}

#[tokio::test]
async fn test_set_languages_sends_one_config_and_clears() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );
    let mut events = handle.subscribe();

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    ends.deliver(r#"{"type":"transcript","text":"hello"}"#);
    ends.deliver(r#"{"type":"translation","text":"こんにちは"}"#);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Translation { .. })).await;

    handle.set_languages("ja", "en").await?;

    assert_eq!(
        next(&mut ends).await,
        Some(Outbound::Control(
            r#"{"type":"config","source_lang":"ja","target_lang":"en"}"#.to_string()
        ))
    );
    assert!(ends.try_next_outbound().is_none(), "Exactly one config message");

    let snapshot = handle.snapshot().await?;
    assert_eq!(snapshot.transcript, "");
    assert_eq!(snapshot.translation, "");
    assert!(snapshot.segments.is_empty());
    assert_eq!(snapshot.stats.source_lang, "ja");
    assert_eq!(snapshot.stats.target_lang, "en");

    Ok(())
}

#[tokio::test]
async fn test_swap_languages() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );
    let mut events = handle.subscribe();

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    handle.swap_languages().await?;

    assert_eq!(
        next(&mut ends).await,
        Some(Outbound::Control(
            r#"{"type":"config","source_lang":"ja","target_lang":"en"}"#.to_string()
        ))
    );
    let changed = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::LanguagesChanged { .. })
    })
    .await;
    assert_eq!(
        changed,
        SessionEvent::LanguagesChanged {
            source_lang: "ja".to_string(),
            target_lang: "en".to_string()
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_set_languages_with_channel_closed_is_local() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    ends.set_status(ChannelStatus::Closing);
    handle.set_languages("fr", "es").await?;

    assert!(ends.try_next_outbound().is_none(), "Nothing sent");
    let stats = handle.stats().await?;
    assert_eq!(stats.source_lang, "fr");
    assert_eq!(stats.target_lang, "es");
    assert_eq!(stats.state, SessionState::Active);

    Ok(())
}

#[tokio::test]
async fn test_set_languages_before_start_applies_on_open() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );

    handle.set_languages("de", "en").await?;
    handle.start().await?;

    let mut ends = channels.recv().await.context("no channel opened")?;
    assert_eq!(
        next(&mut ends).await,
        Some(Outbound::Control(
            r#"{"type":"config","source_lang":"de","target_lang":"en"}"#.to_string()
        ))
    );

    Ok(())
}

#[tokio::test]
async fn test_unknown_and_malformed_events_change_nothing() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );
    let mut events = handle.subscribe();

    handle.start().await?;
    let ends = channels.recv().await.context("no channel opened")?;

    ends.deliver(r#"{"type":"heartbeat","seq":1}"#);
    ends.deliver("{not json");
    ends.deliver(r#"{"type":"audio","payload":"%%%"}"#);
    ends.deliver(r#"{"type":"transcript","text":"still here"}"#);
    wait_for(&mut events, |e| matches!(e, SessionEvent::Transcript { .. })).await;

    let snapshot = handle.snapshot().await?;
    assert_eq!(snapshot.stats.state, SessionState::Active);
    assert_eq!(snapshot.transcript, "still here");
    assert_eq!(snapshot.stats.inbound_events, 4);
    assert_eq!(snapshot.stats.ignored_events, 1);
    assert_eq!(snapshot.stats.malformed_events, 2);
    assert_eq!(snapshot.stats.clips_queued, 0);

    Ok(())
}

#[tokio::test]
async fn test_audio_dropped_while_channel_not_open() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    ends.set_status(ChannelStatus::Connecting);
    probe.send_frame(vec![0.5; 4096]).await;
    wait_for_stats(&handle, |s| s.chunks_dropped == 1).await;

    ends.set_status(ChannelStatus::Open);
    probe.send_frame(vec![0.0; 4096]).await;
    wait_for_stats(&handle, |s| s.chunks_sent == 1).await;

    match next(&mut ends).await {
        Some(Outbound::Audio(chunk)) => {
            assert!(chunk.as_bytes().iter().all(|&b| b == 0), "Only the fresh chunk");
        }
        other => panic!("Expected an audio chunk, got {:?}", other),
    }
    assert!(ends.try_next_outbound().is_none(), "No stale chunks flushed");

    Ok(())
}

#[tokio::test]
async fn test_language_change_resent_after_reopen() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    ends.set_status(ChannelStatus::Connecting);
    handle.set_languages("fr", "es").await?;
    assert!(ends.try_next_outbound().is_none(), "Nothing sent while connecting");

    ends.set_status(ChannelStatus::Open);
    probe.send_frame(vec![0.0; 4096]).await;
    wait_for_stats(&handle, |s| s.chunks_sent == 1).await;

    assert_eq!(
        next(&mut ends).await,
        Some(Outbound::Control(
            r#"{"type":"config","source_lang":"fr","target_lang":"es"}"#.to_string()
        ))
    );
    assert!(matches!(next(&mut ends).await, Some(Outbound::Audio(_))));

    // Sent once only
    probe.send_frame(vec![0.0; 4096]).await;
    wait_for_stats(&handle, |s| s.chunks_sent == 2).await;
    assert!(matches!(next(&mut ends).await, Some(Outbound::Audio(_))));

    Ok(())
}

#[tokio::test]
async fn test_remote_close_tears_down() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));
    let mut events = handle.subscribe();

    handle.start().await?;
    let ends = channels.recv().await.context("no channel opened")?;

    ends.notify_closed(CloseReason::Remote("service restarting".to_string()));
    let ended = wait_for(&mut events, |e| matches!(e, SessionEvent::Ended { .. })).await;
    if let SessionEvent::Ended { reason } = ended {
        assert!(reason.contains("service restarting"), "reason: {}", reason);
    }

    assert_eq!(AudioProbe::count(&probe.stopped), 1, "Capture not left running");
    assert_eq!(AudioProbe::count(&probe.released), 1);

    let stats = handle.stop().await?;
    assert_eq!(stats.state, SessionState::Closed, "Stop after close is a no-op");
    assert_eq!(AudioProbe::count(&probe.stopped), 1);

    Ok(())
}

#[tokio::test]
async fn test_device_revoked_tears_down() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));
    let mut events = handle.subscribe();

    handle.start().await?;
    let mut ends = channels.recv().await.context("no channel opened")?;
    next(&mut ends).await;

    probe.revoke();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Ended { .. })).await;

    assert_eq!(handle.stats().await?.state, SessionState::Closed);
    assert_eq!(next(&mut ends).await, None, "Channel closed with the device");
    assert_eq!(AudioProbe::count(&probe.released), 1);

    Ok(())
}

#[tokio::test]
async fn test_device_start_failure_aborts_start() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory {
        fail_with: Some(DeviceError::NoAudioTrack),
        ..FakeAudioFactory::default()
    };
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));

    let result = handle.start().await;
    assert_eq!(result, Err(SessionError::Device(DeviceError::NoAudioTrack)));
    assert_eq!(handle.stats().await?.state, SessionState::Closed);

    let mut ends = channels.recv().await.context("no channel opened")?;
    assert_eq!(next(&mut ends).await, Some(Outbound::Control(EN_JA.to_string())));
    assert_eq!(next(&mut ends).await, None, "Partially opened channel released");

    Ok(())
}

#[tokio::test]
async fn test_connect_failure_aborts_start() -> Result<()> {
    let (connector, _channels) = FakeConnector::failing();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));

    let result = handle.start().await;
    assert!(matches!(
        result,
        Err(SessionError::Channel(ChannelError::Connect(_)))
    ));
    assert_eq!(handle.stats().await?.state, SessionState::Closed);
    assert_eq!(AudioProbe::count(&probe.created), 0, "Audio never opened");

    Ok(())
}

#[tokio::test]
async fn test_stop_before_start_closes() -> Result<()> {
    let (connector, _channels) = FakeConnector::new();
    let handle = Session::spawn(
        session_config(),
        deps(Arc::clone(&connector), FakeAudioFactory::default(), Arc::new(NullPlayer)),
    );

    let stats = handle.stop().await?;
    assert_eq!(stats.state, SessionState::Closed);

    handle.start().await?;
    assert_eq!(connector.connects(), 0, "Closed sessions never restart");

    Ok(())
}

#[tokio::test]
async fn test_teardown_is_bounded() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory {
        hang_on_stop: true,
        ..FakeAudioFactory::default()
    };
    let probe = Arc::clone(&audio.probe);
    let handle = Session::spawn(session_config(), deps(connector, audio, Arc::new(NullPlayer)));

    handle.start().await?;
    let _ends = channels.recv().await.context("no channel opened")?;

    let began = Instant::now();
    let stats = timeout(WAIT, handle.stop()).await??;

    assert_eq!(stats.state, SessionState::Closed);
    assert!(began.elapsed() < Duration::from_secs(1), "Stop must not hang");
    assert_eq!(
        AudioProbe::count(&probe.released),
        1,
        "Later steps run after a stuck one"
    );

    Ok(())
}

#[tokio::test]
async fn test_audio_clips_play_sequentially() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let player = RecordingPlayer::new(Duration::from_millis(50));
    let handle = Session::spawn(
        session_config(),
        deps(connector, FakeAudioFactory::default(), player.clone()),
    );

    handle.start().await?;
    let ends = channels.recv().await.context("no channel opened")?;

    for clip in [b"first".as_slice(), b"second".as_slice()] {
        ends.deliver(format!(
            r#"{{"type":"audio","payload":"{}"}}"#,
            STANDARD.encode(clip)
        ));
    }

    let stats = wait_for_stats(&handle, |s| s.clips_played == 2).await;
    assert_eq!(stats.clips_queued, 2);
    assert_eq!(stats.clips_failed, 0);

    let plays = player.plays();
    assert_eq!(plays[0].clip, b"first");
    assert_eq!(plays[1].clip, b"second");
    assert!(plays[1].started >= plays[0].finished, "No overlap");
    assert_eq!(
        player.max_active.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    Ok(())
}

#[tokio::test]
async fn test_reset_channel_policy_reconnects() -> Result<()> {
    let (connector, mut channels) = FakeConnector::new();
    let audio = FakeAudioFactory::default();
    let probe = Arc::clone(&audio.probe);
    let config = SessionConfig {
        language_change: LanguageChangePolicy::ResetChannel,
        ..session_config()
    };
    let handle = Session::spawn(
        config,
        deps(Arc::clone(&connector), audio, Arc::new(NullPlayer)),
    );

    handle.start().await?;
    let mut first = channels.recv().await.context("no channel opened")?;
    next(&mut first).await;

    handle.set_languages("de", "en").await?;

    assert_eq!(connector.connects(), 2);
    assert_eq!(next(&mut first).await, None, "Old channel closed");

    let mut second = channels.recv().await.context("no second channel")?;
    assert_eq!(
        next(&mut second).await,
        Some(Outbound::Control(
            r#"{"type":"config","source_lang":"de","target_lang":"en"}"#.to_string()
        ))
    );

    probe.send_frame(vec![0.0; 4096]).await;
    assert!(matches!(next(&mut second).await, Some(Outbound::Audio(_))));
    assert_eq!(handle.stats().await?.state, SessionState::Active);

    Ok(())
}
