//! Tests d'intégration du contrôleur de diffusion
//!
//! La chanson fait 60000 octets sondés à 400 kbit/s (50000 o/s, ~1.2 s).
//! L'effet de 1000 octets à 40 kbit/s couvre donc 10000 octets de chanson.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Media, MixBehavior, ProbeReply, SONG, ScriptedRunner, hear};
use spotcast::{BroadcastController, BroadcastStatus, Error, PlaybackState};

const SONG_LEN: usize = 60_000;
const EFFECT: &str = "applause.mp3";

fn runner(mixer: MixBehavior) -> ScriptedRunner {
    ScriptedRunner::new(mixer)
        .probe(SONG, ProbeReply::Bitrate("400k"))
        .probe(EFFECT, ProbeReply::Bitrate("40k"))
}

fn media() -> Media {
    Media::new(SONG_LEN, &[(EFFECT, 1_000), ("laugh.mp3", 500)])
}

async fn wait_for_state(controller: &BroadcastController, state: PlaybackState) -> BroadcastStatus {
    let mut status = controller.subscribe();
    tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| s.state == state))
        .await
        .expect("state never reached")
        .expect("controller gone")
        .clone()
}

#[tokio::test]
async fn test_listener_hears_whole_song_through_an_effect() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::Echo));
    let controller = media.controller(runner.clone());
    let mut listener = controller.connect_listener();

    controller.start().await.unwrap();
    let session = controller.status().session.unwrap();
    assert_eq!(session.source_id, SONG);
    assert_eq!(session.bitrate_bytes_per_sec, 50_000);
    assert!(session.active);

    controller.insert_effect("APPLAUSE").await.unwrap();
    let status = controller.status();
    assert_eq!(status.state, PlaybackState::PlayingWithEffect);
    assert_eq!(
        status.session.unwrap().effect_id.as_deref(),
        Some(EFFECT)
    );

    // the echo mixer hands the song back unchanged, so nothing is lost or repeated
    let heard = hear(&mut listener, SONG_LEN).await;
    assert_eq!(heard, media.song);

    wait_for_state(&controller, PlaybackState::Idle).await;
    assert_eq!(runner.mixer_calls(), 1);
    assert!(controller.registry().contains(listener.id()));
}

#[tokio::test]
async fn test_effect_end_returns_to_playing() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::Echo)));
    let mut first = controller.connect_listener();
    let mut second = controller.connect_listener();

    controller.start().await.unwrap();
    controller.insert_effect("applause").await.unwrap();

    let status = wait_for_state(&controller, PlaybackState::Playing).await;
    assert_eq!(status.session.unwrap().effect_id, None);

    let (a, b) = tokio::join!(hear(&mut first, SONG_LEN), hear(&mut second, SONG_LEN));
    assert_eq!(a, media.song);
    assert_eq!(b, media.song);

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_failed_mix_keeps_the_song_intact() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::Eof));
    let controller = media.controller(runner.clone());
    let mut listener = controller.connect_listener();

    controller.start().await.unwrap();
    let err = controller.insert_effect(EFFECT).await.unwrap_err();
    assert!(matches!(err, Error::MixerFailure(_)), "got {err:?}");

    let status = controller.status();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.session.unwrap().effect_id, None);

    let heard = hear(&mut listener, SONG_LEN).await;
    assert_eq!(heard, media.song);
    wait_for_state(&controller, PlaybackState::Idle).await;
}

#[tokio::test]
async fn test_silent_mixer_times_out_and_rolls_back() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::Hang)));
    let mut listener = controller.connect_listener();

    controller.start().await.unwrap();
    let err = controller.insert_effect(EFFECT).await.unwrap_err();
    assert!(matches!(err, Error::MixerFailure(_)), "got {err:?}");
    assert_eq!(controller.state(), PlaybackState::Playing);

    let heard = hear(&mut listener, SONG_LEN).await;
    assert_eq!(heard, media.song);
}

#[tokio::test]
async fn test_mixer_spawn_failure_is_reported() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::SpawnError)));
    let mut listener = controller.connect_listener();

    controller.start().await.unwrap();
    let err = controller.insert_effect(EFFECT).await.unwrap_err();
    assert!(matches!(err, Error::MixerFailure(_)), "got {err:?}");
    assert_eq!(controller.state(), PlaybackState::Playing);

    let heard = hear(&mut listener, SONG_LEN).await;
    assert_eq!(heard, media.song);
}

#[tokio::test]
async fn test_second_effect_is_rejected_while_one_plays() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::EchoHold));
    let controller = media.controller(runner.clone());
    let listener = controller.connect_listener();

    controller.start().await.unwrap();
    controller.insert_effect(EFFECT).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::PlayingWithEffect);

    let err = controller.insert_effect("laugh").await.unwrap_err();
    assert!(matches!(err, Error::SpliceInProgress), "got {err:?}");
    assert_eq!(runner.mixer_calls(), 1);

    controller.stop().await.unwrap();
    assert_eq!(controller.status(), BroadcastStatus {
        state: PlaybackState::Idle,
        session: None,
    });
    assert!(controller.registry().contains(listener.id()));
}

#[tokio::test]
async fn test_unknown_effect_leaves_playback_untouched() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::Echo));
    let controller = media.controller(runner.clone());

    controller.start().await.unwrap();
    let err = controller.insert_effect("trombone").await.unwrap_err();
    assert!(matches!(err, Error::SourceNotFound(_)), "got {err:?}");
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert_eq!(runner.mixer_calls(), 0);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_effect_requires_playback() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::Echo)));

    let err = controller.insert_effect(EFFECT).await.unwrap_err();
    assert!(matches!(err, Error::NotPlaying), "got {err:?}");
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::Echo));
    let controller = media.controller(runner.clone());

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Idle);

    controller.start().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
    // the song was probed once
    assert_eq!(runner.calls().len(), 1);

    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_missing_song_keeps_idle() {
    let media = media();
    std::fs::remove_file(media.songs_dir().join(SONG)).unwrap();
    let controller = media.controller(Arc::new(runner(MixBehavior::Echo)));

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, Error::SourceNotFound(_)), "got {err:?}");
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_stop_cancels_a_pending_start() {
    let media = media();
    let runner = ScriptedRunner::new(MixBehavior::Echo).probe(SONG, ProbeReply::Hang);
    let controller = media.controller(Arc::new(runner));

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.start().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    controller.stop().await.unwrap();
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_stop_during_an_effect_cancels_it() {
    let media = media();
    let runner = Arc::new(runner(MixBehavior::Hang));
    let controller = media.controller(runner.clone());
    let listener = controller.connect_listener();

    controller.start().await.unwrap();
    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.insert_effect(EFFECT).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    controller.stop().await.unwrap();
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "got {result:?}");
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(controller.status().session, None);
    assert_eq!(runner.mixer_calls(), 1);
    assert!(controller.registry().contains(listener.id()));
}

#[tokio::test]
async fn test_song_end_returns_to_idle() {
    let media = Media::new(5_000, &[]);
    let controller = media.controller(Arc::new(runner(MixBehavior::Echo)));
    let mut listener = controller.connect_listener();

    controller.start().await.unwrap();
    let heard = hear(&mut listener, 5_000).await;
    assert_eq!(heard, media.song);

    wait_for_state(&controller, PlaybackState::Idle).await;
    assert_eq!(controller.status().session, None);
}

#[tokio::test]
async fn test_commands_drive_the_controller() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::EchoHold)));

    controller.execute(" Start ".parse().unwrap()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);

    controller.execute("Applause".parse().unwrap()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::PlayingWithEffect);

    controller.execute("stop".parse().unwrap()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[tokio::test]
async fn test_disconnected_listener_leaves_registry() {
    let media = media();
    let controller = media.controller(Arc::new(runner(MixBehavior::Echo)));
    let kept = controller.connect_listener();
    let dropped = controller.connect_listener();
    let dropped_id = dropped.id();
    assert_eq!(controller.registry().len(), 2);

    drop(dropped);
    assert!(!controller.registry().contains(dropped_id));
    assert!(controller.disconnect_listener(kept.id()));
    assert!(controller.registry().is_empty());
}
