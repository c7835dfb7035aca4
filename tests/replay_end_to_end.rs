//! Full replays from a log file through the hub.

mod common;

use common::{replay_config, wait_for, write_log, CollectingSink};
use replay_hub::control::HubCommand;
use replay_hub::Hub;
use std::sync::Arc;
use std::time::Duration;

const ANSWER: Duration = Duration::from_secs(5);

#[test]
fn replays_every_event_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("counter.xio");
    write_log(&log, 0..1000);

    let sink = CollectingSink::default();
    let events = Arc::clone(&sink.events);
    let hub = Hub::builder(replay_config(&log))
        .writer(Box::new(sink))
        .start()
        .unwrap();
    let ctx = Arc::clone(hub.context());
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    assert!(
        wait_for(Duration::from_secs(10), || events.lock().len() >= 1000),
        "only {} events replayed",
        events.lock().len()
    );
    assert!(wait_for(Duration::from_secs(2), || ctx.messages.contains("replay completed")));
    assert_eq!(ctx.clock.first_line(), Some(0));
    assert_eq!(ctx.clock.last_line(), Some(999));

    commands.request(HubCommand::Quit, ANSWER).unwrap();
    runner.join().unwrap().unwrap();

    let times: Vec<i64> = events.lock().iter().map(|e| e.time).collect();
    assert_eq!(times, (0..1000).collect::<Vec<_>>());
}

#[test]
fn seek_continues_at_target() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("sparse.xio");
    write_log(&log, (0..1000).map(|i| i * 10));

    let sink = CollectingSink::default();
    let events = Arc::clone(&sink.events);
    let hub = Hub::builder(replay_config(&log))
        .writer(Box::new(sink))
        .start()
        .unwrap();
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    assert!(wait_for(Duration::from_secs(5), || events.lock().len() >= 5));
    commands.request(HubCommand::Seek(5_000), ANSWER).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        events.lock().iter().any(|e| e.time >= 5_200)
    }));
    commands.request(HubCommand::Quit, ANSWER).unwrap();
    runner.join().unwrap().unwrap();

    let times: Vec<i64> = events.lock().iter().map(|e| e.time).collect();
    let landing = times.iter().position(|&t| t >= 5_000).unwrap();
    assert_eq!(times[landing], 5_000, "{times:?}");
    let after = &times[landing..];
    assert!(after.windows(2).all(|w| w[0] < w[1]), "{after:?}");
    assert!(times[..landing].iter().all(|&t| t < 1_000), "{times:?}");
}

#[test]
fn pause_shifts_release_times() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("slow.xio");
    write_log(&log, (0..200).map(|i| i * 20));

    let sink = CollectingSink::default();
    let events = Arc::clone(&sink.events);
    let hub = Hub::builder(replay_config(&log))
        .writer(Box::new(sink))
        .start()
        .unwrap();
    let ctx = Arc::clone(hub.context());
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    assert!(wait_for(Duration::from_secs(5), || events.lock().len() >= 3));
    commands.request(HubCommand::SetPaused(true), ANSWER).unwrap();
    let delay_before = ctx.clock.replay_delay();
    std::thread::sleep(Duration::from_millis(100));
    let written = events.lock().len();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(events.lock().len(), written);

    commands.request(HubCommand::SetPaused(false), ANSWER).unwrap();
    let shift = ctx.clock.replay_delay() - delay_before;
    assert!((400..700).contains(&shift), "delay shifted by {shift}");
    assert!(wait_for(Duration::from_secs(5), || events.lock().len() > written));

    commands.request(HubCommand::Quit, ANSWER).unwrap();
    runner.join().unwrap().unwrap();

    let times: Vec<i64> = events.lock().iter().map(|e| e.time).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
}

#[test]
fn replay_commands_report_state() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("state.xio");
    write_log(&log, 100..110);

    let hub = Hub::builder(replay_config(&log))
        .writer(Box::new(CollectingSink::default()))
        .start()
        .unwrap();
    let ctx = Arc::clone(hub.context());
    let commands = hub.commands();
    let runner = std::thread::spawn(move || hub.run());

    assert!(wait_for(Duration::from_secs(5), || ctx.clock.last_pushed() == Some(109)));
    commands.request(HubCommand::ShowFirstLine, ANSWER).unwrap();
    assert!(ctx.messages.contains("Timestamp of first line: 100"));
    commands.request(HubCommand::ShowLastLine, ANSWER).unwrap();
    assert!(ctx.messages.contains("Timestamp of last line: 109"));
    commands.request(HubCommand::Offset(Some(250)), ANSWER).unwrap();
    assert_eq!(ctx.clock.replay_offset(), 250);
    assert!(ctx.messages.contains("Offset set to 250"));
    commands.request(HubCommand::ShowBuffer, ANSWER).unwrap();
    assert!(ctx.messages.contains("First timestamp:     100"));
    assert!(commands.request(HubCommand::SaveLag, ANSWER).is_err());
    assert!(ctx.messages.contains("Lag logging history is not enabled."));

    commands.request(HubCommand::Quit, ANSWER).unwrap();
    runner.join().unwrap().unwrap();
}
