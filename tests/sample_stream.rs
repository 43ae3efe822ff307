//! Sample-stream behavior: broadcast to every subscriber, event filtering,
//! raw passthrough, and per-subscription ordering.

mod support;

use support::{ScriptedTransport, expect_event, expect_no_event, filter, status, tuning};
use tweetmux::controller::StreamController;

#[tokio::test(start_paused = true)]
async fn broadcasts_passing_events_to_every_subscriber() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());

    let mut a = controller.subscribe(vec![]).unwrap();
    let mut b = controller.subscribe(vec![]).unwrap();

    feed.frame(&status("en", "hi"));
    assert_eq!(expect_event(&mut a).await.text(), Some("hi"));
    assert_eq!(expect_event(&mut b).await.text(), Some("hi"));

    // Not a status update (no in_reply_to_status_id) and wrong language.
    feed.frame(r#"{"lang":"fr","text":"x"}"#);
    expect_no_event(&mut a).await;
    expect_no_event(&mut b).await;

    // The sample stream never sends keywords upstream.
    assert_eq!(transport.connects(), vec![Vec::<String>::new()]);
}

#[tokio::test(start_paused = true)]
async fn drops_non_statuses_disallowed_languages_and_bad_json() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());
    let mut subscription = controller.subscribe(vec![]).unwrap();

    feed.frame(r#"{"delete":{"status":{"id":7}}}"#);
    feed.frame(&status("fr", "salut"));
    feed.frame("{broken json");
    feed.frame(&status("no", "hei"));

    // Only the Norwegian status survives the filter.
    assert_eq!(expect_event(&mut subscription).await.text(), Some("hei"));
    expect_no_event(&mut subscription).await;
}

#[tokio::test(start_paused = true)]
async fn forwards_the_original_json_verbatim() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());
    let mut subscription = controller.subscribe(vec![]).unwrap();

    let json = r#"{"in_reply_to_status_id": null, "lang": "en", "text": "hi", "user": {"screen_name": "jan"}}"#;
    feed.frame(json);
    let event = expect_event(&mut subscription).await;
    assert_eq!(event.raw(), json);
}

#[tokio::test(start_paused = true)]
async fn one_subscription_sees_events_in_receive_order() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());
    let mut subscription = controller.subscribe(vec![]).unwrap();

    for i in 0..10 {
        feed.frame(&status("en", &format!("event {i}")));
    }
    for i in 0..10 {
        let event = expect_event(&mut subscription).await;
        assert_eq!(event.text(), Some(format!("event {i}").as_str()));
    }
}

#[tokio::test(start_paused = true)]
async fn keepalives_and_split_frames_are_handled() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());
    let mut subscription = controller.subscribe(vec![]).unwrap();

    // Keep-alives ahead of a frame delivered in three chunks.
    feed.keepalive();
    feed.keepalive();
    let payload = status("en", "split");
    feed.chunk(format!("{}\n", payload.len()));

    let bytes = payload.into_bytes();
    let (head, tail) = bytes.split_at(5);
    feed.chunk(head.to_vec());
    feed.chunk(tail.to_vec());

    assert_eq!(expect_event(&mut subscription).await.text(), Some("split"));
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_gets_only_later_events() {
    let transport = ScriptedTransport::new();
    let feed = transport.serve();
    let controller = StreamController::sample(transport.clone(), filter(), tuning());

    let mut early = controller.subscribe(vec![]).unwrap();
    feed.frame(&status("en", "first"));
    assert_eq!(expect_event(&mut early).await.text(), Some("first"));

    let mut late = controller.subscribe(vec![]).unwrap();
    feed.frame(&status("en", "second"));
    assert_eq!(expect_event(&mut early).await.text(), Some("second"));
    assert_eq!(expect_event(&mut late).await.text(), Some("second"));
    expect_no_event(&mut late).await;
}
