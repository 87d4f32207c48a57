//! Dispatch scenarios against a recording channel: pipeline order, buttons, conversations,
//! persistence, and per-user serialization.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::{
    Bot, Button, Channel, Condition, Error, EventKind, Fallback, Handler, Location, Matched,
    Message, Outcome, Router, Stage, StoreError, Transcoder, UserStore, VagueContainer,
    VagueMatcher,
};

#[derive(Default)]
struct Recording {
    sent: Mutex<Vec<(String, Vec<String>)>>,
    catch_all: Option<Handler>,
    location: Option<Handler>,
}

impl Recording {
    fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    fn last_buttons(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, b)| b.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Channel for Recording {
    fn id(&self) -> &str {
        "test"
    }

    async fn send_text(&self, _message: &Message, text: &str, buttons: &[Button]) -> anyhow::Result<()> {
        let labels = buttons.iter().map(|b| b.label.clone()).collect();
        self.sent.lock().unwrap().push((text.to_string(), labels));
        Ok(())
    }

    async fn send_photo(&self, message: &Message, url: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.send_text(message, &format!("photo {}", url), buttons).await
    }

    fn catch_all(&self) -> Option<Handler> {
        self.catch_all.clone()
    }

    fn location_handler(&self) -> Option<Handler> {
        self.location.clone()
    }
}

fn text(channel: &Arc<Recording>, t: &str) -> Message {
    Message::text(channel.clone(), "u1", t)
}

fn counting(counter: &Arc<AtomicUsize>) -> Handler {
    let counter = counter.clone();
    Handler::new(move |_cx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn capturing(slot: &Arc<Mutex<Vec<Matched>>>) -> Handler {
    let slot = slot.clone();
    Handler::with_value(move |_cx, matched| {
        let slot = slot.clone();
        async move {
            slot.lock().unwrap().push(matched);
            Ok(())
        }
    })
}

fn reply(text: &'static str) -> Handler {
    Handler::new(move |cx| async move { cx.send_text(text).await })
}

#[tokio::test]
async fn cats_or_dogs_question_is_answered_once() {
    let cats = Arc::new(AtomicUsize::new(0));
    let dogs = Arc::new(AtomicUsize::new(0));
    let (cats_h, dogs_h) = (counting(&cats), counting(&dogs));

    let mut router = Router::new();
    router.register(
        "greet",
        Condition::text_like("hi"),
        Handler::new(move |cx| {
            let buttons = vec![
                Button::handler("Cats", cats_h.clone()),
                Button::handler("Dogs", dogs_h.clone()),
            ];
            async move { cx.send_question("Cats or dogs?", buttons, None).await }
        }),
    );
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let outcome = bot.handle_text(text(&channel, "hi")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::Condition("greet".into())));
    assert_eq!(channel.texts(), vec!["Cats or dogs?"]);
    assert_eq!(channel.last_buttons(), vec!["Cats", "Dogs"]);

    let outcome = bot.handle_text(text(&channel, "  CATS ")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::PendingResponse));
    assert_eq!(cats.load(Ordering::SeqCst), 1);
    assert_eq!(dogs.load(Ordering::SeqCst), 0);

    let user = bot.users().get("test:u1").await.unwrap();
    assert!(!user.state().await.has_pending());

    // Consumed: a second "cats" finds nothing.
    assert_eq!(bot.handle_text(text(&channel, "cats")).await.unwrap(), Outcome::Unhandled);
    assert_eq!(cats.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn vague_digits_hand_over_the_typed_text() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bot = Bot::new(Router::new());
    let channel = Arc::new(Recording::default());

    let user = bot.users().get_or_create("test:u1").await;
    user.state().await.remember_response(
        Button::handler("Age", capturing(&seen))
            .with_vague(VagueContainer::new("age", vec![VagueMatcher::regex(r"\d+").unwrap()])),
    );

    let outcome = bot.handle_text(text(&channel, "42")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::PendingResponse));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[Matched::Response {
            definitive: "age".into(),
            text: "42".into()
        }]
    );
}

#[tokio::test]
async fn unhandled_falls_through_channel_then_router_catch_all() {
    let channel_hits = Arc::new(AtomicUsize::new(0));
    let router_hits = Arc::new(AtomicUsize::new(0));

    let bare = Arc::new(Recording::default());
    let bot = Bot::new(Router::new());
    let outcome = bot.handle_text(text(&bare, "anything")).await.unwrap();
    assert_eq!(outcome, Outcome::Unhandled);
    assert!(!outcome.handled());

    let mut router = Router::new();
    router.set_catch_all(counting(&router_hits));
    let bot = Bot::new(router);

    assert_eq!(
        bot.handle_text(text(&bare, "anything")).await.unwrap(),
        Outcome::Handled(Stage::CatchAll)
    );

    let with_catch_all = Arc::new(Recording {
        catch_all: Some(counting(&channel_hits)),
        ..Recording::default()
    });
    assert_eq!(
        bot.handle_text(text(&with_catch_all, "anything")).await.unwrap(),
        Outcome::Handled(Stage::ChannelCatchAll)
    );
    assert_eq!(channel_hits.load(Ordering::SeqCst), 1);
    assert_eq!(router_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fallback_gets_the_stage_value_and_stays() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let yes = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register("maybe", Condition::text_like("maybe"), reply("global"));
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let user = bot.users().get_or_create("test:u1").await;
    user.state().await.remember_responses(
        [Button::handler("Yes", counting(&yes))],
        Some(Fallback::with_value(capturing(&seen), json!("step-2"))),
    );

    // The fallback runs before global conditions.
    let outcome = bot.handle_text(text(&channel, "maybe")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::Fallback));
    assert_eq!(seen.lock().unwrap().as_slice(), &[Matched::Stage(json!("step-2"))]);
    assert!(user.state().await.get_on_other_response().is_some());

    bot.handle_text(text(&channel, "yes")).await.unwrap();
    assert_eq!(yes.load(Ordering::SeqCst), 1);
    assert!(user.state().await.get_on_other_response().is_none());
}

#[tokio::test]
async fn literal_buttons_redispatch_their_text() {
    let help = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    router.register("help", Condition::text_like("/help"), counting(&help));
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());
    let user = bot.users().get_or_create("test:u1").await;

    user.state()
        .await
        .remember_response(Button::literal("Help", "/help"));
    let click = Message::button_click(channel.clone(), "u1", "Help");
    assert_eq!(
        bot.handle_button_click(click).await.unwrap(),
        Outcome::Handled(Stage::Condition("help".into()))
    );

    // Typing the label works the same way.
    user.state()
        .await
        .remember_response(Button::literal("Help", "/help"));
    assert_eq!(
        bot.handle_text(text(&channel, "help")).await.unwrap(),
        Outcome::Handled(Stage::Condition("help".into()))
    );
    assert_eq!(help.load(Ordering::SeqCst), 2);
    assert!(!user.state().await.has_pending());
}

#[tokio::test]
async fn handler_buttons_are_invoked_directly() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bot = Bot::new(Router::new());
    let channel = Arc::new(Recording::default());
    let user = bot.users().get_or_create("test:u1").await;
    user.state()
        .await
        .remember_response(Button::handler("Cats", capturing(&seen)));

    let click = Message::button_click(channel.clone(), "u1", "Cats");
    assert_eq!(
        bot.handle_event(click).await.unwrap(),
        Outcome::Handled(Stage::Button)
    );
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[Matched::Response {
            definitive: "Cats".into(),
            text: "Cats".into()
        }]
    );

    // A stale click with nothing pending goes through the text pipeline.
    let stale = Message::button_click(channel.clone(), "u1", "Cats");
    assert_eq!(bot.handle_event(stale).await.unwrap(), Outcome::Unhandled);
}

#[tokio::test]
async fn cancel_command_ends_the_conversation_then_dispatches() {
    let mut router = Router::new();
    router.register("cancel", Condition::text_like("/cancel"), reply("Cancelled."));
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());
    let user = bot.users().get_or_create("test:u1").await;

    user.state()
        .await
        .remember_response(Button::literal("Outside", "/outside"));
    let first = text(&channel, "start");
    bot.start_conversation(&first).await;
    user.state()
        .await
        .remember_response(Button::literal("Inside", "/inside"));
    assert_eq!(user.state().await.pending_labels(), vec!["Inside"]);

    let outcome = bot.handle_text(text(&channel, "/CANCEL")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::Condition("cancel".into())));
    assert_eq!(channel.texts(), vec!["Cancelled."]);

    let state = user.state().await;
    assert!(!state.in_conversation());
    assert_eq!(state.pending_labels(), vec!["Outside"]);
}

#[tokio::test]
async fn typed_label_for_the_cancel_command_ends_the_conversation() {
    let mut router = Router::new();
    router.register("cancel", Condition::text_like("/cancel"), reply("Cancelled."));
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());
    let user = bot.users().get_or_create("test:u1").await;

    bot.start_conversation(&text(&channel, "start")).await;
    user.state()
        .await
        .remember_response(Button::literal("Stop", "/cancel"));

    let outcome = bot.handle_text(text(&channel, "stop")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::Condition("cancel".into())));
    assert_eq!(channel.texts(), vec!["Cancelled."]);
    assert!(!user.state().await.in_conversation());
}

#[tokio::test]
async fn alternatives_matching_together_invoke_the_handler_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    let greet = router.register("hi", Condition::text_starts_with("hi"), counting(&hits));
    router.add_condition(&greet, Condition::text_like("hi there"));
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let outcome = bot.handle_text(text(&channel, "Hi there")).await.unwrap();
    assert_eq!(outcome, Outcome::Handled(Stage::Condition("hi".into())));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_errors_reach_the_adapter() {
    let mut router = Router::new();
    router.register(
        "boom",
        Condition::text_like("boom"),
        Handler::new(|_cx| async { Err(anyhow::anyhow!("handler exploded")) }),
    );
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    match bot.handle_text(text(&channel, "boom")).await {
        Err(Error::Handler(e)) => assert_eq!(e.to_string(), "handler exploded"),
        other => panic!("expected handler error, got {:?}", other),
    }
}

struct FailingStore;

#[async_trait]
impl UserStore for FailingStore {
    async fn retrieve(&self, _c: &str, _u: &str) -> Result<Map<String, Value>, StoreError> {
        Err(StoreError::Backend("offline".into()))
    }

    async fn store(&self, _c: &str, _u: &str, _k: &str, _v: Value) -> Result<(), StoreError> {
        Err(StoreError::Backend("offline".into()))
    }

    async fn clear(&self, _c: &str, _u: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("offline".into()))
    }
}

#[tokio::test]
async fn persistence_failures_propagate() {
    let mut router = Router::new();
    router.register(
        "remember",
        Condition::text_starts_with("remember"),
        Handler::new(|cx| async move {
            cx.store_value("note", json!(cx.text())).await?;
            cx.send_text("stored").await
        }),
    );
    let bot = Bot::new(router).with_store(Arc::new(FailingStore));
    let channel = Arc::new(Recording::default());
    let msg = text(&channel, "remember this");

    assert!(matches!(
        bot.retrieve_value(&msg, "note").await,
        Err(Error::Persistence(StoreError::Backend(_)))
    ));
    assert!(matches!(
        bot.clear_values(&msg).await,
        Err(Error::Persistence(_))
    ));

    match bot.handle_text(msg).await {
        Err(Error::Handler(e)) => assert!(matches!(
            e.downcast_ref::<Error>(),
            Some(Error::Persistence(_))
        )),
        other => panic!("expected persistence failure, got {:?}", other),
    }
    assert!(channel.texts().is_empty());
}

#[tokio::test]
async fn user_data_without_a_store_lives_in_memory() {
    let bot = Bot::new(Router::new());
    let channel = Arc::new(Recording::default());
    let msg = text(&channel, "x");

    bot.store_value(&msg, "age", json!(42)).await.unwrap();
    assert_eq!(bot.retrieve_value(&msg, "age").await.unwrap(), Some(json!(42)));
    assert_eq!(bot.retrieve_value(&msg, "missing").await.unwrap(), None);
    bot.clear_values(&msg).await.unwrap();
    assert!(bot.retrieve_values(&msg).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_events_are_serialized() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    {
        let (in_flight, peak) = (in_flight.clone(), peak.clone());
        router.register(
            "slow",
            Condition::text_like("slow"),
            Handler::new(move |_cx| {
                let (in_flight, peak) = (in_flight.clone(), peak.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
    }
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let bot = bot.clone();
        let msg = text(&channel, "slow");
        tasks.push(tokio::spawn(async move { bot.handle_text(msg).await }));
    }
    for t in tasks {
        assert!(t.await.unwrap().unwrap().handled());
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_users_run_in_parallel() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut router = Router::new();
    {
        let barrier = barrier.clone();
        router.register(
            "meet",
            Condition::text_like("meet"),
            Handler::new(move |_cx| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            }),
        );
    }
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let a = tokio::spawn({
        let bot = bot.clone();
        let msg = Message::text(channel.clone(), "alice", "meet");
        async move { bot.handle_text(msg).await }
    });
    let b = tokio::spawn({
        let bot = bot.clone();
        let msg = Message::text(channel.clone(), "bob", "meet");
        async move { bot.handle_text(msg).await }
    });
    let both = tokio::time::timeout(Duration::from_secs(5), async { (a.await, b.await) })
        .await
        .expect("users blocked each other");
    assert!(both.0.unwrap().unwrap().handled());
    assert!(both.1.unwrap().unwrap().handled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_a_user_waits_for_its_running_handler() {
    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
    let entered_tx = Arc::new(Mutex::new(Some(entered_tx)));
    let release = Arc::new(tokio::sync::Notify::new());
    let mut router = Router::new();
    {
        let release = release.clone();
        router.register(
            "ask",
            Condition::text_like("ask"),
            Handler::new(move |cx| {
                let release = release.clone();
                let entered = entered_tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = entered {
                        let _ = tx.send(());
                    }
                    release.notified().await;
                    cx.send_question("Sure?", vec![Button::literal("Yes", "/yes")], None)
                        .await
                }
            }),
        );
    }
    let bot = Bot::new(router);
    let channel = Arc::new(Recording::default());

    let running = {
        let bot = bot.clone();
        let msg = text(&channel, "ask");
        tokio::spawn(async move { bot.handle_text(msg).await })
    };
    entered_rx.await.unwrap();
    let dispatched = bot.users().get("test:u1").await.unwrap();

    let removing = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.users().remove("test:u1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!removing.is_finished());

    release.notify_one();
    assert!(running.await.unwrap().unwrap().handled());
    let removed = removing.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&removed, &dispatched));
    assert_eq!(removed.state().await.pending_labels(), vec!["Yes"]);
    assert!(bot.users().get("test:u1").await.is_none());
}

#[tokio::test]
async fn unknown_event_types_are_rejected() {
    let bot = Bot::new(Router::new());
    let channel = Arc::new(Recording::default());
    let sticker = Message::new(channel.clone(), "u1", EventKind::Other("sticker".into()), None);
    assert!(matches!(
        bot.handle_event(sticker).await,
        Err(Error::UnknownEventType(kind)) if kind == "sticker"
    ));

    let empty = Message::new(channel.clone(), "u1", EventKind::Text, None);
    assert!(matches!(
        bot.handle_event(empty).await,
        Err(Error::Normalization(_))
    ));
}

#[tokio::test]
async fn locations_use_the_channel_handler() {
    let hits = Arc::new(AtomicUsize::new(0));
    let bot = Bot::new(Router::new());
    let at = Location {
        latitude: 52.52,
        longitude: 13.40,
    };

    let plain = Arc::new(Recording::default());
    let msg = Message::location(plain.clone(), "u1", at);
    assert_eq!(bot.handle_event(msg).await.unwrap(), Outcome::Unhandled);

    let aware = Arc::new(Recording {
        location: Some(counting(&hits)),
        ..Recording::default()
    });
    let msg = Message::location(aware.clone(), "u1", at);
    assert_eq!(
        bot.handle_event(msg).await.unwrap(),
        Outcome::Handled(Stage::Location)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_text_to_uses_the_last_message() {
    let bot = Bot::new(Router::new());
    let channel = Arc::new(Recording::default());
    assert!(bot.send_text_to("test:u1", "hello?").await.is_err());

    bot.handle_text(text(&channel, "hi")).await.unwrap();
    bot.send_text_to("test:u1", "later").await.unwrap();
    assert_eq!(channel.texts(), vec!["later"]);
}

struct Shortcodes;

impl Transcoder for Shortcodes {
    fn demojize(&self, text: &str) -> String {
        text.replace('\u{1F431}', ":cat:")
    }

    fn emojize(&self, text: &str) -> String {
        text.replace(":cat:", "\u{1F431}")
    }
}

#[tokio::test]
async fn transcoder_applies_both_ways() {
    let mut router = Router::new();
    router.register(
        "cat",
        Condition::text_like("i like :cat:"),
        reply("me too :cat:"),
    );
    let bot = Bot::new(router).with_transcoder(Arc::new(Shortcodes));
    let channel = Arc::new(Recording::default());

    let outcome = bot
        .handle_text(text(&channel, "I like \u{1F431}"))
        .await
        .unwrap();
    assert!(outcome.handled());
    assert_eq!(channel.texts(), vec!["me too \u{1F431}"]);
}
