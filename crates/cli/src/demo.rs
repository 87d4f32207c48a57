//! Demonstration bot: a greeting question, a vague age answer, and a two-step survey conversation.

use serde_json::json;
use switchyard::{
    Button, Condition, Fallback, Handler, Matched, Router, VagueContainer, VagueMatcher,
};

pub fn router() -> switchyard::Result<Router> {
    let mut router = Router::new();

    router.register(
        "start",
        Condition::text_like("/start"),
        Handler::new(|cx| async move {
            let text = format!("Hello, I'm {}. Say hi, or try /survey.", cx.bot().title());
            cx.send_text(&text).await
        }),
    );

    router.register(
        "help",
        Condition::text_like("/help"),
        Handler::new(|cx| async move {
            cx.send_text_with_buttons(
                "Say hi for a question, /survey for a short survey, /whoami to see what I remember, /forget to wipe it.",
                &[
                    Button::literal("Say hi", "hi"),
                    Button::literal("Survey", "/survey"),
                ],
            )
            .await
        }),
    );

    let greet = router.register("greet", Condition::text_like("hi"), greet_handler()?);
    router.add_condition(&greet, Condition::text_like("hey"));
    router.add_condition(&greet, Condition::text_starts_with("hello"));

    router.register("survey", Condition::text_like("/survey"), survey_handler());

    router.register(
        "cancel",
        Condition::text_like("/cancel"),
        Handler::new(|cx| async move { cx.send_text("Cancelled.").await }),
    );

    router.register(
        "whoami",
        Condition::text_like("/whoami"),
        Handler::new(|cx| async move {
            let values = cx.retrieve_values().await?;
            let text = if values.is_empty() {
                "I don't know anything about you yet.".to_string()
            } else {
                values
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            cx.send_text(&text).await
        }),
    );

    router.register(
        "forget",
        Condition::text_like("/forget"),
        Handler::new(|cx| async move {
            cx.clear_values().await?;
            cx.send_text("Forgotten.").await
        }),
    );

    router.set_catch_all(Handler::new(|cx| async move {
        cx.send_text("Sorry, I didn't get that. Try /help.").await
    }));

    Ok(router)
}

fn greet_handler() -> switchyard::Result<Handler> {
    let pet = pet_handler(age_handler()?);
    let dogs = VagueContainer::one_of(["dog", "doggo", "puppy"])?;
    Ok(Handler::new(move |cx| {
        let pet = pet.clone();
        let dogs = dogs.clone();
        async move {
            cx.send_question(
                "Hi! Do you prefer cats or dogs?",
                vec![
                    Button::handler("Cats", pet.clone()),
                    Button::handler("Dogs", pet).with_vague(dogs),
                ],
                None,
            )
            .await
        }
    }))
}

fn pet_handler(age: AgeQuestion) -> Handler {
    Handler::with_value(move |cx, matched| {
        let age = age.clone();
        async move {
            let pick = match matched {
                Matched::Response { definitive, .. } => definitive,
                _ => "that".to_string(),
            };
            cx.store_value("pet", json!(pick)).await?;
            cx.send_text(&format!("Good choice: {}.", pick)).await?;
            cx.send_question(
                "How old are you?",
                vec![Button::handler("Skip", age.answer.clone()).with_vague(age.digits.clone())],
                Some(Fallback::with_value(age.retry.clone(), json!("age"))),
            )
            .await
        }
    })
}

#[derive(Clone)]
struct AgeQuestion {
    answer: Handler,
    retry: Handler,
    digits: VagueContainer,
}

fn age_handler() -> switchyard::Result<AgeQuestion> {
    let answer = Handler::with_value(|cx, matched| async move {
        match matched {
            Matched::Response { definitive, text } if definitive == "age" => {
                cx.store_value("age", json!(text)).await?;
                cx.send_text(&format!("Noted, you are {}.", text)).await
            }
            _ => cx.send_text("No problem.").await,
        }
    });
    let retry = Handler::with_value(|cx, matched| async move {
        let what = match matched {
            Matched::Stage(v) => v.as_str().unwrap_or("answer").to_string(),
            _ => "answer".to_string(),
        };
        cx.send_text(&format!("Please give your {} as a number, or say skip.", what))
            .await
    });
    let digits = VagueContainer::new("age", vec![VagueMatcher::contains(r"\d+")?]);
    Ok(AgeQuestion {
        answer,
        retry,
        digits,
    })
}

fn survey_handler() -> Handler {
    let rate = Handler::with_value(|cx, matched| async move {
        let rating = match matched {
            Matched::Response { definitive, .. } => definitive,
            _ => String::new(),
        };
        cx.store_value("rating", json!(rating)).await?;
        cx.end_conversation().await;
        cx.send_text("Thanks for taking the survey!").await
    });
    let colour = Handler::new(move |cx| {
        let rate = rate.clone();
        async move {
            cx.store_value("colour", json!(cx.text())).await?;
            // Drop the colour fallback before asking for the rating.
            cx.user().state().await.clear_responses();
            let stars = (1..=5)
                .map(|n| Button::handler(n.to_string(), rate.clone()))
                .collect();
            cx.send_question("How would you rate us, 1 to 5?", stars, None)
                .await
        }
    });
    Handler::new(move |cx| {
        let colour = colour.clone();
        async move {
            cx.start_conversation().await;
            cx.send_question(
                "What's your favourite colour? (/cancel to stop)",
                Vec::new(),
                Some(Fallback::new(colour)),
            )
            .await
        }
    })
}
