use std::time::Duration;

use rand::Rng;
use tether_models::{ServerEvent, StoredMessage};

use crate::chat::{self, OutgoingMessage};
use crate::AppState;

const MIN_REPLY_DELAY_MS: u64 = 2_000;
const MAX_REPLY_DELAY_MS: u64 = 5_000;

/// Topic buckets for keyword categorization, checked in this fixed order so
/// the same input text always lands in the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Greeting,
    Question,
    Work,
    Career,
    Technology,
    Appreciation,
    Closing,
    General,
}

const GREETING_KEYWORDS: &[&str] = &["hello", "hi", "hey", "good morning", "good afternoon", "good evening"];
const QUESTION_KEYWORDS: &[&str] = &["?", "how", "what", "why", "when", "where", "could you", "can you"];
const WORK_KEYWORDS: &[&str] = &["project", "deadline", "meeting", "team", "client", "report"];
const CAREER_KEYWORDS: &[&str] = &["job", "role", "position", "hiring", "opportunity", "interview", "resume", "career"];
const TECHNOLOGY_KEYWORDS: &[&str] = &["code", "software", "engineer", "rust", "api", "database", "cloud", "tech"];
const APPRECIATION_KEYWORDS: &[&str] = &["thanks", "thank you", "appreciate", "grateful", "awesome", "great work"];
const CLOSING_KEYWORDS: &[&str] = &["bye", "goodbye", "see you", "talk later", "take care", "good night"];

const GREETING_REPLIES: &[&str] = &[
    "Hello! Great to hear from you.",
    "Hi there! How have you been?",
    "Hey! Good to connect again.",
];
const QUESTION_REPLIES: &[&str] = &[
    "That's a good question. Let me think about it and get back to you.",
    "Interesting question! I'd say it depends on the context.",
    "Hmm, I'll need to look into that a bit more before I can give you a solid answer.",
];
const WORK_REPLIES: &[&str] = &[
    "The project side of things has been busy lately, but in a good way.",
    "I know how those deadlines go. Hang in there!",
    "Sounds like the team has a lot on its plate. Happy to help if I can.",
];
const CAREER_REPLIES: &[&str] = &[
    "That opportunity sounds exciting. You should definitely explore it.",
    "I've heard good things about that role. Want me to share some pointers?",
    "Career moves like that take courage. I think you're on the right track.",
];
const TECHNOLOGY_REPLIES: &[&str] = &[
    "I've been reading about that tech stack too. Impressive stuff.",
    "The tooling in that space is evolving fast. Worth keeping an eye on.",
    "Sounds like a solid engineering choice to me.",
];
const APPRECIATION_REPLIES: &[&str] = &[
    "You're very welcome! Glad I could help.",
    "Anytime! Don't hesitate to reach out again.",
    "Happy to hear that. Thanks for letting me know!",
];
const CLOSING_REPLIES: &[&str] = &[
    "Take care! Let's catch up again soon.",
    "Goodbye for now. It was great talking with you!",
    "Talk later! Wishing you a productive week.",
];
const GENERAL_REPLIES: &[&str] = &[
    "Thanks for sharing that. I'll keep it in mind.",
    "Got it. Let's keep in touch about this.",
    "Interesting! Tell me more when you get a chance.",
];

/// Deterministic keyword categorization of a message body. Single-word
/// keywords match whole words only ("hi" must not fire inside "this" or
/// "hiring"); phrases and punctuation match as substrings.
pub fn categorize(text: &str) -> Topic {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let buckets: [(Topic, &[&str]); 7] = [
        (Topic::Greeting, GREETING_KEYWORDS),
        (Topic::Question, QUESTION_KEYWORDS),
        (Topic::Work, WORK_KEYWORDS),
        (Topic::Career, CAREER_KEYWORDS),
        (Topic::Technology, TECHNOLOGY_KEYWORDS),
        (Topic::Appreciation, APPRECIATION_KEYWORDS),
        (Topic::Closing, CLOSING_KEYWORDS),
    ];
    for (topic, keywords) in buckets {
        if keywords
            .iter()
            .any(|kw| keyword_matches(kw, &lowered, &words))
        {
            return topic;
        }
    }
    Topic::General
}

fn keyword_matches(keyword: &str, lowered: &str, words: &[&str]) -> bool {
    if keyword.chars().all(|c| c.is_alphanumeric()) {
        words.contains(&keyword)
    } else {
        lowered.contains(keyword)
    }
}

pub fn reply_pool(topic: Topic) -> &'static [&'static str] {
    match topic {
        Topic::Greeting => GREETING_REPLIES,
        Topic::Question => QUESTION_REPLIES,
        Topic::Work => WORK_REPLIES,
        Topic::Career => CAREER_REPLIES,
        Topic::Technology => TECHNOLOGY_REPLIES,
        Topic::Appreciation => APPRECIATION_REPLIES,
        Topic::Closing => CLOSING_REPLIES,
        Topic::General => GENERAL_REPLIES,
    }
}

/// Hook fired after a message is durably persisted. When the receiver is a
/// synthetic account, schedule a delayed contextual reply through the normal
/// store path. The task is not tied to the triggering connection: it fires
/// even if the sender disconnects (the reply is durable and will be fetched
/// on the next conversation load), and it only stops early on process
/// shutdown. Failures are logged and swallowed; this is a simulation
/// feature, not guaranteed delivery.
pub fn on_message_persisted(state: &AppState, message: &StoredMessage) {
    if !state.is_synthetic(&message.receiver_id) || state.is_synthetic(&message.sender_id) {
        return;
    }

    // Pick delay and reply up front so the task itself is deterministic.
    let (delay_ms, reply) = {
        let mut rng = rand::thread_rng();
        let delay_ms = rng.gen_range(MIN_REPLY_DELAY_MS..=MAX_REPLY_DELAY_MS);
        let pool = reply_pool(categorize(&message.content));
        (delay_ms, pool[rng.gen_range(0..pool.len())].to_string())
    };

    let state = state.clone();
    let synthetic_id = message.receiver_id.clone();
    let original_sender = message.sender_id.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            _ = state.shutdown.notified() => {
                tracing::debug!(synthetic_id, "auto-reply cancelled by shutdown");
                return;
            }
        }

        let outgoing = OutgoingMessage {
            receiver_id: original_sender.clone(),
            content: reply,
            message_type: None,
            attachment: None,
        };
        match chat::send_message(&state, &synthetic_id, outgoing).await {
            Ok(stored) => {
                // Push to the original sender if they are still online;
                // otherwise the reply waits in the store.
                if let Some(handle) = state.presence.lookup(&original_sender) {
                    handle.send(ServerEvent::ReceiveMessage(stored));
                }
            }
            Err(e) => {
                tracing::warn!(synthetic_id, "auto-reply failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use crate::{AppConfig, AppState};
    use tokio::sync::mpsc;

    #[test]
    fn categorization_is_deterministic_and_ordered() {
        assert_eq!(categorize("Hello Sam!"), Topic::Greeting);
        // Greeting wins over question because buckets are checked in order.
        assert_eq!(categorize("hi, how are you?"), Topic::Greeting);
        assert_eq!(categorize("How does this work?"), Topic::Question);
        assert_eq!(categorize("the project deadline slipped"), Topic::Work);
        assert_eq!(categorize("saw an interesting job opening"), Topic::Career);
        assert_eq!(categorize("refactoring the api layer"), Topic::Technology);
        assert_eq!(categorize("thanks a lot!"), Topic::Appreciation);
        assert_eq!(categorize("ok, talk later"), Topic::Closing);
        assert_eq!(categorize("lorem ipsum"), Topic::General);
    }

    #[test]
    fn single_word_keywords_respect_word_boundaries() {
        // "hi" inside "this"/"hiring"/"thinking" must not hit the greeting
        // bucket.
        assert_eq!(categorize("we should discuss the hiring plan"), Topic::Career);
        assert_eq!(categorize("thinking it over"), Topic::General);
        assert_eq!(categorize("this could use another pass"), Topic::General);
        // Phrases still match as a whole.
        assert_eq!(categorize("good morning everyone"), Topic::Greeting);
        assert_eq!(categorize("could you take a look"), Topic::Question);
    }

    async fn test_state() -> AppState {
        let pool = tether_db::create_pool("sqlite::memory:", 1)
            .await
            .expect("pool");
        tether_db::run_migrations(&pool).await.expect("migrations");
        AppState::new(pool, AppConfig::default())
    }

    #[tokio::test]
    async fn synthetic_receiver_sends_a_delayed_reply() {
        let state = test_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.presence.register("alice", ConnectionHandle::new(tx));

        let outgoing = OutgoingMessage {
            receiver_id: "sim_coach".to_string(),
            content: "thanks for the intro!".to_string(),
            message_type: None,
            attachment: None,
        };
        let stored = chat::send_message(&state, "alice", outgoing)
            .await
            .expect("send");
        on_message_persisted(&state, &stored);

        // Reply lands 2-5s later; give it headroom.
        let event = tokio::time::timeout(Duration::from_secs(8), rx.recv())
            .await
            .expect("reply within the delay window")
            .expect("channel open");
        match event {
            ServerEvent::ReceiveMessage(reply) => {
                assert_eq!(reply.sender_id, "sim_coach");
                assert_eq!(reply.receiver_id, "alice");
                assert!(reply_pool(Topic::Appreciation).contains(&reply.content.as_str()));
            }
            other => panic!("wrong event: {other:?}"),
        }

        // The reply is durable, not just pushed.
        assert_eq!(chat::unread_total(&state, "alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn no_reply_for_human_or_synthetic_sender() {
        let state = test_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.presence.register("alice", ConnectionHandle::new(tx));

        // Human receiver: the hook must not schedule anything.
        let to_human = chat::send_message(
            &state,
            "sim_coach",
            OutgoingMessage {
                receiver_id: "alice".to_string(),
                content: "hello!".to_string(),
                message_type: None,
                attachment: None,
            },
        )
        .await
        .expect("send");
        on_message_persisted(&state, &to_human);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        // Only the direct message itself exists, no scheduled reply row.
        assert_eq!(chat::unread_total(&state, "sim_coach").await.unwrap(), 0);
    }

    #[test]
    fn every_bucket_has_replies() {
        for topic in [
            Topic::Greeting,
            Topic::Question,
            Topic::Work,
            Topic::Career,
            Topic::Technology,
            Topic::Appreciation,
            Topic::Closing,
            Topic::General,
        ] {
            assert!(!reply_pool(topic).is_empty());
        }
    }
}
