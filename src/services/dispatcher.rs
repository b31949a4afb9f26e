//! Event dispatch: decode raw hub invocations and fan them out to observers.

use std::panic::{self, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::error::{HubError, HubResult};
use crate::models::chat::{ChatId, UserId};
use crate::models::event::{
    InboundEvent, MessageDto, RawInvocation, MESSAGES_READ, RECEIVE_MESSAGE, USER_STATUS_CHANGED,
    USER_STOPPED_TYPING, USER_TYPING,
};
use crate::services::observer::{HubObserver, ObserverEntry, ObserverResult};

/// Decode one hub invocation.
///
/// `Ok(None)` for targets this client does not know, so newer servers can add
/// events. Known targets with unusable arguments yield [`HubError::DecodeFailure`].
pub fn decode(raw: &RawInvocation) -> HubResult<Option<InboundEvent>> {
    let event = match raw.target.as_str() {
        RECEIVE_MESSAGE => {
            let (message,): (MessageDto,) = arguments(raw, 1)?;
            InboundEvent::MessageReceived(message)
        }
        USER_STATUS_CHANGED => {
            let (user_id, is_online): (UserId, bool) = arguments(raw, 2)?;
            InboundEvent::UserStatusChanged { user_id, is_online }
        }
        USER_TYPING => {
            let (user_id, chat_id): (UserId, ChatId) = arguments(raw, 2)?;
            InboundEvent::UserTyping { user_id, chat_id }
        }
        USER_STOPPED_TYPING => {
            let (user_id, chat_id): (UserId, ChatId) = arguments(raw, 2)?;
            InboundEvent::UserStoppedTyping { user_id, chat_id }
        }
        MESSAGES_READ => {
            let (user_id, chat_id): (UserId, ChatId) = arguments(raw, 2)?;
            InboundEvent::MessagesRead { user_id, chat_id }
        }
        other => {
            trace!(event = other, "ignoring unknown hub event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Deserialize the first `arity` positional arguments as a tuple. Extra arguments are ignored.
fn arguments<T: DeserializeOwned>(raw: &RawInvocation, arity: usize) -> HubResult<T> {
    let head: Vec<Value> = raw.arguments.iter().take(arity).cloned().collect();
    serde_json::from_value(Value::Array(head)).map_err(|e| HubError::DecodeFailure {
        event: raw.target.clone(),
        reason: e.to_string(),
    })
}

/// Deliver `event` to each observer in order. Returns how many observers failed.
///
/// A failing or panicking observer is logged and skipped; the rest still run.
pub fn dispatch(observers: &[ObserverEntry], event: &InboundEvent) -> usize {
    let mut failed = 0;
    for (id, observer) in observers {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(observer.as_ref(), event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                warn!(observer = %id, event = event.name(), error = %e, "observer failed");
            }
            Err(_) => {
                failed += 1;
                error!(observer = %id, event = event.name(), "observer panicked");
            }
        }
    }
    failed
}

fn deliver(observer: &dyn HubObserver, event: &InboundEvent) -> ObserverResult {
    match event {
        InboundEvent::Connected => observer.on_connected(),
        InboundEvent::Disconnected => observer.on_disconnected(),
        InboundEvent::MessageReceived(message) => observer.on_message_received(message),
        InboundEvent::UserStatusChanged { user_id, is_online } => {
            observer.on_user_status_changed(*user_id, *is_online)
        }
        InboundEvent::UserTyping { user_id, chat_id } => observer.on_user_typing(*user_id, *chat_id),
        InboundEvent::UserStoppedTyping { user_id, chat_id } => {
            observer.on_user_stopped_typing(*user_id, *chat_id)
        }
        InboundEvent::MessagesRead { user_id, chat_id } => {
            observer.on_messages_read(*user_id, *chat_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::observer::ObserverRegistry;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn decodes_receive_message() {
        let raw = RawInvocation::new(
            "ReceiveMessage",
            vec![json!({
                "id": 1, "senderId": 2, "senderName": "Bo", "chatId": 42,
                "content": "hey", "sentAt": "2024-01-01T00:00:00Z"
            })],
        );
        match decode(&raw).unwrap() {
            Some(InboundEvent::MessageReceived(message)) => {
                assert_eq!(message.chat_id, ChatId(42));
                assert_eq!(message.content, "hey");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn typing_chat_id_as_string_normalizes() {
        let raw = RawInvocation::new("UserTyping", vec![json!(5), json!("42")]);
        assert_eq!(
            decode(&raw).unwrap(),
            Some(InboundEvent::UserTyping {
                user_id: UserId(5),
                chat_id: ChatId(42)
            })
        );
    }

    #[test]
    fn messages_read_with_numeric_chat_id() {
        let raw = RawInvocation::new("MessagesRead", vec![json!(5), json!(42)]);
        assert_eq!(
            decode(&raw).unwrap(),
            Some(InboundEvent::MessagesRead {
                user_id: UserId(5),
                chat_id: ChatId(42)
            })
        );
    }

    #[test]
    fn unknown_target_is_ignored() {
        let raw = RawInvocation::new("TaskAssigned", vec![json!({"id": 1})]);
        assert_eq!(decode(&raw).unwrap(), None);
    }

    #[test]
    fn malformed_known_event_is_decode_failure() {
        let raw = RawInvocation::new("UserStatusChanged", vec![json!(5)]);
        assert!(matches!(
            decode(&raw),
            Err(HubError::DecodeFailure { ref event, .. }) if event == "UserStatusChanged"
        ));
        let raw = RawInvocation::new("ReceiveMessage", vec![json!("not an object")]);
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn extra_arguments_are_ignored() {
        let raw = RawInvocation::new("UserStatusChanged", vec![json!(5), json!(true), json!("x")]);
        assert_eq!(
            decode(&raw).unwrap(),
            Some(InboundEvent::UserStatusChanged {
                user_id: UserId(5),
                is_online: true
            })
        );
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl HubObserver for Recorder {
        fn on_user_status_changed(&self, _user_id: UserId, _is_online: bool) -> ObserverResult {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                panic!("observer {} blew up", self.name);
            }
            Ok(())
        }
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        for (name, fail) in [("first", true), ("second", false), ("third", false)] {
            registry.register(Arc::new(Recorder {
                name,
                log: log.clone(),
                fail,
            }));
        }
        let event = InboundEvent::UserStatusChanged {
            user_id: UserId(1),
            is_online: true,
        };
        assert_eq!(dispatch(&registry.snapshot(), &event), 1);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }
}
