//! Steps over [`Event`] that flows are usually built from.

use std::str::FromStr;

use parley_core::Event;
use parley_step::{certain, Failure, Step};

/// The identity step over events; the start of every pipeline.
pub fn root() -> Step<Event, Event> {
    certain()
}

/// The message body, trimmed.
pub fn text() -> Step<Event, String> {
    root().map(|event| event.message.trim().to_string())
}

/// Matches `/name` or `/name args`, yielding the trimmed arguments.
pub fn command(name: &str) -> Step<Event, String> {
    let prefix = format!("/{name}");
    text().try_map(move |body| {
        let rest = body.strip_prefix(prefix.as_str()).ok_or_else(Failure::silent)?;
        if rest.is_empty() {
            Ok(String::new())
        } else if rest.starts_with(char::is_whitespace) {
            Ok(rest.trim_start().to_string())
        } else {
            // "/echoes" is not "/echo"
            Err(Failure::silent())
        }
    })
}

pub fn in_group() -> Step<Event, Event> {
    root().pass(Event::is_group)
}

pub fn in_private() -> Step<Event, Event> {
    root().pass(Event::is_private)
}

/// The sender's user id.
pub fn sender() -> Step<Event, u64> {
    root().map(|event| event.user_id)
}

/// Events from a group owner or admin.
pub fn by_admin() -> Step<Event, Event> {
    root().pass(|event| {
        event
            .sender
            .as_ref()
            .and_then(|profile| profile.role)
            .is_some_and(|role| role.is_admin())
    })
}

/// Parse trimmed text into `T`. Fails silently; add a message with `.fail`.
pub fn parse<T>() -> Step<String, T>
where
    T: FromStr + Send + 'static,
{
    Step::from_fn(|s: String| s.trim().parse::<T>().map_err(|_| Failure::silent()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Role, SenderProfile};

    #[tokio::test]
    async fn command_matches_name_and_splits_arguments() {
        let echo = command("echo");
        assert_eq!(echo.run(Event::private(1, "/echo hi there")).await, Ok("hi there".to_string()));
        assert_eq!(echo.run(Event::private(1, "  /echo")).await, Ok(String::new()));
        assert!(echo.run(Event::private(1, "/echoes")).await.is_err());
        assert!(echo.run(Event::private(1, "echo hi")).await.is_err());
    }

    #[tokio::test]
    async fn scope_filters() {
        assert!(in_group().run(Event::group(1, 2, "x")).await.is_ok());
        assert!(in_group().run(Event::private(2, "x")).await.is_err());
        assert!(in_private().run(Event::private(2, "x")).await.is_ok());
        assert!(in_private().run(Event::discuss(3, 2, "x")).await.is_err());
    }

    #[tokio::test]
    async fn text_then_parse() {
        let number = text().then(parse::<i64>()).fail("send a number");
        assert_eq!(number.run(Event::private(1, " 12 ")).await, Ok(12));
        let failure = number.run(Event::private(1, "twelve")).await.unwrap_err();
        assert_eq!(failure.message(), Some("send a number"));
    }

    #[tokio::test]
    async fn admin_filter_reads_sender_role() {
        let mut event = Event::group(1, 2, "x");
        assert!(by_admin().run(event.clone()).await.is_err());

        event.sender = Some(SenderProfile {
            role: Some(Role::Admin),
            ..SenderProfile::default()
        });
        assert!(by_admin().run(event).await.is_ok());
        assert_eq!(sender().run(Event::private(8, "x")).await, Ok(8));
    }
}
