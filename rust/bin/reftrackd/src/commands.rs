use crate::telegram::Message;

/// Bot commands the dispatcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start [code]`
    Start(String),
    MyReferrals,
    Stats,
}

/// Split `/name@bot args` into a known command. Anything else is `None`.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);

    match name {
        "start" => Some(Command::Start(args.to_string())),
        "myreferrals" => Some(Command::MyReferrals),
        "stats" => Some(Command::Stats),
        _ => None,
    }
}

/// One user-initiated event, stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub visitor_id: i64,
    pub chat_id: i64,
    pub username: String,
    pub command: Command,
}

impl InboundEvent {
    /// Returns `None` for messages without a human sender or a known command.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let from = msg.from.as_ref().filter(|u| !u.is_bot)?;
        let command = parse_command(msg.text.as_deref()?)?;
        Some(Self {
            visitor_id: from.id,
            chat_id: msg.chat.id,
            username: from.username.clone().unwrap_or_default(),
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{Chat, TgUser};

    fn message(text: Option<&str>, from: Option<TgUser>) -> Message {
        Message {
            message_id: 1,
            from,
            chat: Chat { id: 500 },
            text: text.map(str::to_string),
        }
    }

    fn human(id: i64, username: Option<&str>) -> Option<TgUser> {
        Some(TgUser {
            id,
            is_bot: false,
            username: username.map(str::to_string),
        })
    }

    #[test]
    fn start_with_and_without_argument() {
        assert_eq!(parse_command("/start"), Some(Command::Start(String::new())));
        assert_eq!(parse_command("/start 7"), Some(Command::Start("7".into())));
        assert_eq!(
            parse_command("/start   ref_7  "),
            Some(Command::Start("ref_7".into()))
        );
    }

    #[test]
    fn bot_suffix_is_ignored() {
        assert_eq!(
            parse_command("/start@Meme_receiver_bot 9"),
            Some(Command::Start("9".into()))
        );
        assert_eq!(parse_command("/stats@some_bot"), Some(Command::Stats));
        assert_eq!(parse_command("/myreferrals"), Some(Command::MyReferrals));
    }

    #[test]
    fn unknown_and_plain_text_are_ignored() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/help"), None);
        assert_eq!(parse_command("/Start"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn event_from_message() {
        let msg = message(Some("/start 7"), human(42, Some("alice")));
        let ev = InboundEvent::from_message(&msg).unwrap();
        assert_eq!(ev.visitor_id, 42);
        assert_eq!(ev.chat_id, 500);
        assert_eq!(ev.username, "alice");
        assert_eq!(ev.command, Command::Start("7".into()));
    }

    #[test]
    fn missing_username_becomes_empty() {
        let msg = message(Some("/stats"), human(42, None));
        assert_eq!(InboundEvent::from_message(&msg).unwrap().username, "");
    }

    #[test]
    fn bots_and_textless_messages_are_skipped() {
        let bot = Some(TgUser {
            id: 9,
            is_bot: true,
            username: Some("other_bot".into()),
        });
        assert!(InboundEvent::from_message(&message(Some("/start"), bot)).is_none());
        assert!(InboundEvent::from_message(&message(None, human(1, None))).is_none());
        assert!(InboundEvent::from_message(&message(Some("/start"), None)).is_none());
        assert!(InboundEvent::from_message(&message(Some("hi"), human(1, None))).is_none());
    }
}
