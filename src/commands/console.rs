//! Текстовые команды интерактивного клиента.

use super::CallHandle;
use crate::error::CallError;
use crate::peer::engine::MediaTrack;
use crate::peer::types::{CodecCapability, MediaKind, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Call(PeerId),
    Accept(PeerId),
    Decline(PeerId),
    HangUp,
    Mute(MediaKind),
    Unmute(MediaKind),
    Bitrate(u32),
    Codec(MediaKind, Option<String>),
    Quit,
}

impl ConsoleCommand {
    pub const USAGE: &'static str = "commands: call <id> | accept <id> | decline <id> | hangup | \
mute audio|video | unmute audio|video | bitrate <kbps> | codec audio|video [mime|default] | quit";

    pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next();

        let peer = |arg: Option<&str>| {
            arg.map(PeerId::from)
                .ok_or_else(|| format!("`{verb}` needs a peer id"))
        };
        let kind = |arg: Option<&str>| match arg {
            Some("audio") => Ok(MediaKind::Audio),
            Some("video") => Ok(MediaKind::Video),
            _ => Err(format!("`{verb}` needs `audio` or `video`")),
        };

        match verb {
            "call" => peer(arg).map(ConsoleCommand::Call),
            "accept" => peer(arg).map(ConsoleCommand::Accept),
            "decline" => peer(arg).map(ConsoleCommand::Decline),
            "hangup" | "bye" => Ok(ConsoleCommand::HangUp),
            "mute" => kind(arg).map(ConsoleCommand::Mute),
            "unmute" => kind(arg).map(ConsoleCommand::Unmute),
            "bitrate" => arg
                .and_then(|a| a.parse().ok())
                .map(ConsoleCommand::Bitrate)
                .ok_or_else(|| "`bitrate` needs a number of kbps".to_string()),
            "codec" => {
                let kind = kind(arg)?;
                let mime = words.next().filter(|m| *m != "default").map(str::to_owned);
                Ok(ConsoleCommand::Codec(kind, mime))
            }
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("unknown command `{other}`")),
        }
    }

    /// Передаёт команду менеджеру звонков
    pub fn dispatch<T: MediaTrack>(self, handle: &CallHandle<T>) -> Result<(), CallError> {
        match self {
            ConsoleCommand::Call(peer) => handle.initiate(peer),
            ConsoleCommand::Accept(peer) => handle.accept(peer),
            ConsoleCommand::Decline(peer) => handle.decline(peer),
            ConsoleCommand::HangUp => handle.hang_up(),
            ConsoleCommand::Mute(MediaKind::Audio) => handle.set_audio_muted(true),
            ConsoleCommand::Mute(MediaKind::Video) => handle.set_video_muted(true),
            ConsoleCommand::Unmute(MediaKind::Audio) => handle.set_audio_muted(false),
            ConsoleCommand::Unmute(MediaKind::Video) => handle.set_video_muted(false),
            ConsoleCommand::Bitrate(kbps) => handle.update_maximum_bitrate(kbps),
            ConsoleCommand::Codec(kind, mime) => {
                handle.update_codec(kind, mime.map(CodecCapability::from_mime))
            }
            ConsoleCommand::Quit => handle.shutdown(),
        }
    }
}
